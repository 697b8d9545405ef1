//! Builders that produce handler instances.

use super::{Handler, HandlerType};
use crate::errors::{BusflowError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a new instance of a handler type.
pub trait Builder: Send + Sync {
    /// Returns a fresh instance for `handler_type`.
    ///
    /// # Errors
    ///
    /// Returns `HandlerBuild` if the type cannot be resolved.
    fn build(&self, handler_type: &HandlerType) -> Result<Arc<dyn Handler>>;
}

/// Factory callback used by [`FactoryBuilder`].
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// A builder that resolves handlers from registered factory closures.
///
/// Every call to `build` invokes the factory, so instances are never shared
/// between messages unless the factory itself hands out a shared one.
#[derive(Default)]
pub struct FactoryBuilder {
    factories: RwLock<HashMap<HandlerType, HandlerFactory>>,
}

impl FactoryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `handler_type`, replacing any previous one.
    pub fn register<F>(&self, handler_type: impl Into<HandlerType>, factory: F)
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(handler_type.into(), Arc::new(factory));
    }

    /// Registers a factory, builder style.
    #[must_use]
    pub fn with_factory<F>(self, handler_type: impl Into<HandlerType>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.register(handler_type, factory);
        self
    }

    /// Returns true if a factory exists for `handler_type`.
    #[must_use]
    pub fn contains(&self, handler_type: &HandlerType) -> bool {
        self.factories.read().contains_key(handler_type)
    }
}

impl Builder for FactoryBuilder {
    fn build(&self, handler_type: &HandlerType) -> Result<Arc<dyn Handler>> {
        let factory = self
            .factories
            .read()
            .get(handler_type)
            .cloned()
            .ok_or_else(|| BusflowError::handler_build(handler_type.name(), "no factory registered"))?;
        Ok(factory())
    }
}

impl std::fmt::Debug for FactoryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self
            .factories
            .read()
            .keys()
            .map(|t| t.name().to_string())
            .collect();
        types.sort();
        f.debug_struct("FactoryBuilder")
            .field("handler_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHandler;

    #[test]
    fn test_build_unknown_type_fails() {
        let builder = FactoryBuilder::new();
        let err = builder.build(&HandlerType::new("Missing")).err().unwrap();

        assert!(matches!(err, BusflowError::HandlerBuild { ref handler_type, .. } if handler_type == "Missing"));
    }

    #[test]
    fn test_build_invokes_factory_each_time() {
        let builder = FactoryBuilder::new()
            .with_factory("H1", || Arc::new(RecordingHandler::new("H1")) as Arc<dyn Handler>);

        let a = builder.build(&HandlerType::new("H1")).unwrap();
        let b = builder.build(&HandlerType::new("H1")).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(builder.contains(&HandlerType::new("H1")));
    }
}
