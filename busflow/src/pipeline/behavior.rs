//! Behaviors that wrap a stage without changing its context type.

use super::Continuation;
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A behavior around the continuation for contexts of type `C`.
#[async_trait]
pub trait Behavior<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Runs this behavior. Call `next.run(ctx)` to continue the chain.
    async fn invoke(&self, ctx: &C, next: Next<'_, C>) -> Result<()>;
}

/// The remainder of a behavior chain.
pub struct Next<'a, C: Send + Sync + 'static> {
    rest: &'a [Arc<dyn Behavior<C>>],
    terminal: &'a dyn Continuation<C>,
}

impl<'a, C: Send + Sync + 'static> Next<'a, C> {
    /// Runs the next behavior, or the terminal continuation when none is left.
    pub async fn run(self, ctx: &C) -> Result<()> {
        match self.rest.split_first() {
            Some((behavior, rest)) => {
                behavior
                    .invoke(
                        ctx,
                        Next {
                            rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => self.terminal.proceed(ctx).await,
        }
    }
}

/// An ordered list of behaviors in front of a terminal continuation.
///
/// The order is fixed when the chain is built.
pub struct BehaviorChain<C: Send + Sync + 'static, N> {
    behaviors: Vec<Arc<dyn Behavior<C>>>,
    terminal: N,
}

impl<C: Send + Sync + 'static, N: Continuation<C>> BehaviorChain<C, N> {
    /// Creates a chain with no behaviors.
    #[must_use]
    pub fn new(terminal: N) -> Self {
        Self {
            behaviors: Vec::new(),
            terminal,
        }
    }

    /// Appends a behavior. Earlier behaviors wrap later ones.
    #[must_use]
    pub fn with_behavior(mut self, behavior: Arc<dyn Behavior<C>>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Returns the number of behaviors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Returns true if the chain has no behaviors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[async_trait]
impl<C, N> Continuation<C> for BehaviorChain<C, N>
where
    C: Send + Sync + 'static,
    N: Continuation<C>,
{
    async fn proceed(&self, ctx: &C) -> Result<()> {
        Next {
            rest: &self.behaviors,
            terminal: &self.terminal,
        }
        .run(ctx)
        .await
    }
}

impl<C: Send + Sync + 'static, N> std::fmt::Debug for BehaviorChain<C, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorChain")
            .field("behaviors", &self.behaviors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl Behavior<u32> for Tag {
        async fn invoke(&self, ctx: &u32, next: Next<'_, u32>) -> Result<()> {
            self.log.lock().push(format!("{}:before", self.name));
            if !self.short_circuit {
                next.run(ctx).await?;
            }
            self.log.lock().push(format!("{}:after", self.name));
            Ok(())
        }
    }

    struct Terminal(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Continuation<u32> for Terminal {
        async fn proceed(&self, ctx: &u32) -> Result<()> {
            self.0.lock().push(format!("terminal:{ctx}"));
            Ok(())
        }
    }

    fn tag(name: &'static str, log: &Arc<Mutex<Vec<String>>>, short_circuit: bool) -> Arc<dyn Behavior<u32>> {
        Arc::new(Tag {
            name,
            log: log.clone(),
            short_circuit,
        })
    }

    #[tokio::test]
    async fn test_behaviors_wrap_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: BehaviorChain<u32, _> = BehaviorChain::new(Terminal(log.clone()))
            .with_behavior(tag("a", &log, false))
            .with_behavior(tag("b", &log, false));

        chain.proceed(&7u32).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["a:before", "b:before", "terminal:7", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_behavior_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: BehaviorChain<u32, _> =
            BehaviorChain::new(Terminal(log.clone())).with_behavior(tag("a", &log, true));

        chain.proceed(&1u32).await.unwrap();
        assert_eq!(*log.lock(), vec!["a:before", "a:after"]);
    }

    #[tokio::test]
    async fn test_empty_chain_runs_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: BehaviorChain<u32, _> = BehaviorChain::new(Terminal(log.clone()));

        assert!(chain.is_empty());
        chain.proceed(&3u32).await.unwrap();
        assert_eq!(*log.lock(), vec!["terminal:3"]);
    }
}
