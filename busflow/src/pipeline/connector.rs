//! Stage connectors and continuations.
//!
//! A connector receives its input context and a continuation that accepts the
//! next stage's context. Composition happens once, at build time, through
//! [`Connected`].

use crate::errors::Result;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// The rest of the pipeline, seen from a stage.
#[async_trait]
pub trait Continuation<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Runs the remaining stages with `ctx`.
    async fn proceed(&self, ctx: &C) -> Result<()>;
}

#[async_trait]
impl<C, T> Continuation<C> for Arc<T>
where
    C: Send + Sync + 'static,
    T: Continuation<C> + ?Sized,
{
    async fn proceed(&self, ctx: &C) -> Result<()> {
        (**self).proceed(ctx).await
    }
}

/// A stage that turns an `In` context into an `Out` context.
#[async_trait]
pub trait StageConnector<In, Out>: Send + Sync
where
    In: Send + Sync + 'static,
    Out: Send + Sync + 'static,
{
    /// Runs this stage and calls `next` zero or more times.
    async fn invoke(&self, ctx: &In, next: &dyn Continuation<Out>) -> Result<()>;
}

/// A connector bound to the continuation that follows it.
pub struct Connected<S, N, Out> {
    stage: S,
    next: N,
    _out: PhantomData<fn() -> Out>,
}

impl<S, N, Out> Connected<S, N, Out> {
    /// Binds `stage` to `next`.
    #[must_use]
    pub fn new(stage: S, next: N) -> Self {
        Self {
            stage,
            next,
            _out: PhantomData,
        }
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> &S {
        &self.stage
    }
}

#[async_trait]
impl<In, Out, S, N> Continuation<In> for Connected<S, N, Out>
where
    In: Send + Sync + 'static,
    Out: Send + Sync + 'static,
    S: StageConnector<In, Out>,
    N: Continuation<Out>,
{
    async fn proceed(&self, ctx: &In) -> Result<()> {
        self.stage.invoke(ctx, &self.next).await
    }
}

impl<S, N, Out> std::fmt::Debug for Connected<S, N, Out>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected").field("stage", &self.stage).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BusflowError;
    use parking_lot::Mutex;

    struct Doubler;

    #[async_trait]
    impl StageConnector<u32, u64> for Doubler {
        async fn invoke(&self, ctx: &u32, next: &dyn Continuation<u64>) -> Result<()> {
            next.proceed(&(u64::from(*ctx) * 2)).await?;
            next.proceed(&(u64::from(*ctx) * 2 + 1)).await
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<u64>>);

    #[async_trait]
    impl Continuation<u64> for Collect {
        async fn proceed(&self, ctx: &u64) -> Result<()> {
            if *ctx > 100 {
                return Err(BusflowError::Internal("too big".to_string()));
            }
            self.0.lock().push(*ctx);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connected_feeds_transformed_context() {
        let sink = Arc::new(Collect::default());
        let pipeline: Connected<_, _, u64> = Connected::new(Doubler, sink.clone());

        pipeline.proceed(&5u32).await.unwrap();
        assert_eq!(*sink.0.lock(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_error_short_circuits() {
        let sink = Arc::new(Collect::default());
        let pipeline: Connected<_, _, u64> = Connected::new(Doubler, sink.clone());

        assert!(pipeline.proceed(&60u32).await.is_err());
        assert!(sink.0.lock().is_empty());
    }
}
