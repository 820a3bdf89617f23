//! Executor contract: the seam between the queue and the generation engine.

use async_trait::async_trait;

use crate::core::error::AppResult;
use crate::core::task::{CancelSignal, ReleasedTask};

/// The external executor contract.
///
/// Given a released task, perform the generation work out-of-band and return
/// exactly one terminal outcome. The queue never executes work itself: it
/// drives this future through its spawner under the task's timeout budget
/// and folds the result back into `complete`/`fail` bookkeeping.
///
/// A successful run returns `Ok(())` — output artifacts are the executor's
/// concern, not the queue's. The `cancel` signal carries cancellation
/// intent; honoring it (or not) is up to the implementation.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use genqueue::core::{CancelSignal, ReleasedTask, TaskRunner};
///
/// struct RenderEngine;
///
/// #[derive(Debug)]
/// struct RenderJob {
///     prompt: String,
/// }
///
/// #[async_trait]
/// impl TaskRunner<RenderJob> for RenderEngine {
///     async fn run(
///         &self,
///         task: ReleasedTask<RenderJob>,
///         cancel: CancelSignal,
///     ) -> anyhow::Result<()> {
///         tokio::select! {
///             result = render(&task.payload.prompt) => result,
///             _ = cancel.cancelled() => Ok(()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TaskRunner<P>: Send + Sync + 'static {
    /// Execute a released task to one terminal outcome.
    async fn run(&self, task: ReleasedTask<P>, cancel: CancelSignal) -> AppResult<()>;
}
