//! [`PreemptibleSlot`] – at most one running task per control axis.
//!
//! Starting a task on an axis cancels whatever was running there. The old
//! task notices at its next suspension point, runs its own cleanup, and
//! finishes in the background; the caller never waits for it.

use std::future::Future;

use labrig_types::RigError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tasks that were just cancelled and may still be running their cleanup.
#[must_use = "await `finished` or pass to `supersede` to order after the cleanup"]
#[derive(Default)]
pub struct Preempted(Vec<JoinHandle<()>>);

impl Preempted {
    pub fn and(mut self, other: Preempted) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wait until every cancelled task has finished its cleanup.
    pub async fn finished(self) {
        for handle in self.0 {
            let _ = handle.await;
        }
    }
}

pub struct PreemptibleSlot {
    axis: &'static str,
    current: Mutex<Option<Running>>,
}

impl PreemptibleSlot {
    pub fn new(axis: &'static str) -> Self {
        Self {
            axis,
            current: Mutex::new(None),
        }
    }

    /// Cancel the current task (if any) and spawn `task` in its place.
    ///
    /// The new task starts only after the task it replaced, and everything
    /// in `after`, has finished cleaning up, so a cancelled task can never
    /// write after its successor. The caller does not wait for any of it.
    ///
    /// `task` receives the token it must honour; [`cancellable`] covers the
    /// common case. The returned receiver yields the task's result, or
    /// closes without a value if the task panicked.
    pub fn supersede<F, Fut, T>(
        &self,
        after: Preempted,
        task: F,
    ) -> oneshot::Receiver<Result<T, RigError>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, RigError>> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let fut = task(token.clone());
        let (tx, rx) = oneshot::channel();

        let mut current = self.current.lock();
        let after = after.and(self.take_cancelled(&mut current));
        let handle = tokio::spawn(async move {
            after.finished().await;
            let _ = tx.send(fut.await);
        });
        *current = Some(Running { token, handle });
        rx
    }

    /// Cancel the current task without replacing it.
    pub fn cancel(&self) -> Preempted {
        let mut current = self.current.lock();
        self.take_cancelled(&mut current)
    }

    fn take_cancelled(&self, current: &mut Option<Running>) -> Preempted {
        match current.take() {
            Some(Running { token, handle }) if !handle.is_finished() => {
                debug!(axis = self.axis, "cancelling running task");
                token.cancel();
                Preempted(vec![handle])
            }
            _ => Preempted::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Cancel and wait for the task's cleanup to finish. Used at shutdown.
    pub async fn shutdown(&self) {
        self.cancel().finished().await;
    }
}

/// Run `fut` until it completes or `token` fires, whichever is first.
/// A token that is already cancelled wins before `fut` is ever polled.
pub async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, RigError>>,
) -> Result<T, RigError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RigError::Cancelled),
        result = fut => result,
    }
}

/// Sleep that ends early with [`RigError::Cancelled`].
pub async fn sleep_or_cancel(
    token: &CancellationToken,
    duration: std::time::Duration,
) -> Result<(), RigError> {
    cancellable(token, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}
