//! Delayed reconciliation
//!
//! A background task owning at most one pending deadline. When the deadline
//! passes it asks its target to reconcile (re-fetch). Scheduling again before
//! the deadline moves it, so a burst of votes produces a single fetch.
//!
//! The task only holds a weak reference to its target and exits once the
//! target is gone.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Something that can be brought back in line with the backend
#[async_trait]
pub(crate) trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self);
}

#[derive(Debug)]
enum Command {
    /// Replace any pending deadline with `now + delay`
    Reschedule(Duration),
    /// Set `now + delay` only if nothing is pending
    Nudge(Duration),
    Cancel,
}

/// Handle to the reconciliation task
pub(crate) struct Reconciler {
    tx: mpsc::UnboundedSender<Command>,
}

impl Reconciler {
    /// Spawn the task. Must be called from within a tokio runtime.
    pub(crate) fn spawn<T: Reconcile>(target: Weak<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(target, rx));
        Self { tx }
    }

    pub(crate) fn reschedule(&self, delay: Duration) {
        self.send(Command::Reschedule(delay));
    }

    pub(crate) fn nudge(&self, delay: Duration) {
        self.send(Command::Nudge(delay));
    }

    pub(crate) fn cancel(&self) {
        self.send(Command::Cancel);
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Reconciler already stopped");
        }
    }
}

async fn run<T: Reconcile>(target: Weak<T>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep_until(at) => {
                        deadline = None;
                        let Some(target) = target.upgrade() else { break };
                        debug!("Reconciling");
                        target.reconcile().await;
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        match command {
            Some(Command::Reschedule(delay)) => deadline = Some(Instant::now() + delay),
            Some(Command::Nudge(delay)) => {
                deadline.get_or_insert_with(|| Instant::now() + delay);
            }
            Some(Command::Cancel) => deadline = None,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl Reconcile for Counter {
        async fn reconcile(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fired(counter: &Counter) -> usize {
        counter.fired.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let counter = Arc::new(Counter::default());
        let reconciler = Reconciler::spawn(Arc::downgrade(&counter));

        reconciler.reschedule(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(fired(&counter), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired(&counter), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_debounces() {
        let counter = Arc::new(Counter::default());
        let reconciler = Reconciler::spawn(Arc::downgrade(&counter));

        reconciler.reschedule(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(1)).await;
        reconciler.reschedule(Duration::from_secs(2));

        // The first deadline has passed but was moved
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired(&counter), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired(&counter), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudge_keeps_pending_deadline() {
        let counter = Arc::new(Counter::default());
        let reconciler = Reconciler::spawn(Arc::downgrade(&counter));

        reconciler.reschedule(Duration::from_secs(2));
        reconciler.nudge(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired(&counter), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired(&counter), 1);

        // With nothing pending a nudge schedules on its own
        reconciler.nudge(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired(&counter), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let counter = Arc::new(Counter::default());
        let reconciler = Reconciler::spawn(Arc::downgrade(&counter));

        reconciler.reschedule(Duration::from_secs(2));
        reconciler.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired(&counter), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_target_is_not_reconciled() {
        let counter = Arc::new(Counter::default());
        let reconciler = Reconciler::spawn(Arc::downgrade(&counter));

        reconciler.reschedule(Duration::from_secs(1));
        drop(counter);
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Task has exited, further commands are ignored
        reconciler.reschedule(Duration::from_secs(1));
    }
}
