use tokio::sync::oneshot;
use tracing::error;

/// Receiving half of a [`Completion`]. Resolves once the runner is finished,
/// either because `done()` was called or because the token was dropped.
pub type CompletionReceiver = oneshot::Receiver<()>;

/// Single-use completion signal handed to a runner together with its batch.
///
/// The queue will not dispatch another batch until this token is fulfilled.
/// `done` consumes the token, so it cannot be signalled twice. A token that is
/// dropped without being signalled still releases the queue, but the runner
/// is reported as having broken its contract.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<()>>,
    cycle: u64,
}

impl Completion {
    /// Create a completion token for the given processing cycle
    pub fn channel(cycle: u64) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx), cycle }, rx)
    }

    /// Processing cycle this token belongs to
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Signal that the batch has been fully processed
    pub fn done(mut self) {
        if let Some(tx) = self.tx.take() {
            // Receiver gone means the queue already shut down; nothing to release.
            let _ = tx.send(());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            error!(
                cycle = self.cycle,
                "Runner dropped its completion without signalling done, releasing queue"
            );
        }
    }
}
