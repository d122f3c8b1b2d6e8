use super::completion::Completion;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue dispatcher is not running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Work executed by a [`SequentialQueue`].
///
/// `run` receives the whole batch of ready items and must eventually fulfil
/// `done` on every path, including failures and cancellation. It should hand
/// the work off and return promptly; the queue waits on `done`, not on `run`.
pub trait BatchRunner<T>: Send + Sync + 'static {
    fn run(&self, batch: Vec<T>, done: Completion);
}

/// Decides when queued items are handed to the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Dispatch everything pending as soon as the runner is idle
    #[default]
    Immediate,
    /// Wait until no item has arrived for the given quiet period, then
    /// dispatch everything collected as one batch
    Debounce(Duration),
}

impl AdmissionPolicy {
    /// Policy for a debounce window in milliseconds, `0` meaning immediate
    pub fn from_millis(debounce_ms: u64) -> Self {
        if debounce_ms == 0 {
            AdmissionPolicy::Immediate
        } else {
            AdmissionPolicy::Debounce(Duration::from_millis(debounce_ms))
        }
    }
}

enum Command<T> {
    Enqueue(T),
    Shutdown,
}

#[derive(Debug, Default)]
struct Shared {
    pending: AtomicUsize,
    busy: AtomicBool,
    cycles: AtomicU64,
    settled: Notify,
}

/// Single-concurrency queue
///
/// Architecture:
/// 1. Callers `enqueue(item)`; items are appended in submission order
/// 2. A dispatcher task collects pending items according to the admission policy
/// 3. The whole batch goes to the runner together with a [`Completion`]
/// 4. Items arriving while the runner is busy accumulate for the next batch
/// 5. Only after the completion is fulfilled is the next batch dispatched
///
/// The runner therefore never has two batches at once.
pub struct SequentialQueue<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> SequentialQueue<T> {
    /// Create the queue and spawn its dispatcher on the current runtime
    pub fn new(runner: Arc<dyn BatchRunner<T>>, policy: AdmissionPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        info!(?policy, "Starting sequential queue dispatcher");

        let dispatcher = tokio::spawn(dispatch_loop(rx, runner, policy, Arc::clone(&shared)));

        Self {
            tx,
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Append an item to the pending sequence
    pub fn enqueue(&self, item: T) -> Result<()> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if self.tx.send(Command::Enqueue(item)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }

        Ok(())
    }

    /// Items waiting for dispatch (not counting the running batch)
    pub fn pending_len(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Whether a batch is currently with the runner
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Number of processing cycles completed so far
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_busy() && self.pending_len() == 0
    }

    /// Wait until nothing is pending and no batch is running
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.shared.settled.notified();
            if self.is_idle() || self.tx.is_closed() {
                return;
            }
            settled.await;
        }
    }

    /// Stop the dispatcher once the running batch (if any) completes.
    /// Items not yet dispatched are dropped.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);

        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue dispatcher ended abnormally");
            }
        }
    }
}

async fn dispatch_loop<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<Command<T>>,
    runner: Arc<dyn BatchRunner<T>>,
    policy: AdmissionPolicy,
    shared: Arc<Shared>,
) {
    let mut pending: VecDeque<T> = VecDeque::new();
    let mut shutting_down = false;
    let mut cycle: u64 = 0;

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(Command::Enqueue(item)) => pending.push_back(item),
                Some(Command::Shutdown) | None => break,
            }
        }

        // Admission: gather whatever else belongs in this batch
        match policy {
            AdmissionPolicy::Immediate => {
                while let Ok(command) = rx.try_recv() {
                    match command {
                        Command::Enqueue(item) => pending.push_back(item),
                        Command::Shutdown => shutting_down = true,
                    }
                }
            }
            AdmissionPolicy::Debounce(quiet) => loop {
                match tokio::time::timeout(quiet, rx.recv()).await {
                    Ok(Some(Command::Enqueue(item))) => pending.push_back(item),
                    Ok(Some(Command::Shutdown)) | Ok(None) => {
                        shutting_down = true;
                        break;
                    }
                    Err(_) => break,
                }
            },
        }

        if shutting_down {
            break;
        }

        cycle += 1;
        let batch: Vec<T> = pending.drain(..).collect();
        let (done, mut completed) = Completion::channel(cycle);

        // Mark busy before releasing the pending count so the queue never looks idle in between
        shared.busy.store(true, Ordering::SeqCst);
        shared.pending.fetch_sub(batch.len(), Ordering::SeqCst);

        debug!(cycle, batch_size = batch.len(), "Dispatching batch to runner");
        runner.run(batch, done);

        loop {
            tokio::select! {
                _ = &mut completed => break,
                command = rx.recv(), if !shutting_down => match command {
                    Some(Command::Enqueue(item)) => pending.push_back(item),
                    Some(Command::Shutdown) | None => shutting_down = true,
                },
            }
        }

        shared.busy.store(false, Ordering::SeqCst);
        shared.cycles.fetch_add(1, Ordering::SeqCst);
        debug!(cycle, waiting = pending.len(), "Runner signalled completion");
        shared.settled.notify_waiters();

        if shutting_down {
            break;
        }
    }

    // Anything still sitting in the channel is dropped along with `pending`
    rx.close();
    while let Ok(command) = rx.try_recv() {
        if let Command::Enqueue(item) = command {
            pending.push_back(item);
        }
    }
    if !pending.is_empty() {
        warn!(dropped = pending.len(), "Queue shut down with undispatched items");
        shared.pending.fetch_sub(pending.len(), Ordering::SeqCst);
    }

    info!(cycles = cycle, "Sequential queue dispatcher stopped");
    shared.settled.notify_waiters();
}
