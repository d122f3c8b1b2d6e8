//! Upload coordinator: runs queued upload batches one transfer at a time
//!
//! Architecture:
//! 1. The queue hands a batch to [`UploadCoordinator::submit`]
//! 2. The head is transmitted, the tail becomes the pending remainder
//! 3. A driver task owns the cycle and reacts to transport outcomes,
//!    retry timers and cancel requests
//! 4. Every terminal outcome (success, cancel, abandon) goes through
//!    `advance`, which starts the next item or fulfils the completion
//!
//! The driver is the only owner of cycle state, so at most one transfer
//! task exists at any time.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::error::{Result, UploadError};
use super::events::{EventDispatcher, LogDispatcher, UploadEvent, UploadEventKind};
use super::form::{ControlKind, FormSubmission, DEFAULT_IDENTITY_FIELD};
use super::retry::{ExponentialBackoff, RetryPolicy};
use super::transport::{
    Endpoints, LogResponses, ResponseHandler, Transport, TransportError, UploadResponse,
};
use super::types::{FieldId, FieldState, UploadRequest};
use crate::observability::Metrics;
use crate::queue::{BatchRunner, Completion};

/// Everything the coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub retry: Arc<dyn RetryPolicy>,
    pub responses: Arc<dyn ResponseHandler>,
    pub events: Arc<dyn EventDispatcher>,
    pub endpoints: Endpoints,
    /// Control kept enabled alongside the uploaded field
    pub identity_field: String,
    pub metrics: Arc<Metrics>,
}

impl Collaborators {
    /// Defaults: unbounded exponential backoff, logging response handler and dispatcher
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            retry: Arc::new(ExponentialBackoff::default()),
            responses: Arc::new(LogResponses),
            events: Arc::new(LogDispatcher),
            endpoints,
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_responses(mut self, responses: Arc<dyn ResponseHandler>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_identity_field(mut self, identity_field: impl Into<String>) -> Self {
        self.identity_field = identity_field.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

enum Command {
    Submit {
        batch: Vec<UploadRequest>,
        done: Completion,
    },
    Cancel {
        reply: oneshot::Sender<Option<FieldId>>,
    },
}

/// Handle to the coordinator driver task
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    tx: mpsc::UnboundedSender<Command>,
}

impl UploadCoordinator {
    /// Spawn the driver on the current runtime
    pub fn spawn(deps: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            endpoints = deps.endpoints.len(),
            identity_field = %deps.identity_field,
            "Starting upload coordinator"
        );

        let driver = Driver {
            rx,
            deps,
            cycle: None,
        };
        tokio::spawn(driver.run());

        Self { tx }
    }

    /// Take a batch: transmit its head now, keep the tail pending.
    /// `done` is fulfilled once every item reached a terminal outcome.
    pub fn submit(&self, batch: Vec<UploadRequest>, done: Completion) {
        if let Err(mpsc::error::SendError(command)) = self.tx.send(Command::Submit { batch, done })
        {
            error!("Upload coordinator stopped, releasing batch unprocessed");
            if let Command::Submit { done, .. } = command {
                done.done();
            }
        }
    }

    /// Abort the in-flight transfer (or its pending retry) and move on.
    /// Returns the cancelled field, or `None` if nothing was in progress.
    pub async fn cancel(&self) -> Result<Option<FieldId>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cancel { reply })
            .map_err(|_| UploadError::CoordinatorStopped)?;
        rx.await.map_err(|_| UploadError::CoordinatorStopped)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Submit { batch, done } => f
                .debug_struct("Submit")
                .field("batch_size", &batch.len())
                .field("cycle", &done.cycle())
                .finish(),
            Command::Cancel { .. } => f.write_str("Cancel"),
        }
    }
}

impl BatchRunner<UploadRequest> for UploadCoordinator {
    fn run(&self, batch: Vec<UploadRequest>, done: Completion) {
        self.submit(batch, done);
    }
}

type TransferHandle = JoinHandle<std::result::Result<UploadResponse, TransportError>>;

enum Phase {
    Transferring(TransferHandle),
    Backoff(Pin<Box<Sleep>>),
}

struct InFlight {
    request: UploadRequest,
    phase: Phase,
    /// First dequeue of this item; survives retries
    started: Instant,
    span: Span,
}

struct Cycle {
    pending: VecDeque<UploadRequest>,
    active: Option<InFlight>,
    /// Failed attempts of the head item
    failures: u32,
    /// When the head item was first dequeued, kept across its retries
    head_started: Option<Instant>,
    done: Completion,
    started: Instant,
    span: Span,
}

enum Outcome {
    Transferred(std::result::Result<UploadResponse, TransportError>),
    RetryDue,
}

struct Driver {
    rx: mpsc::UnboundedReceiver<Command>,
    deps: Collaborators,
    cycle: Option<Cycle>,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                outcome = next_outcome(&mut self.cycle) => self.handle_outcome(outcome),
            }
        }

        self.stop().await;
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "Coordinator command");
        match command {
            Command::Submit { batch, done } => self.submit(batch, done),
            Command::Cancel { reply } => {
                let cancelled = self.cancel().await;
                let _ = reply.send(cancelled);
            }
        }
    }

    fn submit(&mut self, batch: Vec<UploadRequest>, done: Completion) {
        if let Some(cycle) = self.cycle.as_mut() {
            let _enter = cycle.span.enter();
            warn!(
                cycle = done.cycle(),
                batch_size = batch.len(),
                "Batch submitted while a cycle is running, appending to pending"
            );
            cycle.pending.extend(batch);
            done.done();
            return;
        }

        let span = info_span!("upload_cycle", cycle = done.cycle(), batch_size = batch.len());
        span.in_scope(|| info!("Starting upload cycle"));

        self.cycle = Some(Cycle {
            pending: batch.into(),
            active: None,
            failures: 0,
            head_started: None,
            done,
            started: Instant::now(),
            span,
        });
        self.advance();
    }

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Transferred(Ok(response)) => {
                let Some(active) = self.finish_active() else {
                    return;
                };

                {
                    let _enter = active.span.enter();
                    let request = &active.request;

                    // Never send the same data twice
                    request.field.reset();

                    info!(
                        status = response.status,
                        elapsed_ms = elapsed_ms(active.started),
                        "Upload completed"
                    );
                    self.deps.metrics.upload_succeeded();
                    self.deps
                        .responses
                        .handle(request.form_id(), request.field_id(), response);
                }

                self.advance();
            }
            Outcome::Transferred(Err(error)) => self.schedule_retry(error),
            Outcome::RetryDue => {
                // Same logical item goes back to the head and is submitted again
                if let Some(cycle) = self.cycle.as_mut() {
                    if let Some(active) = cycle.active.take() {
                        cycle.pending.push_front(active.request);
                    }
                }
                self.advance();
            }
        }
    }

    fn schedule_retry(&mut self, error: TransportError) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        let Some(active) = cycle.active.as_mut() else {
            return;
        };

        cycle.failures += 1;
        let attempt = cycle.failures;
        self.deps.metrics.transfer_failed();

        match self.deps.retry.next_delay(attempt) {
            Some(delay) => {
                let _enter = active.span.enter();
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Upload transfer failed, retrying"
                );
                active.phase = Phase::Backoff(Box::pin(tokio::time::sleep(delay)));
            }
            None => {
                active.span.in_scope(|| {
                    error!(attempt, error = %error, "Upload transfer failed, retries exhausted")
                });
                if let Some(active) = self.finish_active() {
                    let _enter = active.span.enter();
                    self.abandon(&active.request, active.started);
                }
                self.advance();
            }
        }
    }

    async fn cancel(&mut self) -> Option<FieldId> {
        let Some(active) = self.finish_active() else {
            debug!("Cancel requested with no upload in progress");
            return None;
        };

        if let Phase::Transferring(handle) = active.phase {
            handle.abort();
            // The aborted transfer is gone before anything else starts
            let _ = handle.await;
        }

        let request = active.request;
        {
            let _enter = active.span.enter();
            request.field.reset();

            info!(elapsed_ms = elapsed_ms(active.started), "Upload cancelled");
            self.deps.metrics.upload_cancelled();
            self.deps.events.dispatch(UploadEvent::new(
                request.form_id().clone(),
                request.field_id().clone(),
                UploadEventKind::Cancel,
            ));
        }

        self.advance();
        Some(request.field_id().clone())
    }

    /// Detach the active item, resetting its retry bookkeeping
    fn finish_active(&mut self) -> Option<InFlight> {
        let cycle = self.cycle.as_mut()?;
        cycle.failures = 0;
        cycle.head_started = None;
        cycle.active.take()
    }

    /// Start the next pending request, or end the cycle when none is left
    fn advance(&mut self) {
        loop {
            let Some(cycle) = self.cycle.as_mut() else {
                return;
            };

            let Some(request) = cycle.pending.pop_front() else {
                if let Some(cycle) = self.cycle.take() {
                    let _enter = cycle.span.enter();
                    info!(elapsed_ms = elapsed_ms(cycle.started), "Upload queue drained");
                    cycle.done.done();
                    self.deps.metrics.cycle_completed();
                }
                return;
            };

            let started = *cycle.head_started.get_or_insert_with(Instant::now);
            let parent = cycle.span.clone();
            let active = self.start(request, &parent, started);

            let Some(cycle) = self.cycle.as_mut() else {
                return;
            };
            match active {
                Some(active) => {
                    cycle.active = Some(active);
                    return;
                }
                None => {
                    cycle.failures = 0;
                    cycle.head_started = None;
                }
            }
        }
    }

    fn start(&self, request: UploadRequest, parent: &Span, started: Instant) -> Option<InFlight> {
        let form_id = request.form_id().clone();
        let field_id = request.field_id().clone();
        let span = info_span!(parent: parent, "upload_transfer", %form_id, %field_id);
        let entered = span.enter();

        // A retried head is still in progress from its previous attempt
        let retried = request.field.state() == FieldState::InProgress;

        let Some(payload) = request.field.begin() else {
            if retried {
                error!("Retried upload lost its selection, abandoning request");
                self.abandon(&request, started);
            } else {
                debug!("Skipping upload request without a selected file");
                request.field.set_state(FieldState::Empty);
            }
            return None;
        };

        let Some(url) = self.deps.endpoints.get(&form_id) else {
            error!("No upload endpoint for form, abandoning request");
            self.abandon(&request, started);
            return None;
        };

        self.deps.events.dispatch(UploadEvent::new(
            form_id.clone(),
            field_id.clone(),
            UploadEventKind::Start,
        ));

        let handle = {
            let identity = self.deps.identity_field.as_str();
            let _disabled = request.form.disable_except(|control| {
                control.name == identity
                    || (control.kind == ControlKind::Upload && control.name == field_id.as_str())
            });

            FormSubmission::capture_with(&request.form, &field_id, payload, url).map(|submission| {
                let transport = Arc::clone(&self.deps.transport);
                tokio::spawn(
                    async move { transport.post(submission).await }.instrument(span.clone()),
                )
            })
        };

        let Some(handle) = handle else {
            error!("Upload control is missing or disabled on its form, abandoning request");
            self.abandon(&request, started);
            return None;
        };

        self.deps.metrics.transfer_started();
        info!("Upload transfer started");

        drop(entered);
        Some(InFlight {
            request,
            phase: Phase::Transferring(handle),
            started,
            span,
        })
    }

    fn abandon(&self, request: &UploadRequest, started: Instant) {
        request.field.reset();
        info!(elapsed_ms = elapsed_ms(started), "Upload abandoned");
        self.deps.metrics.upload_abandoned();
        self.deps.events.dispatch(UploadEvent::new(
            request.form_id().clone(),
            request.field_id().clone(),
            UploadEventKind::Abandoned,
        ));
    }

    async fn stop(&mut self) {
        if let Some(mut cycle) = self.cycle.take() {
            if let Some(active) = cycle.active.take() {
                if let Phase::Transferring(handle) = active.phase {
                    handle.abort();
                    let _ = handle.await;
                }
                active.request.field.set_state(FieldState::Empty);
            }
            cycle.span.in_scope(|| {
                warn!(
                    pending = cycle.pending.len(),
                    elapsed_ms = elapsed_ms(cycle.started),
                    "Upload coordinator stopped in the middle of a cycle"
                )
            });
            cycle.done.done();
        }

        info!("Upload coordinator stopped");
    }
}

/// Resolves when the active item's transfer finishes or its retry is due.
/// Never resolves while nothing is active.
async fn next_outcome(cycle: &mut Option<Cycle>) -> Outcome {
    let Some(active) = cycle.as_mut().and_then(|c| c.active.as_mut()) else {
        return std::future::pending().await;
    };

    match &mut active.phase {
        Phase::Transferring(handle) => match handle.await {
            Ok(result) => Outcome::Transferred(result),
            Err(e) => Outcome::Transferred(Err(TransportError::RequestFailed(format!(
                "transport task failed: {}",
                e
            )))),
        },
        Phase::Backoff(delay) => {
            delay.as_mut().await;
            Outcome::RetryDue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::form::Form;
    use crate::upload::types::Payload;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records submissions; fails the first `failures` posts
    #[derive(Default)]
    struct RecordingTransport {
        submissions: Mutex<Vec<FormSubmission>>,
        failures: Mutex<u32>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(
            &self,
            submission: FormSubmission,
        ) -> crate::upload::transport::Result<UploadResponse> {
            self.submissions.lock().unwrap().push(submission);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Timeout);
            }
            Ok(UploadResponse {
                status: 200,
                body: bytes::Bytes::from_static(b"<ok/>"),
            })
        }
    }

    #[derive(Default)]
    struct RecordingResponses {
        fields: Mutex<Vec<String>>,
    }

    impl ResponseHandler for RecordingResponses {
        fn handle(
            &self,
            _form_id: &crate::upload::FormId,
            field_id: &FieldId,
            _response: UploadResponse,
        ) {
            self.fields.lock().unwrap().push(field_id.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        events: Mutex<Vec<(String, UploadEventKind)>>,
    }

    impl EventDispatcher for RecordingEvents {
        fn dispatch(&self, event: UploadEvent) {
            self.events
                .lock()
                .unwrap()
                .push((event.field_id.to_string(), event.kind));
        }
    }

    struct NoDelay {
        max_attempts: u32,
    }

    impl RetryPolicy for NoDelay {
        fn next_delay(&self, attempt: u32) -> Option<Duration> {
            (attempt < self.max_attempts).then_some(Duration::from_millis(10))
        }
    }

    fn order_form() -> Arc<Form> {
        let form = Arc::new(Form::new("orders"));
        form.add_text(DEFAULT_IDENTITY_FIELD, "session-1");
        form.add_text("comment", "rush delivery");
        form
    }

    fn endpoints() -> Endpoints {
        Endpoints::new().with("orders", "http://localhost/upload/orders")
    }

    #[tokio::test]
    async fn test_head_posted_with_only_identity_and_field() {
        let form = order_form();
        let first = form.add_upload("invoice");
        let second = form.add_upload("receipt");
        first.select(Payload::new("invoice.pdf", b"pdf".to_vec())).unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let responses = Arc::new(RecordingResponses::default());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints()).with_responses(responses.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(vec![UploadRequest::new(form.clone(), first.clone())], done);
        completed.await.unwrap();

        let submissions = transport.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        let submission = &submissions[0];
        assert_eq!(submission.url, "http://localhost/upload/orders");
        assert_eq!(submission.field(DEFAULT_IDENTITY_FIELD), Some("session-1"));
        assert_eq!(submission.field("comment"), None);
        assert_eq!(submission.file.name, "invoice");

        // Controls are enabled again once the post is dispatched
        assert_eq!(form.is_disabled("comment"), Some(false));
        assert_eq!(form.is_disabled(second.id().as_str()), Some(false));

        assert!(first.payload().is_none());
        assert_eq!(first.state(), FieldState::Empty);
        assert_eq!(*responses.fields.lock().unwrap(), vec!["invoice".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_abandons_request() {
        let form = Arc::new(Form::new("unrouted"));
        let field = form.add_upload("attachment");
        field.select(Payload::new("a.bin", b"1".to_vec())).unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(RecordingEvents::default());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints()).with_events(events.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(vec![UploadRequest::new(form, field.clone())], done);
        completed.await.unwrap();

        assert!(transport.submissions.lock().unwrap().is_empty());
        assert_eq!(
            *events.events.lock().unwrap(),
            vec![("attachment".to_string(), UploadEventKind::Abandoned)]
        );
        assert_eq!(field.state(), FieldState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_abandons_and_continues() {
        let form = order_form();
        let first = form.add_upload("invoice");
        let second = form.add_upload("receipt");
        first.select(Payload::new("invoice.pdf", b"1".to_vec())).unwrap();
        second.select(Payload::new("receipt.pdf", b"2".to_vec())).unwrap();

        // Two failures exhaust a two-attempt ceiling for the first item
        let transport = Arc::new(RecordingTransport {
            failures: Mutex::new(2),
            ..Default::default()
        });
        let events = Arc::new(RecordingEvents::default());
        let metrics = Arc::new(Metrics::new());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints())
                .with_retry(Arc::new(NoDelay { max_attempts: 2 }))
                .with_events(events.clone())
                .with_metrics(metrics.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(
            vec![
                UploadRequest::new(form.clone(), first.clone()),
                UploadRequest::new(form.clone(), second.clone()),
            ],
            done,
        );
        completed.await.unwrap();

        let posted: Vec<String> = transport
            .submissions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.file.name.clone())
            .collect();
        assert_eq!(posted, vec!["invoice", "invoice", "receipt"]);

        assert_eq!(
            *events.events.lock().unwrap(),
            vec![
                ("invoice".to_string(), UploadEventKind::Start),
                ("invoice".to_string(), UploadEventKind::Start),
                ("invoice".to_string(), UploadEventKind::Abandoned),
                ("receipt".to_string(), UploadEventKind::Start),
            ]
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_failed, 2);
        assert_eq!(snapshot.uploads_abandoned, 1);
        assert_eq!(snapshot.uploads_succeeded, 1);
        assert_eq!(snapshot.cycles_completed, 1);
        assert!(first.payload().is_none());
    }

    #[tokio::test]
    async fn test_cancel_with_nothing_in_flight() {
        let coordinator = UploadCoordinator::spawn(Collaborators::new(
            Arc::new(RecordingTransport::default()),
            endpoints(),
        ));

        assert_eq!(coordinator.cancel().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_payload_is_skipped() {
        let form = order_form();
        let field = form.add_upload("invoice");

        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(RecordingEvents::default());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints()).with_events(events.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(vec![UploadRequest::new(form, field)], done);
        completed.await.unwrap();

        assert!(transport.submissions.lock().unwrap().is_empty());
        assert!(events.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retried_head_without_payload_is_abandoned() {
        let form = order_form();
        let field = form.add_upload("invoice");
        // Left in progress by a failed attempt, selection gone
        field.set_state(FieldState::InProgress);

        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(RecordingEvents::default());
        let metrics = Arc::new(Metrics::new());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints())
                .with_events(events.clone())
                .with_metrics(metrics.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(vec![UploadRequest::new(form, field.clone())], done);
        completed.await.unwrap();

        assert!(transport.submissions.lock().unwrap().is_empty());
        assert_eq!(
            *events.events.lock().unwrap(),
            vec![("invoice".to_string(), UploadEventKind::Abandoned)]
        );
        assert_eq!(field.state(), FieldState::Empty);
        assert_eq!(metrics.snapshot().uploads_abandoned, 1);
    }

    #[tokio::test]
    async fn test_disabled_upload_control_abandons_request() {
        let form = order_form();
        let field = form.add_upload("invoice");
        field.select(Payload::new("invoice.pdf", b"1".to_vec())).unwrap();
        form.set_disabled("invoice", true);

        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(RecordingEvents::default());
        let coordinator = UploadCoordinator::spawn(
            Collaborators::new(transport.clone(), endpoints()).with_events(events.clone()),
        );

        let (done, completed) = Completion::channel(1);
        coordinator.submit(vec![UploadRequest::new(form, field.clone())], done);
        completed.await.unwrap();

        assert!(transport.submissions.lock().unwrap().is_empty());
        assert_eq!(
            *events.events.lock().unwrap(),
            vec![
                ("invoice".to_string(), UploadEventKind::Start),
                ("invoice".to_string(), UploadEventKind::Abandoned),
            ]
        );
        assert_eq!(field.state(), FieldState::Empty);
        assert!(!field.has_payload());
    }
}
