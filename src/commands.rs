use postbox::config::{Config, ConfigError};
use postbox::upload::{
    ChannelDispatcher, FieldId, FormId, HttpConfig, HttpTransport, Payload, ResponseHandler,
    UploadEventKind, UploadField, UploadResponse,
};
use postbox::UploadSession;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::cli::{ConfigArgs, UploadArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn load_config(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Status codes of successful uploads, keyed by field
#[derive(Default)]
struct ResponseLog {
    statuses: Mutex<HashMap<FieldId, u16>>,
}

impl ResponseHandler for ResponseLog {
    fn handle(&self, form_id: &FormId, field_id: &FieldId, response: UploadResponse) {
        info!(%form_id, %field_id, status = response.status, "Upload accepted");
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(field_id.clone(), response.status);
    }
}

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    field: FieldId,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

#[derive(Debug, Serialize)]
struct UploadSummary {
    session_id: String,
    form: String,
    files: Vec<FileReport>,
    metrics: postbox::observability::MetricsSnapshot,
}

pub async fn upload(args: UploadArgs) -> Result<(), AnyError> {
    let mut config = load_config(args.config)?;
    if let Some(endpoint) = args.endpoint {
        config.endpoints.insert(args.form.clone(), endpoint);
    }
    config.validate()?;

    let transport = HttpTransport::new(HttpConfig::from(&config.transport))?;
    let responses = Arc::new(ResponseLog::default());
    let (events, mut event_rx) = ChannelDispatcher::new();

    let session = UploadSession::builder()
        .config(config)
        .transport(Arc::new(transport))
        .events(Arc::new(events))
        .responses(Arc::clone(&responses) as Arc<dyn ResponseHandler>)
        .build();

    let form = session.form(args.form.as_str());
    let mut fields: Vec<(String, Arc<UploadField>)> = Vec::with_capacity(args.files.len());

    for (index, path) in args.files.iter().enumerate() {
        let data = tokio::fs::read(path).await?;
        let field = form.add_upload(format!("file{}", index + 1));
        field.select(Payload::new(file_name(path), data))?;
        session.request_upload(&form, &field)?;
        fields.push((path.display().to_string(), field));
    }

    info!(files = fields.len(), form = %form.id(), "Uploads queued");

    let interrupted = tokio::select! {
        _ = session.wait_idle() => false,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            true
        }
    };

    if interrupted {
        warn!("Interrupted, cancelling remaining uploads");
        // Emptied fields are skipped when dequeued; the one in flight refuses and is cancelled
        for (_, field) in &fields {
            if let Err(e) = field.clear() {
                debug!(error = %e, "Field left to cancel");
            }
        }
        if let Some(field_id) = session.cancel().await? {
            info!(%field_id, "In-flight upload cancelled");
        }
        session.wait_idle().await;
    }
    session.shutdown().await;

    let mut terminal: HashMap<FieldId, UploadEventKind> = HashMap::new();
    while let Ok(event) = event_rx.try_recv() {
        if event.kind != UploadEventKind::Start {
            terminal.insert(event.field_id, event.kind);
        }
    }

    let statuses = responses
        .statuses
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let files = fields
        .into_iter()
        .map(|(file, field)| {
            let field_id = field.id().clone();
            let status = statuses.get(&field_id).copied();
            let outcome = match (status, terminal.get(&field_id)) {
                (Some(_), _) => "uploaded",
                (None, Some(UploadEventKind::Cancel)) => "cancelled",
                (None, Some(UploadEventKind::Abandoned)) => "abandoned",
                (None, _) => "skipped",
            };
            FileReport {
                file,
                field: field_id,
                outcome,
                status,
            }
        })
        .collect();

    let summary = UploadSummary {
        session_id: session.id().to_string(),
        form: args.form,
        files,
        metrics: session.metrics(),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn show_config(args: ConfigArgs) -> Result<(), AnyError> {
    let config = load_config(args.config)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
