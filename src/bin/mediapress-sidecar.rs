use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use mediapress_core::batch::{BatchCanceller, BatchProgress};
use mediapress_core::codec::format_availability;
use mediapress_core::config::SupervisorConfig;
use mediapress_core::editor::EditorSession;
use mediapress_core::error::AppError;
use mediapress_core::ffmpeg::cleanup_old_temp_files;
use mediapress_core::logging;
use mediapress_core::settings::CompressionSettings;
use mediapress_core::supervisor::{FailureReport, SupervisorEvent, SupervisorEvents, WorkStream};
use mediapress_core::toolchain::Toolchain;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

impl From<&AppError> for RpcErrorPayload {
    fn from(err: &AppError) -> Self {
        let report = FailureReport::from_error(err);
        Self {
            summary: report.summary,
            detail: report.detail,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    CommandPreview {
        #[serde(rename = "outputPath")]
        output_path: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadParams {
    input_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SettingsParams {
    settings: CompressionSettings,
}

#[derive(Debug, Deserialize)]
struct ScrubParams {
    position: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveParams {
    output_path: PathBuf,
}

#[derive(Debug, Deserialize, Default)]
struct CancelParams {
    stream: Option<WorkStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchParams {
    files: Vec<PathBuf>,
    destination_dir: PathBuf,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: RpcErrorPayload::from(&err),
            },
        ),
    };
    if let Err(e) = written {
        log::error!(target: "mediapress::sidecar", "Failed to write response {}: {}", id, e);
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid params payload: {}", e)))
}

fn to_json<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn job_event_name(event: &SupervisorEvent) -> &'static str {
    match event {
        SupervisorEvent::Started { .. } => "media.job.started",
        SupervisorEvent::Progress { .. } => "media.job.progress",
        SupervisorEvent::Completed { .. } => "media.job.complete",
        SupervisorEvent::Failed { .. } => "media.job.error",
        SupervisorEvent::Cancelled { .. } => "media.job.cancelled",
    }
}

async fn forward_events(mut events: SupervisorEvents, writer: SharedWriter) {
    while let Some(event) = events.recv().await {
        match serde_json::to_value(&event) {
            Ok(payload) => emit_rpc_event(&writer, job_event_name(&event), payload),
            Err(e) => log::warn!(target: "mediapress::sidecar", "Dropping event: {}", e),
        }
    }
}

struct Sidecar {
    writer: SharedWriter,
    config: SupervisorConfig,
    toolchain: Result<Toolchain, String>,
    editor: Option<EditorSession>,
    batch: Arc<Mutex<Option<BatchCanceller>>>,
    batch_jobs: Vec<JoinHandle<()>>,
}

impl Sidecar {
    fn new(
        writer: SharedWriter,
        config: SupervisorConfig,
        toolchain: Result<Toolchain, String>,
    ) -> Self {
        let editor = toolchain.as_ref().ok().map(|toolchain| {
            let (editor, events) = EditorSession::new(config.clone(), toolchain.clone());
            tokio::spawn(forward_events(events, Arc::clone(&writer)));
            editor
        });
        Self {
            writer,
            config,
            toolchain,
            editor,
            batch: Arc::new(Mutex::new(None)),
            batch_jobs: Vec::new(),
        }
    }

    fn toolchain(&self) -> Result<&Toolchain, AppError> {
        self.toolchain
            .as_ref()
            .map_err(|msg| AppError::ToolUnavailable(msg.clone()))
    }

    fn editor(&self) -> Result<&EditorSession, AppError> {
        self.toolchain()?;
        self.editor
            .as_ref()
            .ok_or_else(|| AppError::ToolUnavailable("Editor is not available".to_string()))
    }

    fn editor_mut(&mut self) -> Result<&mut EditorSession, AppError> {
        self.toolchain()?;
        self.editor
            .as_mut()
            .ok_or_else(|| AppError::ToolUnavailable("Editor is not available".to_string()))
    }

    async fn handle(&mut self, request: RpcRequest) {
        log::debug!(
            target: "mediapress::sidecar",
            "request {} {}",
            request.id,
            request.method
        );
        if request.method == "batch.run" {
            if let Err(err) = self.start_batch(request.id, request.params) {
                respond(&self.writer, request.id, Err(err));
            }
            return;
        }
        let result = self.dispatch(&request.method, request.params).await;
        respond(&self.writer, request.id, result);
    }

    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, AppError> {
        match method {
            "app.capabilities" => {
                let toolchain = self.toolchain()?;
                Ok(json!({
                    "ffmpegPath": toolchain.ffmpeg,
                    "encoders": toolchain.capabilities.encoders(),
                    "formats": to_json(format_availability(&toolchain.capabilities), "formats")?,
                }))
            }
            "media.inspect" => match params_from_value(params)? {
                MediaInspectParams::Metadata { input_path } => {
                    let probe = Arc::clone(&self.toolchain()?.probe);
                    let (result, info) =
                        tokio::task::spawn_blocking(move || probe.inspect(&input_path))
                            .await
                            .map_err(|e| AppError::Internal(format!("Probe task failed: {}", e)))??;
                    Ok(json!({
                        "probe": to_json(result, "probe result")?,
                        "info": to_json(info, "media info")?,
                    }))
                }
                MediaInspectParams::CommandPreview { output_path } => {
                    let text = self.editor()?.command_preview(output_path.as_deref()).await?;
                    Ok(Value::String(text))
                }
            },
            "editor.load" => {
                let LoadParams { input_path } = params_from_value(params)?;
                let editor = self.editor_mut()?;
                let source = editor.load(input_path).await?;
                Ok(json!({
                    "source": to_json(source, "source")?,
                    "settings": to_json(editor.settings(), "settings")?,
                }))
            }
            "editor.settings" => {
                let SettingsParams { settings } = params_from_value(params)?;
                let generation = self.editor_mut()?.on_settings_changed(settings).await?;
                Ok(json!({ "generation": generation }))
            }
            "editor.scrub" => {
                let ScrubParams { position } = params_from_value(params)?;
                let generation = self.editor_mut()?.on_scrub(position).await?;
                Ok(json!({ "generation": generation }))
            }
            "editor.save" => {
                let SaveParams { output_path } = params_from_value(params)?;
                let generation = self.editor()?.on_save(output_path).await?;
                Ok(json!({ "generation": generation }))
            }
            "editor.cancel" => {
                let CancelParams { stream } = if params.is_null() {
                    CancelParams::default()
                } else {
                    params_from_value(params)?
                };
                let editor = self.editor()?;
                match stream {
                    Some(WorkStream::Preview) => editor.cancel_preview(),
                    Some(WorkStream::Export) => editor.cancel_export(),
                    None => {
                        editor.cancel_preview();
                        editor.cancel_export();
                    }
                }
                Ok(json!({ "cancelled": true }))
            }
            "batch.cancel" => {
                let canceller = self.batch.lock().clone();
                let cancelled = match canceller {
                    Some(canceller) => {
                        canceller.cancel();
                        true
                    }
                    None => false,
                };
                Ok(json!({ "cancelled": cancelled }))
            }
            _ => Err(AppError::InvalidRequest(format!("Unknown method: {}", method))),
        }
    }

    /// Batches run off the request loop; the response is written when the batch ends.
    fn start_batch(&mut self, id: u64, params: Value) -> Result<(), AppError> {
        let BatchParams {
            files,
            destination_dir,
        } = params_from_value(params)?;
        let editor = self.editor()?;
        let mut slot = self.batch.lock();
        if slot.is_some() {
            return Err(AppError::Busy("A batch is already running".to_string()));
        }

        let events_writer = Arc::clone(&self.writer);
        let progress = Arc::new(move |p: BatchProgress| match serde_json::to_value(&p) {
            Ok(payload) => emit_rpc_event(&events_writer, "batch.progress", payload),
            Err(e) => log::warn!(target: "mediapress::sidecar", "Dropping batch progress: {}", e),
        });
        let (canceller, job) = editor.on_save_batch(files, destination_dir, progress);
        *slot = Some(canceller);
        drop(slot);

        let writer = Arc::clone(&self.writer);
        let batch = Arc::clone(&self.batch);
        self.batch_jobs.push(tokio::spawn(async move {
            let result = job
                .await
                .and_then(|report| to_json(report, "batch report"));
            batch.lock().take();
            respond(&writer, id, result);
        }));
        Ok(())
    }

    async fn finish(self) {
        for job in self.batch_jobs {
            let _ = job.await;
        }
        if let Some(editor) = &self.editor {
            editor.shutdown().await;
        }
        log::debug!(
            target: "mediapress::sidecar",
            "Sidecar stopped (temp_dir={})",
            self.config.temp_dir.display()
        );
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    logging::init();
    let config = SupervisorConfig::from_env();
    let removed = cleanup_old_temp_files(&config.temp_dir, config.temp_max_age);
    if removed > 0 {
        log::info!(target: "mediapress::sidecar", "Removed {} stale temp file(s)", removed);
    }

    let toolchain = match tokio::task::spawn_blocking(Toolchain::discover).await {
        Ok(Ok(toolchain)) => Ok(toolchain),
        Ok(Err(err)) => Err(err.to_string()),
        Err(e) => Err(format!("Toolchain discovery failed: {}", e)),
    };
    if let Err(msg) = &toolchain {
        log::error!(target: "mediapress::sidecar", "{}", msg);
    }

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let mut sidecar = Sidecar::new(Arc::clone(&stdout), config, toolchain);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        sidecar.handle(request).await;
    }

    sidecar.finish().await;
    Ok(())
}
