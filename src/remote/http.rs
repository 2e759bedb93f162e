//! HTTP backend for the remote processing service.
//!
//! Requests go through a blocking `ureq` agent on the blocking thread pool.
//! Non-2xx statuses are not transport errors here: their bodies carry the
//! server's `detail` and must be read.

use super::{GateService, InvokeFailure, PhaseInvokers, RemoteInvoker};
use crate::config::{ApiConfig, RouteConfig};
use crate::gate::GateContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shown when a rename call succeeds without a decoded value.
pub const NO_CODE_DETECTED: &str = "No code detected";
pub const UPLOADED: &str = "Uploaded for OCR processing";
pub const GENERATED: &str = "2-layer PDF generated";

/// Which code a rename pass extracts from each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    #[value(name = "qrcode")]
    QrCode,
    #[value(name = "barcode")]
    BarCode,
}

impl ProcessKind {
    pub fn route(self, routes: &RouteConfig) -> &str {
        match self {
            Self::QrCode => &routes.qrcode,
            Self::BarCode => &routes.barcode,
        }
    }
}

/// Status and body of a response, whatever the status.
#[derive(Debug)]
struct RawResponse {
    status: u16,
    body: String,
}

pub struct HttpClient {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpClient {
    pub fn new(api: &ApiConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(api.request_timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: api.base_url.clone(),
        }
    }

    pub fn url(&self, route: &str) -> String {
        join_url(&self.base_url, route)
    }

    async fn post_json(&self, route: &str, body: Option<Value>) -> Result<RawResponse, InvokeFailure> {
        let agent = self.agent.clone();
        let url = self.url(route);
        debug!(url = %url, "POST");
        run_blocking(move || {
            let request = agent.post(&url).header("Content-Type", "application/json");
            let mut response = match body {
                Some(body) => request.send(body.to_string()),
                None => request.send_empty(),
            }
            .map_err(|e| InvokeFailure::Transport(e.to_string()))?;
            read_response(&mut response)
        })
        .await
    }

    async fn get(&self, route: &str, query: Vec<(&'static str, String)>) -> Result<RawResponse, InvokeFailure> {
        let agent = self.agent.clone();
        let url = self.url(route);
        debug!(url = %url, "GET");
        run_blocking(move || {
            let mut request = agent.get(&url);
            for (key, value) in &query {
                request = request.query(*key, value);
            }
            let mut response = request
                .call()
                .map_err(|e| InvokeFailure::Transport(e.to_string()))?;
            read_response(&mut response)
        })
        .await
    }
}

async fn run_blocking<F>(call: F) -> Result<RawResponse, InvokeFailure>
where
    F: FnOnce() -> Result<RawResponse, InvokeFailure> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| InvokeFailure::Transport(e.to_string()))?
}

fn read_response(response: &mut ureq::http::Response<ureq::Body>) -> Result<RawResponse, InvokeFailure> {
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| InvokeFailure::Transport(e.to_string()))?;
    Ok(RawResponse { status, body })
}

fn join_url(base_url: &str, route: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}

/// Maps a response onto success payload or [`InvokeFailure::Server`].
///
/// A 2xx body that is not JSON counts as success with a `null` payload.
fn classify(status: u16, body: &str) -> Result<Value, InvokeFailure> {
    let parsed = serde_json::from_str::<Value>(body).ok();
    if (200..300).contains(&status) {
        return Ok(parsed.unwrap_or(Value::Null));
    }
    let detail = parsed
        .as_ref()
        .and_then(|value| value.get("detail"))
        .and_then(Value::as_str)
        .map(String::from);
    Err(InvokeFailure::Server { status, detail })
}

fn data_text(payload: &Value) -> Option<String> {
    match payload.get("data")? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn rename_message(payload: &Value) -> String {
    data_text(payload)
        .or_else(|| {
            // Skipped files (e.g. `.DS_Store`) answer with `barcode_data` instead.
            payload
                .get("barcode_data")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| NO_CODE_DETECTED.to_string())
}

fn is_ready(payload: &Value) -> bool {
    payload.get("status").and_then(Value::as_str) == Some("ok")
        && payload.get("data").and_then(Value::as_str) == Some("ocr done")
}

fn folder_query(folder_id: Option<&str>) -> Vec<(&'static str, String)> {
    folder_id
        .map(|id| vec![("folder_id", id.to_string())])
        .unwrap_or_default()
}

/// Single-pass rename: POST `{file_pdf}` to the qrcode or barcode route.
pub struct RenameInvoker {
    client: Arc<HttpClient>,
    route: String,
}

impl RenameInvoker {
    pub fn new(client: Arc<HttpClient>, kind: ProcessKind, routes: &RouteConfig) -> Self {
        Self {
            client,
            route: kind.route(routes).to_string(),
        }
    }
}

#[async_trait]
impl RemoteInvoker for RenameInvoker {
    async fn invoke(&self, subject: &str) -> Result<String, InvokeFailure> {
        let response = self
            .client
            .post_json(&self.route, Some(json!({ "file_pdf": subject })))
            .await?;
        let payload = classify(response.status, &response.body)?;
        Ok(rename_message(&payload))
    }
}

/// Phase 1 of the two-layer workflow: hands one file to the OCR job.
pub struct UploadInvoker {
    client: Arc<HttpClient>,
    route: String,
    folder_id: Option<String>,
}

impl UploadInvoker {
    pub fn new(client: Arc<HttpClient>, routes: &RouteConfig, folder_id: Option<String>) -> Self {
        Self {
            client,
            route: routes.upload.clone(),
            folder_id,
        }
    }
}

#[async_trait]
impl RemoteInvoker for UploadInvoker {
    async fn invoke(&self, subject: &str) -> Result<String, InvokeFailure> {
        let body = match &self.folder_id {
            Some(folder_id) => json!({ "file_pdf": subject, "folder_id": folder_id }),
            None => json!({ "file_pdf": subject }),
        };
        let response = self.client.post_json(&self.route, Some(body)).await?;
        let payload = classify(response.status, &response.body)?;
        Ok(payload
            .get("data")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| UPLOADED.to_string()))
    }
}

/// Phase 2 of the two-layer workflow.
///
/// The server hands out one finished document per call, so the subject only
/// labels the ledger entry.
pub struct DownloadInvoker {
    client: Arc<HttpClient>,
    route: String,
    folder_id: Option<String>,
}

impl DownloadInvoker {
    pub fn new(client: Arc<HttpClient>, routes: &RouteConfig, folder_id: Option<String>) -> Self {
        Self {
            client,
            route: routes.download_file.clone(),
            folder_id,
        }
    }
}

#[async_trait]
impl RemoteInvoker for DownloadInvoker {
    async fn invoke(&self, _subject: &str) -> Result<String, InvokeFailure> {
        let response = self
            .client
            .get(&self.route, folder_query(self.folder_id.as_deref()))
            .await?;
        let payload = classify(response.status, &response.body)?;
        Ok(data_text(&payload)
            .map(|file| format!("Generated {}", file))
            .unwrap_or_else(|| GENERATED.to_string()))
    }
}

pub struct HttpGateService {
    client: Arc<HttpClient>,
    routes: RouteConfig,
}

impl HttpGateService {
    pub fn new(client: Arc<HttpClient>, routes: RouteConfig) -> Self {
        Self { client, routes }
    }
}

#[async_trait]
impl GateService for HttpGateService {
    async fn create_job(&self) -> Result<String> {
        let response = self.client.post_json(&self.routes.create_job, None).await?;
        let payload = classify(response.status, &response.body)?;
        let folder_id = payload
            .get("folder_id")
            .and_then(Value::as_str)
            .context("Job creation response has no folder_id")?;
        Ok(folder_id.to_string())
    }

    async fn check_ready(&self, context: &GateContext) -> Result<bool> {
        let query = vec![
            ("folder_id", context.job_id.clone()),
            ("total_files", context.expected_total.to_string()),
        ];
        let response = self.client.get(&self.routes.readiness, query).await?;
        let payload = classify(response.status, &response.body)?;
        Ok(is_ready(&payload))
    }

    async fn trigger_download(&self, context: &GateContext) -> Result<()> {
        let response = self
            .client
            .get(&self.routes.download_trigger, folder_query(Some(&context.job_id)))
            .await?;
        classify(response.status, &response.body)?;
        Ok(())
    }
}

/// Upload then download invokers of the two-layer workflow.
pub struct HttpPhaseInvokers {
    client: Arc<HttpClient>,
    routes: RouteConfig,
}

impl HttpPhaseInvokers {
    pub fn new(client: Arc<HttpClient>, routes: RouteConfig) -> Self {
        Self { client, routes }
    }
}

impl PhaseInvokers for HttpPhaseInvokers {
    fn phase1(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker> {
        let folder_id = gate.map(|context| context.job_id.clone());
        Arc::new(UploadInvoker::new(self.client.clone(), &self.routes, folder_id))
    }

    fn phase2(&self, gate: Option<&GateContext>) -> Arc<dyn RemoteInvoker> {
        let folder_id = gate.map(|context| context.job_id.clone());
        Arc::new(DownloadInvoker::new(self.client.clone(), &self.routes, folder_id))
    }
}
