use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::provider::{Artifact, ProgressReporter, ProviderError, VideoProvider};
use crate::runtime::types::TaskRequest;

/// Public Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Video model used when none is configured.
pub const DEFAULT_MODEL: &str = "veo-2.0-generate-001";

/// Delay between operation status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`VeoProvider`].
#[derive(Debug, Clone)]
pub struct VeoConfig {
    /// API root, without trailing slash (default: [`DEFAULT_BASE_URL`]).
    pub base_url: String,
    /// Model id (default: [`DEFAULT_MODEL`]).
    pub model: String,
    /// Delay between status polls of the long-running operation.
    pub poll_interval: Duration,
    /// When set, the finished video is downloaded here and the artifact points
    /// at the local file. Otherwise the artifact is the provider's content URI.
    pub output_dir: Option<PathBuf>,
}

impl Default for VeoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            output_dir: None,
        }
    }
}

/// Gemini API video generation over REST.
///
/// Flow: start a long-running `predictLongRunning` operation, poll it until
/// `done`, then resolve the first generated sample.
#[derive(Debug, Clone)]
pub struct VeoProvider {
    config: VeoConfig,
    client: Client,
}

impl VeoProvider {
    pub fn new(config: VeoConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("vidgen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn start_operation(&self, request: &TaskRequest) -> Result<String, ProviderError> {
        let url = self.endpoint(&format!("models/{}:predictLongRunning", self.config.model));
        let body = request_body(request);

        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, request.credential())
            .json(&body)
            .send()
            .await?;
        let json = read_json(resp).await?;

        json.get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::MalformedResponse {
                message: "operation name missing from generation response".into(),
            })
    }

    async fn poll_operation(
        &self,
        name: &str,
        credential: &str,
        progress: &ProgressReporter,
    ) -> Result<Value, ProviderError> {
        let url = self.endpoint(name);
        let mut polls: u32 = 0;

        loop {
            let resp = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, credential)
                .send()
                .await?;
            let operation = read_json(resp).await?;
            polls += 1;

            if operation.get("done").and_then(Value::as_bool).unwrap_or(false) {
                debug!(operation = name, polls, "operation done");
                return Ok(operation);
            }

            progress.report(format!(
                "Generating video... still working (check #{polls}). This may take a few minutes."
            ));
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn download(
        &self,
        uri: &str,
        credential: &str,
        operation_name: &str,
        dir: &Path,
    ) -> Result<PathBuf, ProviderError> {
        let resp = self
            .client
            .get(uri)
            .header(API_KEY_HEADER, credential)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("create output dir: {e}")))?;

        let operation_id = operation_name.rsplit('/').next().unwrap_or(operation_name);
        let path = dir.join(format!("vidgen-{operation_id}.mp4"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ProviderError::Other(anyhow::anyhow!("write {}: {e}", path.display())))?;

        info!(path = %path.display(), bytes = bytes.len(), "video downloaded");
        Ok(path)
    }
}

#[async_trait]
impl VideoProvider for VeoProvider {
    fn name(&self) -> &str {
        "veo"
    }

    async fn generate(
        &self,
        request: &TaskRequest,
        progress: ProgressReporter,
    ) -> Result<Artifact, ProviderError> {
        debug!(
            resolution = %request.resolution(),
            sound_enabled = request.sound_enabled(),
            "resolution and sound are not transmitted to the provider"
        );

        progress.report("Submitting generation request...");
        let operation_name = self.start_operation(request).await?;
        info!(operation = %operation_name, model = %self.config.model, "generation operation started");

        let operation = self
            .poll_operation(&operation_name, request.credential(), &progress)
            .await?;
        let uri = video_uri(&operation)?;

        match &self.config.output_dir {
            Some(dir) => {
                progress.report("Downloading generated video...");
                let path = self
                    .download(&uri, request.credential(), &operation_name, dir)
                    .await?;
                Ok(Artifact::new(path.display().to_string()))
            }
            None => Ok(Artifact::new(uri)),
        }
    }
}

/// JSON body for `predictLongRunning`.
///
/// Resolution and sound have no field in the documented request and are left
/// out.
pub(crate) fn request_body(request: &TaskRequest) -> Value {
    let mut instance = json!({ "prompt": request.prompt() });
    if let Some(image) = request.reference_image() {
        instance["image"] = json!({
            "bytesBase64Encoded": image.encoded_bytes(),
            "mimeType": image.media_type(),
        });
    }

    json!({
        "instances": [instance],
        "parameters": {
            "aspectRatio": request.aspect_ratio().to_string(),
            "sampleCount": 1,
        }
    })
}

/// Pull the first sample URI out of a finished operation.
pub(crate) fn video_uri(operation: &Value) -> Result<String, ProviderError> {
    if let Some(error) = operation.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider reported an error without a message");
        return Err(ProviderError::GenerationFailed {
            message: message.to_owned(),
        });
    }

    let response = operation
        .pointer("/response/generateVideoResponse")
        .ok_or_else(|| ProviderError::MalformedResponse {
            message: "finished operation has no generateVideoResponse".into(),
        })?;

    if let Some(uri) = response
        .pointer("/generatedSamples/0/video/uri")
        .and_then(Value::as_str)
    {
        return Ok(uri.to_owned());
    }

    let reasons: Vec<&str> = response
        .get("raiMediaFilteredReasons")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if reasons.is_empty() {
        Err(ProviderError::MalformedResponse {
            message: "finished operation contains no generated video".into(),
        })
    } else {
        warn!(?reasons, "generation filtered by provider");
        Err(ProviderError::GenerationFailed {
            message: reasons.join("; "),
        })
    }
}

async fn check_status(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized {
            status: status.as_u16(),
            message,
        }),
        _ => Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        }),
    }
}

async fn read_json(resp: Response) -> Result<Value, ProviderError> {
    let resp = check_status(resp).await?;
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::MalformedResponse {
        message: format!("invalid JSON: {e}"),
    })
}

/// Prefer the API's `error.message`; otherwise a trimmed copy of the body.
fn error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(m) = v.pointer("/error/message").and_then(Value::as_str) {
            return m.to_owned();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_owned();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
