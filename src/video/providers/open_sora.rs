//! Open-Sora adapter (Hugging Face Space, Gradio call API).

use crate::error::{
    parse_retry_after, redact_secrets, sanitize_error_message, ProviderError, Result,
};
use crate::video::provider::{billed_result, VideoProvider};
use crate::video::types::{
    AspectRatio, ProviderId, VideoGenerationRequest, VideoGenerationResult, VideoMetadata,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Gradio endpoint that runs image-to-video inference.
const API_NAME: &str = "run_inference";

/// Economy tier renders at the Space's lowest resolution.
const RESOLUTION: &str = "360p";

/// Builder for [`OpenSoraProvider`].
#[derive(Debug, Clone)]
pub struct OpenSoraProviderBuilder {
    token: Option<String>,
    space_url: String,
    timeout: Duration,
}

impl Default for OpenSoraProviderBuilder {
    fn default() -> Self {
        Self {
            token: None,
            space_url: crate::config::DEFAULT_OPEN_SORA_SPACE.to_string(),
            timeout: ProviderId::OpenSora.spec().default_timeout,
        }
    }
}

impl OpenSoraProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Hugging Face access token (`HF_TOKEN`).
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the Space base URL.
    pub fn space_url(mut self, url: impl Into<String>) -> Self {
        self.space_url = url.into();
        self
    }

    /// Sets the maximum time to wait for the result stream.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the adapter.
    pub fn build(self) -> Result<OpenSoraProvider> {
        let token = self
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::Auth("HF_TOKEN not set".into()))?;

        Ok(OpenSoraProvider {
            client: reqwest::Client::new(),
            token,
            space_url: self.space_url.trim_end_matches('/').to_string(),
            timeout: self.timeout,
        })
    }
}

/// Open-Sora on a Hugging Face Space. Free tier: every result costs zero.
#[derive(Debug)]
pub struct OpenSoraProvider {
    client: reqwest::Client,
    token: String,
    space_url: String,
    timeout: Duration,
}

impl OpenSoraProvider {
    /// Creates a new [`OpenSoraProviderBuilder`].
    pub fn builder() -> OpenSoraProviderBuilder {
        OpenSoraProviderBuilder::new()
    }

    fn call_url(&self) -> String {
        format!("{}/call/{}", self.space_url, API_NAME)
    }

    fn parse_error(&self, status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ProviderError {
        let text = redact_secrets(text);
        match status {
            401 | 403 => ProviderError::Auth(text),
            429 => ProviderError::RateLimited {
                retry_after: parse_retry_after(headers).map(Duration::from_secs),
            },
            404 => ProviderError::InvalidRequest(format!(
                "Space endpoint /call/{API_NAME} not found: {text}"
            )),
            400 | 422 => ProviderError::InvalidRequest(text),
            _ => ProviderError::Api {
                status,
                message: text,
            },
        }
    }

    async fn error_from(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        self.parse_error(status, &text, &headers)
    }

    /// Queues the call and returns its event id.
    async fn submit(&self, body: &GradioCallRequest) -> Result<String> {
        let response = self
            .client
            .post(self.call_url())
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        let call: GradioCallResponse = response.json().await?;
        Ok(call.event_id)
    }

    /// Reads the event stream to its terminal event.
    async fn await_result(&self, event_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{}", self.call_url(), event_id))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        let body = response.text().await?;
        parse_event_stream(&body)
    }
}

/// Extracts the payload of the `complete` event from a Gradio SSE body.
fn parse_event_stream(body: &str) -> Result<Value> {
    let mut event = "";
    for line in body.lines() {
        let line = line.trim_end();
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim();
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            match event {
                "complete" => return Ok(serde_json::from_str(data)?),
                "error" => {
                    let message = serde_json::from_str::<Value>(data)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "Open-Sora Space reported an error".to_string());
                    let lower = message.to_lowercase();
                    if lower.contains("quota") || lower.contains("too many") {
                        return Err(ProviderError::RateLimited { retry_after: None });
                    }
                    return Err(ProviderError::VideoGeneration(redact_secrets(&message)));
                }
                _ => {}
            }
        }
    }
    Err(ProviderError::UnexpectedResponse(
        "event stream ended without a complete event".into(),
    ))
}

/// Finds the video URL in the `complete` payload.
///
/// Gradio wraps video outputs as a plain URL string, a FileData object
/// (`url`/`path`), or `{ "video": FileData }`.
fn extract_video_url(space_url: &str, payload: &Value) -> Result<String> {
    fn locate(space_url: &str, value: &Value) -> Option<String> {
        match value {
            Value::String(s) if s.starts_with("http") => Some(s.clone()),
            Value::Array(items) => items.iter().find_map(|v| locate(space_url, v)),
            Value::Object(map) => {
                if let Some(url) = map.get("url").and_then(Value::as_str) {
                    if !url.is_empty() {
                        return Some(url.to_string());
                    }
                }
                if let Some(path) = map.get("path").and_then(Value::as_str) {
                    if !path.is_empty() {
                        return Some(format!("{space_url}/file={path}"));
                    }
                }
                map.get("video").and_then(|v| locate(space_url, v))
            }
            _ => None,
        }
    }

    locate(space_url, payload)
        .ok_or_else(|| ProviderError::EmptyResult(sanitize_error_message(&payload.to_string())))
}

#[async_trait]
impl VideoProvider for OpenSoraProvider {
    async fn generate(&self, request: &VideoGenerationRequest) -> Result<VideoGenerationResult> {
        let start = Instant::now();
        let submitted_secs = ProviderId::OpenSora.spec().duration.apply(request.duration_secs);
        let image_url = request.image.to_remote_url().await?;
        let body = GradioCallRequest::image_to_video(
            &request.prompt,
            &image_url,
            request.aspect_ratio,
            submitted_secs,
        );

        let event_id = self.submit(&body).await?;
        tracing::debug!(
            provider = %ProviderId::OpenSora,
            request_id = %event_id,
            duration_secs = submitted_secs,
            "queued Open-Sora call"
        );

        let payload = self.await_result(&event_id).await?;
        let video_url = extract_video_url(&self.space_url, &payload)?;

        billed_result(
            ProviderId::OpenSora,
            video_url,
            submitted_secs,
            request.with_audio,
            VideoMetadata {
                model: Some(ProviderId::OpenSora.spec().model.to_string()),
                job_id: Some(event_id),
                elapsed_ms: Some(start.elapsed().as_millis() as u64),
            },
        )
    }

    fn id(&self) -> ProviderId {
        ProviderId::OpenSora
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/config", self.space_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(ProviderError::Auth("HF_TOKEN rejected".into())),
            s if s >= 500 => Err(ProviderError::Api {
                status: s,
                message: "Open-Sora Space is not running".into(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize)]
struct GradioCallRequest {
    data: Vec<Value>,
}

impl GradioCallRequest {
    /// Positional inputs: prompt, resolution, aspect ratio, length, reference image.
    fn image_to_video(prompt: &str, image_url: &str, aspect: AspectRatio, secs: u32) -> Self {
        Self {
            data: vec![
                json!(prompt),
                json!(RESOLUTION),
                json!(aspect.as_str()),
                json!(format!("{secs}s")),
                json!({ "url": image_url, "meta": { "_type": "gradio.FileData" } }),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GradioCallResponse {
    event_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACE: &str = "https://hpcai-tech-open-sora.hf.space";

    #[test]
    fn test_builder() {
        assert!(matches!(
            OpenSoraProviderBuilder::new().build(),
            Err(ProviderError::Auth(_))
        ));

        let provider = OpenSoraProvider::builder()
            .token("hf_test")
            .space_url("https://example.hf.space/")
            .build()
            .unwrap();
        assert_eq!(provider.call_url(), "https://example.hf.space/call/run_inference");
        assert_eq!(provider.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_request_body() {
        let body = GradioCallRequest::image_to_video(
            "A calm lake",
            "https://x/lake.png",
            AspectRatio::Portrait,
            ProviderId::OpenSora.spec().duration.apply(10),
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["data"][0], "A calm lake");
        assert_eq!(json["data"][2], "9:16");
        assert_eq!(json["data"][3], "4s");
        assert_eq!(json["data"][4]["url"], "https://x/lake.png");
        assert_eq!(json["data"][4]["meta"]["_type"], "gradio.FileData");
    }

    #[test]
    fn test_parse_event_stream_complete() {
        let body = "event: generating\ndata: null\n\n\
                    event: complete\n\
                    data: [{\"video\": {\"path\": \"/tmp/gradio/out.mp4\", \"url\": \"https://space/file=/tmp/gradio/out.mp4\"}, \"subtitles\": null}]\n\n";
        let payload = parse_event_stream(body).unwrap();
        assert_eq!(
            extract_video_url(SPACE, &payload).unwrap(),
            "https://space/file=/tmp/gradio/out.mp4"
        );
    }

    #[test]
    fn test_parse_event_stream_errors() {
        let err = parse_event_stream("event: error\ndata: null\n\n").unwrap_err();
        assert!(matches!(err, ProviderError::VideoGeneration(_)));

        let err = parse_event_stream(
            "event: error\ndata: \"You have exceeded your GPU quota (60s requested vs. 12s left).\"\n\n",
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));

        let err = parse_event_stream("event: heartbeat\ndata: null\n\n").unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_extract_video_url_shapes() {
        let url = extract_video_url(SPACE, &json!(["https://cdn/x.mp4"])).unwrap();
        assert_eq!(url, "https://cdn/x.mp4");

        let url = extract_video_url(SPACE, &json!([{ "path": "/tmp/out.mp4", "url": null }])).unwrap();
        assert_eq!(url, format!("{SPACE}/file=/tmp/out.mp4"));

        let err = extract_video_url(SPACE, &json!([null])).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResult(_)));
    }

    #[test]
    fn test_parse_error() {
        let provider = OpenSoraProvider::builder().token("hf_test").build().unwrap();
        let headers = reqwest::header::HeaderMap::new();

        assert!(matches!(
            provider.parse_error(401, "Invalid credentials in Authorization header", &headers),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            provider.parse_error(404, "Not Found", &headers),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            provider.parse_error(429, "slow down", &headers),
            ProviderError::RateLimited { .. }
        ));
        let err = provider.parse_error(503, "Space is sleeping", &headers);
        assert!(err.is_transient());
    }
}
