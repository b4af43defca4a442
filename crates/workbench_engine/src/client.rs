use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::CONTENT_TYPE;

use crate::types::{
    ChatReply, ChatRequest, DatasetRecord, PreprocessApplyRequest, RagQueryRequest, RagReply,
    ReportCreateRequest, ReportReply, SchemaSample, StageError, StageErrorKind, UploadPayload,
};

/// Engine configuration. There is deliberately no total request deadline:
/// a hung stage call keeps the run alive until the user cancels.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Pacing tick of the streamed-turn display loop.
    pub pacing_interval: Duration,
    /// Characters released from the pending queue per pacing tick.
    pub pacing_chars: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            pacing_interval: Duration::from_millis(30),
            pacing_chars: 2,
        }
    }
}

/// Sink for upload transfer progress, emitted per body chunk.
pub trait UploadProgress: Send + Sync {
    fn emit(&self, percent: u8);
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StageError>> + Send>>;

/// The remote operations the pipeline consumes. Object-safe so tests and the
/// engine can swap the transport.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    async fn upload(
        &self,
        source: UploadPayload,
        progress: Arc<dyn UploadProgress>,
    ) -> Result<DatasetRecord, StageError>;

    async fn fetch_sample(&self, source_id: &str) -> Result<SchemaSample, StageError>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, StageError>;

    /// Streaming form of [`BackendClient::chat`]; yields the raw SSE bytes.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, StageError>;

    /// `Ok(None)` when the backend answers 204 (nothing matched).
    async fn rag_query(&self, request: &RagQueryRequest) -> Result<Option<RagReply>, StageError>;

    async fn apply_preprocess(&self, request: &PreprocessApplyRequest) -> Result<(), StageError>;

    async fn create_report(&self, request: &ReportCreateRequest) -> Result<ReportReply, StageError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    settings: BackendSettings,
    client: reqwest::Client,
}

const UPLOAD_CHUNK: usize = 64 * 1024;

impl HttpBackendClient {
    pub fn new(settings: BackendSettings) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| StageError::new(StageErrorKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, StageError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| StageError::new(StageErrorKind::InvalidRequest, err.to_string()))?;
        self.client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(map_reqwest_error)
    }
}

#[async_trait::async_trait]
impl BackendClient for HttpBackendClient {
    async fn upload(
        &self,
        source: UploadPayload,
        progress: Arc<dyn UploadProgress>,
    ) -> Result<DatasetRecord, StageError> {
        let total = source.content.len().max(1);
        let mut sent = 0usize;
        let chunks: Vec<(Bytes, u8)> = source
            .content
            .chunks(UPLOAD_CHUNK)
            .map(|chunk| {
                sent += chunk.len();
                let percent = (sent * 100 / total).min(100) as u8;
                (Bytes::copy_from_slice(chunk), percent)
            })
            .collect();
        let content_len = source.content.len() as u64;

        progress.emit(0);
        let body_stream = futures_util::stream::iter(chunks.into_iter().map(move |(chunk, pct)| {
            // Emitted lazily as reqwest polls the body, so the percentage
            // tracks actual transfer.
            progress.emit(pct);
            Ok::<Bytes, std::io::Error>(chunk)
        }));
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body_stream),
            content_len,
        )
        .file_name(source.file_name.clone())
        .mime_str(&source.content_type)
        .map_err(|err| StageError::new(StageErrorKind::InvalidRequest, err.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/datasets/"))
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_json(response).await
    }

    async fn fetch_sample(&self, source_id: &str) -> Result<SchemaSample, StageError> {
        let response = self
            .client
            .get(self.url(&format!("/datasets/{source_id}/sample")))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_json(response).await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, StageError> {
        let response = self.post_json("/chats/", request).await?;
        decode_json(response).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, StageError> {
        let response = self.post_json("/chats/stream", request).await?;
        let response = check_status(response).await?;
        Ok(Box::pin(response.bytes_stream().map_err(map_reqwest_error)))
    }

    async fn rag_query(&self, request: &RagQueryRequest) -> Result<Option<RagReply>, StageError> {
        let response = self.post_json("/rag/query", request).await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode_json(response).await.map(Some)
    }

    async fn apply_preprocess(&self, request: &PreprocessApplyRequest) -> Result<(), StageError> {
        let response = self.post_json("/preprocess/apply", request).await?;
        check_status(response).await.map(|_| ())
    }

    async fn create_report(&self, request: &ReportCreateRequest) -> Result<ReportReply, StageError> {
        let response = self.post_json("/report/", request).await?;
        decode_json(response).await
    }
}

/// Surface the backend's JSON `detail` field on non-2xx, else `HTTP <code>`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let detail = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str().map(String::from)));
    let message = detail.unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(StageError::new(
        StageErrorKind::HttpStatus(status.as_u16()),
        message,
    ))
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, StageError> {
    let response = check_status(response).await?;
    let body = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&body)
        .map_err(|err| StageError::new(StageErrorKind::Protocol, err.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> StageError {
    if err.is_timeout() {
        return StageError::new(StageErrorKind::Timeout, err.to_string());
    }
    StageError::new(StageErrorKind::Network, err.to_string())
}
