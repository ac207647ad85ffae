//! HTTP transport for generation streams.
//!
//! Issues one request per channel with `Accept: text/event-stream` and hands
//! the response body to the reader as an [`AsyncRead`](tokio::io::AsyncRead).

use std::io;

use futures_util::TryStreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::config::GlobalConfig;
use crate::models::request::{GenerationRequest, Pipeline};
use crate::stream::channel::{ByteStream, ConnectFuture, EventSource};
use crate::{AppError, Result};

#[derive(Debug, Serialize)]
struct RegenerateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

/// [`EventSource`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: Client,
    base_url: Url,
}

impl HttpEventSource {
    /// Build a source from the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the base URL is invalid, or
    /// `AppError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self::new(client, config.base_url()?))
    }

    /// Build a source from an existing client and base URL.
    #[must_use]
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Resolve the endpoint URL for `request`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the base URL cannot carry path segments.
    pub fn endpoint(&self, request: &GenerationRequest) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| AppError::Config("base_url cannot be a base".into()))?;
            segments.pop_if_empty();
            match request {
                GenerationRequest::Document {
                    project_id,
                    pipeline,
                    ..
                } => {
                    segments.extend(["projects", project_id.as_str(), "documents"]);
                    if *pipeline == Pipeline::Staged {
                        segments.push("staged");
                    }
                    segments.push("stream");
                }
                GenerationRequest::RegenerateSection {
                    artifact_id,
                    section_id,
                    ..
                } => {
                    segments.extend([
                        "artifacts",
                        artifact_id.as_str(),
                        "sections",
                        section_id.as_str(),
                        "regenerate",
                        "stream",
                    ]);
                }
            }
        }
        Ok(url)
    }

    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream> {
        request.validate()?;
        let url = self.endpoint(request)?;

        let builder = match request {
            GenerationRequest::Document { mode, .. } => self
                .client
                .get(url.clone())
                .query(&[("mode", mode.as_str())]),
            GenerationRequest::RegenerateSection { instructions, .. } => {
                self.client.post(url.clone()).json(&RegenerateBody {
                    instructions: instructions.as_deref(),
                })
            }
        };

        debug!(%url, "opening generation stream");
        let response = builder.header(ACCEPT, "text/event-stream").send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(AppError::Transport(format!(
                "HTTP {status} from {url}: {preview}"
            )));
        }

        info!(%url, %status, "generation stream opened");
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(body)))
    }
}

impl EventSource for HttpEventSource {
    fn connect<'a>(&'a self, request: &'a GenerationRequest) -> ConnectFuture<'a> {
        Box::pin(self.open(request))
    }
}
