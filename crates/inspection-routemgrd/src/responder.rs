//! Delivery of lifecycle responses.

use std::io::{self, Write};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info};

use crate::lifecycle::{LifecycleRequest, LifecycleResponse};

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("Request has no ResponseURL")]
    MissingUrl,

    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response URL rejected the response with status {status}")]
    Status { status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Where a lifecycle response goes.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(
        &self,
        request: &LifecycleRequest,
        response: &LifecycleResponse,
    ) -> Result<(), ResponseError>;
}

/// PUTs the response to the request's pre-signed `ResponseURL`.
#[derive(Debug, Clone, Default)]
pub struct HttpResponseSink {
    client: reqwest::Client,
}

impl HttpResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResponseSink for HttpResponseSink {
    async fn deliver(
        &self,
        request: &LifecycleRequest,
        response: &LifecycleResponse,
    ) -> Result<(), ResponseError> {
        let url = request
            .response_url
            .as_deref()
            .ok_or(ResponseError::MissingUrl)?;
        let body = serde_json::to_vec(response)?;
        debug!(bytes = body.len(), "Sending lifecycle response");

        // The pre-signed URL is signed without a content type.
        let reply = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await?;

        let status = reply.status();
        if !status.is_success() {
            return Err(ResponseError::Status {
                status: status.as_u16(),
            });
        }
        info!(status = status.as_u16(), "Lifecycle response delivered");
        Ok(())
    }
}

/// Prints the response as one JSON line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

#[async_trait]
impl ResponseSink for StdoutSink {
    async fn deliver(
        &self,
        _request: &LifecycleRequest,
        response: &LifecycleResponse,
    ) -> Result<(), ResponseError> {
        let line = serde_json::to_string(response)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}
