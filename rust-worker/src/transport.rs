//! Submission endpoint client.
//!
//! Every send is one authenticated HTTPS request against the submission
//! endpoint, using the sending identity's own credential. The `Transport`
//! trait is the seam the dispatcher and controller are tested through.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::config::Config;
use crate::generate::SendRequest;

/// Per-send failure taxonomy. All of these are transient: they are
/// recorded in the outcome and never retried by the dispatcher.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("authentication rejected for '{address}'")]
    Auth { address: String },

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint rejected the message: HTTP {status}")]
    Endpoint { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("attachment read failed for '{path}': {source}")]
    Attachment {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One outbound authenticated send. Returns the message id the endpoint
/// assigned.
pub trait Transport {
    fn send(
        &self,
        request: &SendRequest,
    ) -> impl std::future::Future<Output = Result<String, SendError>> + Send;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    message_id: String,
}

/// HTTPS client for the submission endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut base = Url::parse(&config.submit_endpoint)
            .with_context(|| format!("Invalid submit endpoint '{}'", config.submit_endpoint))?;
        if base.scheme() != "https" {
            bail!("submit endpoint must use https: {base}");
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .pool_max_idle_per_host(config.send_concurrency)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base,
            timeout: Duration::from_millis(config.send_timeout_ms),
        })
    }

    /// Startup reachability check. Any HTTP answer counts; a connection
    /// failure here is fatal and aborts before the first batch.
    pub async fn validate(&self) -> Result<()> {
        let response = self
            .client
            .get(self.base.clone())
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("send endpoint unreachable: {}", self.base))?;

        info!(
            endpoint = %self.base,
            status = response.status().as_u16(),
            "endpoint_validated"
        );
        Ok(())
    }

    pub(crate) fn endpoint(&self, segment: &str) -> Result<Url, SendError> {
        self.base
            .join(segment)
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    pub(crate) fn classify(&self, error: reqwest::Error) -> SendError {
        if error.is_timeout() {
            SendError::Timeout(self.timeout)
        } else {
            SendError::Transport(error.to_string())
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    async fn attachment_part(&self, item: &crate::content::AttachmentRef) -> Result<multipart::Part, SendError> {
        let bytes = tokio::fs::read(&item.path).await.map_err(|source| SendError::Attachment {
            path: item.path.clone(),
            source,
        })?;
        let file_name = item
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment.bin".to_string());
        Ok(multipart::Part::bytes(bytes).file_name(file_name))
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &SendRequest) -> Result<String, SendError> {
        let url = self.endpoint("messages")?;

        let mut form = multipart::Form::new()
            .text(
                "from",
                format!("{} <{}>", request.from.display_name, request.from.address),
            )
            .text("subject", request.subject.clone())
            .text("body", request.body.clone());

        for address in &request.to {
            form = form.text("to", address.clone());
        }
        for address in &request.cc {
            form = form.text("cc", address.clone());
        }
        if let Some(origin) = &request.in_reply_to {
            form = form.text("in_reply_to", origin.clone());
        }
        if let Some(origin) = &request.references {
            form = form.text("references", origin.clone());
        }

        // Attachment bytes are read here, at send time; a failed read
        // fails this request only.
        for item in &request.attachments {
            form = form.part("attachment", self.attachment_part(item).await?);
        }
        if let Some(item) = &request.inline_image {
            form = form.part("inline", self.attachment_part(item).await?);
        }

        let response = self
            .client
            .post(url)
            .basic_auth(&request.from.address, Some(&request.from.credential))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SendError::Auth {
                address: request.from.address.clone(),
            });
        }
        if !status.is_success() {
            return Err(SendError::Endpoint {
                status: status.as_u16(),
            });
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SendError::Transport(format!("invalid endpoint response: {e}")))?;

        Ok(submitted.message_id)
    }
}
