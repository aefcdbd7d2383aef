//! REST side-channel.
//!
//! The chat socket is discovered over HTTP: `GET chats/{channel}` returns the
//! endpoints and the auth key for the `auth` method. The same API still
//! accepts `DELETE chats/{channel}/message/{id}`, which predates the
//! `deleteMessage` socket method.
//!
//! Connections only see the [`HttpDelete`] seam so tests can substitute it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::chat::{ChatError, ChatInfo};
use crate::constants;

/// HTTP collaborator used by the deprecated message delete.
#[async_trait]
pub trait HttpDelete: Send + Sync + std::fmt::Debug {
    /// Issue `DELETE {base}{path}`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Http`] if the request fails or the server does
    /// not answer with a success status.
    async fn delete(&self, path: &str) -> Result<(), ChatError>;
}

/// Client for the chat REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl RestClient {
    /// Create a client for `base_path` (e.g. `https://mixer.com/api/v1/`).
    ///
    /// A trailing `/` is added when missing so relative paths resolve below
    /// the base instead of replacing its last segment.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_path` is not a URL or the HTTP client cannot
    /// be built.
    pub fn new(base_path: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .user_agent(constants::USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, parse_base(base_path)?, token))
    }

    /// Create a client around a pre-configured `reqwest::Client`.
    pub fn with_client(client: Client, base: Url, token: Option<String>) -> Self {
        Self { client, base, token }
    }

    /// Base every request path is resolved against.
    pub fn base_path(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, ChatError> {
        self.base
            .join(path)
            .map_err(|e| ChatError::Http(format!("invalid request path '{path}': {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Look up the chat endpoints of `channel`.
    ///
    /// Without a token the server answers with endpoints only, enough for an
    /// anonymous join.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Http`] on transport failure or a non-success
    /// status, [`ChatError::Decode`] if the body is not chat metadata.
    pub async fn chat(&self, channel: u64) -> Result<ChatInfo, ChatError> {
        let url = self.url(&format!("chats/{channel}"))?;
        log::debug!("[RestClient] GET {}", url);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Http(format!(
                "chat lookup for channel {channel} failed: {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        let mut info: ChatInfo = serde_json::from_str(&body)?;
        info.channel = channel;
        log::info!(
            "[RestClient] Channel {} has {} chat endpoint(s)",
            channel,
            info.endpoints.len()
        );
        Ok(info)
    }
}

#[async_trait]
impl HttpDelete for RestClient {
    async fn delete(&self, path: &str) -> Result<(), ChatError> {
        let url = self.url(path)?;
        log::debug!("[RestClient] DELETE {}", url);

        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChatError::Http(format!(
                "DELETE {path} failed: {}",
                response.status()
            )))
        }
    }
}

fn parse_base(base_path: &str) -> Result<Url> {
    let normalized = if base_path.ends_with('/') {
        base_path.to_string()
    } else {
        format!("{base_path}/")
    };
    Url::parse(&normalized).with_context(|| format!("invalid base path: {base_path}"))
}
