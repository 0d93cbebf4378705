//! HTTP client for the remote note service.
//!
//! The service exposes one resource per note:
//! - `GET  {base}/notes/{title}` returns the note as JSON, or 404
//! - `PUT  {base}/notes/{title}` with `{"content": ..., "version": ...}`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::RemoteError;
use super::remote::RemoteClient;
use crate::config::Config;
use crate::models::Note;

/// Note as returned by the server.
#[derive(Debug, Deserialize)]
struct NoteResponse {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    updated_at: Option<String>,
}

impl From<NoteResponse> for Note {
    fn from(response: NoteResponse) -> Self {
        let updated_at = response
            .updated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Note {
            title: response.title,
            content: response.content,
            version: response.version,
            updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct PutNoteRequest<'a> {
    content: &'a str,
    version: u64,
}

/// [`RemoteClient`] speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNoteClient {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Creates a client from config.
    ///
    /// Returns an error if no server URL is configured.
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        let base_url = config
            .server_url
            .value
            .clone()
            .ok_or(RemoteError::NotConfigured)?;
        Self::new(base_url, config.request_timeout())
    }

    /// Builds the resource URL for a note, percent-encoding the title.
    fn note_url(&self, title: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        format!("{}/notes/{}", base, urlencoding::encode(title))
    }
}

#[async_trait]
impl RemoteClient for HttpNoteClient {
    async fn fetch(&self, title: &str) -> Result<Option<Note>, RemoteError> {
        let response = self.client.get(self.note_url(title)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let note: NoteResponse = response.json().await?;
                Ok(Some(note.into()))
            }
            status => Err(RemoteError::Status(status.as_u16())),
        }
    }

    async fn put(&self, note: &Note) -> Result<(), RemoteError> {
        let body = PutNoteRequest {
            content: &note.content,
            version: note.version,
        };

        let response = self
            .client
            .put(self.note_url(&note.title))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}
