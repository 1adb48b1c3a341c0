//! HTTP client for the shared notes service.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::remote::NoteApi;
use sharednotes_common::{Error, Note, Result};

/// Default notes service.
pub const DEFAULT_SERVER_URL: &str = "https://sharednotes.goto.ucsd.edu";

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Characters escaped in a note name so it stays a single path segment.
const NAME_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'/').add(b'?').add(b'#').add(b'%');

/// Notes service client over HTTP.
///
/// Constructed explicitly and handed to the sync engine; clone the
/// surrounding `Arc` to share one connection pool.
pub struct HttpNoteApi {
    http: Client,
    base: Url,
}

impl HttpNoteApi {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - HTTP client construction failure
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with an explicit per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid server URL {}: {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                base.scheme()
            )));
        }

        let http = Client::builder()
            .user_agent(concat!("SharedNotes/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Get the server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Percent-encode a note name for use as a URL path segment.
    pub fn encode_name(name: &str) -> String {
        utf8_percent_encode(name, NAME_ENCODE_SET).to_string()
    }

    fn notes_url(&self) -> String {
        format!("{}/notes/", self.base.as_str().trim_end_matches('/'))
    }

    fn note_url(&self, name: &str) -> String {
        format!("{}{}", self.notes_url(), Self::encode_name(name))
    }

    /// Handle API response and parse a note from the body.
    async fn handle_response(&self, name: &str, response: reqwest::Response) -> Result<Note> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(request_error)?;
            let note = Note::from_json(&body)
                .map_err(|e| Error::MalformedResponse(format!("{}: {}", name, e)))?;
            if note.name != name {
                return Err(Error::MalformedResponse(format!(
                    "Asked for {} but server returned {}",
                    name, note.name
                )));
            }
            Ok(note)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!("Note not found on server: {}", name)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Transport(format!("API error: {} - {}", status, body)))
        }
    }
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::Transport(err.to_string())
    }
}

#[async_trait]
impl NoteApi for HttpNoteApi {
    async fn fetch(&self, name: &str) -> Result<Note> {
        let url = self.note_url(name);
        debug!("GET {}", url);

        let response = self.http.get(&url).send().await.map_err(request_error)?;

        self.handle_response(name, response).await
    }

    async fn store(&self, note: &Note) -> Result<String> {
        note.validate()?;
        let url = self.notes_url();
        debug!("POST {} ({})", url, note);

        let body = note.to_json()?;
        let response = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(Error::Transport(format!("API error: {} - {}", status, text)))
        }
    }
}
