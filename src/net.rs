//! Remote tutoring service workflow
//!
//! `TutorApi` drives the per-question exchange over the narrow HTTP
//! contract: validate the session cookie, refresh credentials when it has
//! expired, upload the captured frame, poll the question status and download
//! the synthesized answer. `HttpGateway` binds the contract to a real
//! service over reqwest.

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::hal::{Frame, HttpClient, HttpResponse, NvsStore};

/// NVS keys for the persisted account state
pub const EMAIL_KEY: &str = "user_email";
pub const PASSWORD_KEY: &str = "user_pass";
pub const COOKIE_KEY: &str = "session_cookie";

/// Outcome of a session validation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// Cookie accepted
    Valid,
    /// Cookie missing or expired; log in again
    AuthRequired,
    /// Account is not allowed to submit; abort to the home menu
    Forbidden,
    /// Service hiccup; retry within the caller's bound
    Transient,
}

/// Question status strings the service reports
pub mod question_status {
    pub const ANSWERED: &str = "answered";
    pub const PENDING: &str = "pending";
    pub const UNANSWERED: &str = "unanswered";
}

/// Per-question state owned by the state machine
#[derive(Debug, Default, Clone)]
pub struct RemoteSession {
    pub email: Option<String>,
    pub password: Option<String>,
    pub cookie: Option<String>,
    pub doc_id: Option<String>,
    pub tts_key: Option<String>,
    pub status: Option<String>,
}

impl RemoteSession {
    /// Load persisted credentials and cookie; missing keys stay `None` and
    /// store failures are logged, never fatal.
    pub fn load(nvs: &dyn NvsStore) -> Self {
        let read = |key: &str| match nvs.read_string(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Session: failed to read {}: {}", key, e);
                None
            }
        };
        Self {
            email: read(EMAIL_KEY),
            password: read(PASSWORD_KEY),
            cookie: read(COOKIE_KEY),
            doc_id: None,
            tts_key: None,
            status: None,
        }
    }

    /// Drop per-question state, keeping account credentials
    pub fn clear_question(&mut self) {
        self.doc_id = None;
        self.tts_key = None;
        self.status = None;
    }
}

/// The question workflow over the HTTP contract
pub struct TutorApi {
    http: Arc<dyn HttpClient>,
}

impl TutorApi {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// GET /validate-session with the stored cookie
    pub fn validate(&self, session: &RemoteSession) -> Result<SessionCheck, EngineError> {
        let response = self
            .http
            .get("/validate-session", &[], session.cookie.as_deref())?;

        let check = match response.status {
            200 => SessionCheck::Valid,
            400 | 401 => SessionCheck::AuthRequired,
            403 => SessionCheck::Forbidden,
            status => {
                tracing::warn!("Session: unexpected validate status {}", status);
                SessionCheck::Transient
            }
        };
        Ok(check)
    }

    /// POST /login-student with the stored credentials; on success the new
    /// session cookie is stored on the session and persisted to NVS.
    pub fn login(
        &self,
        session: &mut RemoteSession,
        nvs: &dyn NvsStore,
    ) -> Result<bool, EngineError> {
        let (email, password) = match (&session.email, &session.password) {
            (Some(email), Some(password)) => (email.clone(), password.clone()),
            _ => {
                tracing::error!("Session: no stored credentials, cannot log in");
                return Ok(false);
            }
        };

        let response = self
            .http
            .post("/login-student", &[("email", &email), ("password", &password)])?;

        if response.status != 200 {
            tracing::warn!("Session: login rejected with status {}", response.status);
            return Ok(false);
        }

        match response.set_cookie {
            Some(cookie) => {
                if let Err(e) = nvs.write_string(COOKIE_KEY, &cookie) {
                    tracing::warn!("Session: failed to persist cookie: {}", e);
                }
                session.cookie = Some(cookie);
                tracing::info!("Session: logged in, cookie refreshed");
                Ok(true)
            }
            None => {
                tracing::warn!("Session: login succeeded but no cookie was issued");
                Ok(false)
            }
        }
    }

    /// Upload the captured frame. Success is HTTP 200 or 409 (the service
    /// reports 409 for a duplicate of a frame it already holds); either way
    /// the response body carries the document id for polling.
    pub fn upload_frame(
        &self,
        frame: &Frame,
        session: &mut RemoteSession,
    ) -> Result<u16, EngineError> {
        let response = self
            .http
            .send_image(&frame.bytes, session.cookie.as_deref())?;

        if response.status == 200 || response.status == 409 {
            session.doc_id = parse_json_field(&response.body, "documentId");
            if session.doc_id.is_none() {
                tracing::warn!("Session: upload accepted but no documentId in response");
            }
        }
        Ok(response.status)
    }

    /// GET /question-status for the current document
    pub fn poll_status(&self, session: &mut RemoteSession) -> Result<String, EngineError> {
        let doc_id = session.doc_id.clone().ok_or_else(|| {
            EngineError::network_transport("No document id to poll".to_string())
        })?;

        let response = self.http.get(
            "/question-status",
            &[("documentId", &doc_id)],
            session.cookie.as_deref(),
        )?;

        if response.status != 200 {
            return Err(EngineError::Network {
                status: response.status,
                message: "Question status poll failed".to_string(),
            });
        }

        let status = parse_json_field(&response.body, "status").ok_or_else(|| {
            EngineError::network_transport("Question status missing from response")
        })?;
        if status == question_status::ANSWERED {
            session.tts_key = parse_json_field(&response.body, "ttsKey");
        }
        session.status = Some(status.clone());
        Ok(status)
    }

    /// Download the synthesized answer as 16-bit mono PCM
    pub fn download_tts(&self, session: &RemoteSession) -> Result<Vec<i16>, EngineError> {
        let key = session.tts_key.clone().ok_or_else(|| {
            EngineError::network_transport("No TTS key to download".to_string())
        })?;

        let bytes = self.http.download("/download-tts", &[("key", &key)])?;
        if bytes.is_empty() {
            return Err(EngineError::network_transport("Empty TTS download"));
        }

        // Little-endian i16 frames; a trailing odd byte is dropped
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(samples)
    }
}

/// Pull a string field out of a JSON response body
fn parse_json_field(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get(field)?.as_str().map(str::to_string)
}

/// reqwest-backed implementation of the HTTP contract
pub struct HttpGateway {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Result<Self, EngineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn into_response(response: reqwest::blocking::Response) -> Result<HttpResponse, EngineError> {
        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Ok(HttpResponse {
            status,
            body,
            set_cookie,
        })
    }
}

impl HttpClient for HttpGateway {
    fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<HttpResponse, EngineError> {
        let mut request = self.client.get(self.url(path)).query(query);
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request
            .send()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Self::into_response(response)
    }

    fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<HttpResponse, EngineError> {
        let response = self
            .client
            .post(self.url(path))
            .form(form)
            .send()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Self::into_response(response)
    }

    fn download(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, EngineError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Network {
                status: response.status().as_u16(),
                message: "Download failed".to_string(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn send_image(&self, bytes: &[u8], cookie: Option<&str>) -> Result<HttpResponse, EngineError> {
        let part = reqwest::blocking::multipart::Part::bytes(bytes.to_vec())
            .file_name("question.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part("image", part);

        let mut request = self
            .client
            .post(self.url("/submit-question"))
            .multipart(form);
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request
            .send()
            .map_err(|e| EngineError::network_transport(e.to_string()))?;
        Self::into_response(response)
    }
}
