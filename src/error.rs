/// Typed errors shared across the sync core.
///
/// Gateway failures are classified once, at the HTTP boundary, into an
/// `ErrorKind`. Everything downstream (the reconciler, the auth flows, the
/// dashboard notices) switches on that kind and never inspects message text.
use std::fmt;

// ── Gateway errors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, expired or rejected bearer token (401)
    Unauthorized,
    Forbidden,
    NotFound,
    /// Duplicate resource, e.g. an email that is already registered (409)
    Conflict,
    /// Request body rejected by the server (400 / 422)
    Validation,
    /// 5xx
    Server,
    /// No answer from the server at all
    Network,
    /// Answer arrived but was not what the contract promises
    Protocol,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            400 | 422 => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Protocol,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "invalid request",
            ErrorKind::Server => "server error",
            ErrorKind::Network => "network error",
            ErrorKind::Protocol => "unexpected response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    /// HTTP status when the server answered
    pub status: Option<u16>,
    pub message: String,
    /// `detail` field of a FastAPI-style error body, if present
    pub detail: Option<String>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            detail: None,
        }
    }

    /// Build from a non-success HTTP answer. The body is kept as the message,
    /// and a JSON `{"detail": "..."}` body is lifted into `detail`.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string));
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            message,
            detail,
        }
    }

    /// Message suitable for showing to the user: the server's `detail` when it
    /// gave one, otherwise the full error.
    pub fn user_message(&self) -> String {
        self.detail.clone().unwrap_or_else(|| self.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_decode() {
            ErrorKind::Protocol
        } else if let Some(status) = e.status() {
            ErrorKind::from_status(status.as_u16())
        } else {
            ErrorKind::Network
        };
        Self {
            kind,
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
            detail: None,
        }
    }
}

// ── Credential store errors ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    /// The write returned Ok but reading it back did not yield the same token
    #[error("credential was not durably saved")]
    NotDurable,
}

// ── Sync engine errors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("task title must not be empty")]
    EmptyTitle,
    /// The task only exists as an optimistic placeholder
    #[error("task {0} has not been saved yet")]
    NotPersisted(String),
    #[error("no task with id {0}")]
    UnknownTask(String),
    #[error("session is still being resolved")]
    SessionPending,
    #[error("not logged in")]
    Unauthenticated,
}

// ── Auth flow errors ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters long")]
    PasswordTooShort,
    #[error("Login failed. Please try again.")]
    EmptyToken,
    #[error("Login successful but authentication state could not be established. Please try again.")]
    NotDurable(#[source] CredentialError),
    #[error("Registration successful but login failed. Please try logging in.")]
    LoginAfterRegister(#[source] GatewayError),
    /// Server rejected the request; the message is chosen from the error kind
    #[error("{message}")]
    Rejected {
        message: String,
        #[source]
        source: GatewayError,
    },
}
