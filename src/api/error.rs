use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Transport failure: DNS, refused connection, timeout, broken body.
    #[error("cannot reach portal: {0}")]
    ConnectError(String),
    /// Credentials rejected. Not retried until the credentials change.
    #[error("authentication failed: {0}")]
    AuthError(String),
    #[error("session expired")]
    SessionExpired,
    #[error("unexpected portal response: {0}")]
    ParseError(String),
    /// Non-authentication HTTP failure, e.g. a 5xx.
    #[error("portal error: {0}")]
    ApiError(String),
    #[error("a poll cycle is already running")]
    Busy,
    #[error("poll cycle cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Coarse classification the host surfaces to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Connect,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthError(_) => ErrorKind::Auth,
            Error::ConnectError(_) => ErrorKind::Connect,
            _ => ErrorKind::Other,
        }
    }
}

/// Aggregate error surfaced by a poll cycle once internal retries are exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct PollError {
    /// User number of the tenant whose cycle failed, `None` for cycle-wide failures.
    pub tenant: Option<String>,
    pub cause: Error,
}

impl PollError {
    pub fn new(tenant: Option<String>, cause: Error) -> Self {
        PollError { tenant, cause }
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "poll failed for tenant {}: {}", tenant, self.cause),
            None => write!(f, "poll failed: {}", self.cause),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl From<Error> for PollError {
    fn from(cause: Error) -> Self {
        PollError::new(None, cause)
    }
}

fn html(status: Status, title: &str, detail: String) -> response::Result<'static> {
    let body = format!(
        "<html><body><h3>{}</h3>Downstream portal: <code>{}</code></body></html>",
        title,
        html_escape::encode_text(&detail)
    );
    Response::build()
        .status(status)
        .sized_body(body.len(), Cursor::new(body))
        .header(ContentType::new("text", "html"))
        .ok()
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::AuthError(s) => html(Status::Forbidden, "403 Forbidden", s),
            Error::ConnectError(s) => html(Status::BadGateway, "502 Bad Gateway", s),
            Error::Busy => html(
                Status::TooManyRequests,
                "429 Too Many Requests",
                self.to_string(),
            ),
            _ => html(
                Status::InternalServerError,
                "Unknown exception",
                format!("{:?}", self),
            ),
        }
    }
}

impl<'r> Responder<'r, 'static> for PollError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        self.cause.respond_to(request)
    }
}
