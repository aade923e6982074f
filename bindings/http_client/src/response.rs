use anyhow::Context;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::Duration;

/// A fully read HTTP response, or the record of a request that never got one.
///
/// Transport failures such as refused connections and timeouts are not errors here. They produce
/// a response with status `0` and an [HttpResponse::error] message, so that a failed request is
/// counted and the iteration can carry on.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    body: Vec<u8>,
    duration: Duration,
    error: Option<String>,
}

impl HttpResponse {
    pub(crate) fn new(status: u16, body: Vec<u8>, duration: Duration) -> Self {
        Self {
            status,
            body,
            duration,
            error: None,
        }
    }

    pub(crate) fn transport_error(error: String, duration: Duration) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            duration,
            error: Some(error),
        }
    }

    /// The HTTP status code, or `0` if no response was received.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for a status in `200..=399`. Everything else, including transport failures, is
    /// recorded as a failed request.
    pub fn is_expected_status(&self) -> bool {
        (200..=399).contains(&self.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_slice(&self.body).with_context(|| {
            format!(
                "Response body with status {} is not the expected JSON",
                self.status
            )
        })
    }

    /// Time from sending the request until the body was read, or until the request failed.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Why no response was received.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
