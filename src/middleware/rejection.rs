//! Typed rejection outcomes rendered as HTTP responses.

use std::fmt;

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};

/// An outcome that ends the request before it reaches the protected service.
///
/// `message` is sent to the client; `internal` only appears in the
/// middleware's `debug` log of the rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
    pub internal: Option<String>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            internal: None,
        }
    }

    /// Attach detail for the logs.
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = Some(internal.into());
        self
    }

    /// The identifier is over budget.
    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
    }

    /// No usable identifier could be derived from the request.
    pub fn forbidden(internal: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "error while extracting identifier").with_internal(internal)
    }

    /// The store could not make a decision.
    pub fn service_unavailable(internal: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "rate limiter unavailable")
            .with_internal(internal)
    }

    /// Render as a JSON response. Internal detail never reaches the body.
    pub fn into_response<B>(self) -> Response<B>
    where
        B: From<String>,
    {
        let body = serde_json::json!({ "message": self.message }).to_string();

        let mut response = Response::new(B::from(body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code={}, message={}", self.status.as_u16(), self.message)?;
        if let Some(internal) = &self.internal {
            write!(f, ", internal={}", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}
