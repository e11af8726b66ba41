//! Request errors.
//!
//! Every stage of request handling fails with a [`RequestError`], which is converted into the
//! single [`HttpError`] currency before a response is emitted.

use std::fmt;

use displaydoc::Display;
use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::ALLOW;
use thiserror::Error;
use tower::BoxError;

use crate::cache::CacheError;
use crate::engine::OperationKind;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;

/// Error types for request handling.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum RequestError {
    /// Unsupported content-encoding "{0}".
    UnsupportedContentEncoding(String),

    /// Unsupported charset "{0}".
    UnsupportedCharset(String),

    /// Invalid body: request entity too large.
    PayloadTooLarge,

    /// Invalid body: {0}.
    InvalidBody(String),

    /// POST body sent invalid JSON.
    InvalidJsonBody,

    /// Variables are invalid JSON.
    InvalidVariables,

    /// GraphQL only supports GET and POST requests.
    MethodNotAllowed,

    /// Must provide query string.
    MissingQuery,

    /// GraphQL middleware options must contain a schema.
    MissingSchema,

    /// GraphQL middleware option function must return an options object or a promise which will be resolved to an options object.
    InvalidOptions,

    /// GraphQL schema validation error.
    SchemaValidation(Vec<graphql::Error>),

    /// GraphQL syntax error.
    Syntax(graphql::Error),

    /// GraphQL validation error.
    Validation(Vec<graphql::Error>),

    /// Can only perform a {0} operation from a POST request.
    OperationNotAllowedOverGet(OperationKind),

    /// GraphQL execution context error.
    ExecutionContext(BoxError),

    /// {0}
    Cache(#[from] CacheError),

    /// {0}
    Internal(BoxError),
}

impl RequestError {
    /// The HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::UnsupportedContentEncoding(_) | RequestError::UnsupportedCharset(_) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            RequestError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::InvalidBody(_)
            | RequestError::InvalidJsonBody
            | RequestError::InvalidVariables
            | RequestError::MissingQuery
            | RequestError::Syntax(_)
            | RequestError::Validation(_)
            | RequestError::ExecutionContext(_) => StatusCode::BAD_REQUEST,
            RequestError::MethodNotAllowed | RequestError::OperationNotAllowedOverGet(_) => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            RequestError::MissingSchema
            | RequestError::InvalidOptions
            | RequestError::SchemaValidation(_)
            | RequestError::Cache(_)
            | RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra response headers this error requires.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match self {
            RequestError::MethodNotAllowed => {
                headers.insert(ALLOW, HeaderValue::from_static("GET, POST"));
            }
            RequestError::OperationNotAllowedOverGet(_) => {
                headers.insert(ALLOW, HeaderValue::from_static("POST"));
            }
            _ => {}
        }
        headers
    }
}

impl IntoGraphQLErrors for RequestError {
    fn into_graphql_errors(self) -> Result<Vec<graphql::Error>, Self> {
        match self {
            RequestError::SchemaValidation(errors) | RequestError::Validation(errors) => {
                Ok(errors)
            }
            RequestError::Syntax(error) => Ok(vec![error]),
            RequestError::ExecutionContext(error) => Ok(vec![
                graphql::Error::builder().message(error.to_string()).build(),
            ]),
            other => Err(other),
        }
    }
}

/// The error currency produced by every stage of request handling.
///
/// Its status and headers are applied to the HTTP response, and its GraphQL errors (or, when
/// there are none, its message) become the `errors` of the response body.
#[derive(Error, Debug, Clone)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
    pub graphql_errors: Option<Vec<graphql::Error>>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
            graphql_errors: None,
        }
    }

    /// Converts an opaque error raised by a user callback.
    ///
    /// An [`HttpError`] or [`RequestError`] keeps its status, anything else is a 500.
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<HttpError>() {
            Ok(error) => *error,
            Err(error) => match error.downcast::<RequestError>() {
                Ok(error) => (*error).into(),
                Err(error) => RequestError::Internal(error).into(),
            },
        }
    }

    /// The GraphQL errors reported for this error.
    pub fn errors(&self) -> Vec<graphql::Error> {
        match &self.graphql_errors {
            Some(errors) => errors.clone(),
            None => vec![graphql::Error::builder().message(self.message.clone()).build()],
        }
    }
}

/// Displays (only) the error message.
impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl From<RequestError> for HttpError {
    fn from(error: RequestError) -> Self {
        let status = error.status();
        let headers = error.headers();
        let message = error.to_string();
        let graphql_errors = error.into_graphql_errors().ok();
        Self {
            status,
            message,
            headers,
            graphql_errors,
        }
    }
}
