//! Writing results to HTTP responses.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use http_body::Frame;
use http_body_util::BodyExt;
use http_body_util::Full;
use http_body_util::StreamBody;
use http_body_util::combinators::UnsyncBoxBody;
use serde::Serialize;
use tower::BoxError;

use crate::engine::FormatErrorFn;
use crate::engine::IncrementalStream;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// The body of every response.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

pub(crate) const APPLICATION_JSON_UTF_8: HeaderValue =
    HeaderValue::from_static("application/json; charset=utf-8");
pub(crate) const MULTIPART_MIXED: HeaderValue =
    HeaderValue::from_static("multipart/mixed; boundary=\"-\"");

const PART_HEADER: &str = "\r\n---\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: ";
const TERMINATOR: &[u8] = b"\r\n-----\r\n";

/// A response whose errors went through the error formatter.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<FormattedIncremental>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedIncremental {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl FormattedResponse {
    pub(crate) fn new(response: graphql::Response, format_error: &FormatErrorFn) -> Self {
        let graphql::Response {
            label,
            data,
            path,
            errors,
            extensions,
            has_next,
            incremental,
        } = response;
        Self {
            errors: errors.iter().map(|error| format_error(error)).collect(),
            data,
            label,
            path,
            extensions,
            has_next,
            incremental: incremental
                .into_iter()
                .map(|patch| FormattedIncremental {
                    errors: patch.errors.iter().map(|error| format_error(error)).collect(),
                    data: patch.data,
                    label: patch.label,
                    path: patch.path,
                    extensions: patch.extensions,
                })
                .collect(),
        }
    }

    /// The final part sent when the incremental delivery fails.
    fn failure(error: &BoxError, format_error: &FormatErrorFn) -> Self {
        let error = graphql::Error::builder().message(error.to_string()).build();
        Self {
            errors: vec![format_error(&error)],
            has_next: Some(false),
            ..Default::default()
        }
    }
}

fn to_json(value: &impl Serialize, pretty: bool) -> Result<Vec<u8>, serde_json::Error> {
    if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
}

fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn response(
    status: StatusCode,
    headers: HeaderMap,
    content_type: HeaderValue,
    body: ResponseBody,
) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

/// A JSON response with an explicit `Content-Length`.
pub(crate) fn json_response(
    status: StatusCode,
    headers: HeaderMap,
    result: &FormattedResponse,
    pretty: bool,
) -> Result<http::Response<ResponseBody>, serde_json::Error> {
    let body = to_json(result, pretty)?;
    let length = body.len();
    let mut response = response(status, headers, APPLICATION_JSON_UTF_8, full(body));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// An HTML page.
pub(crate) fn html_response(
    status: StatusCode,
    headers: HeaderMap,
    page: String,
) -> http::Response<ResponseBody> {
    let length = page.len();
    let mut response = response(
        status,
        headers,
        HeaderValue::from_static(mime::TEXT_HTML_UTF_8.as_ref()),
        full(page),
    );
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

/// A `multipart/mixed` response: the first result followed by every patch of `stream`.
pub(crate) fn multipart_response(
    status: StatusCode,
    headers: HeaderMap,
    first: &FormattedResponse,
    stream: IncrementalStream,
    format_error: FormatErrorFn,
    pretty: bool,
) -> Result<http::Response<ResponseBody>, serde_json::Error> {
    let first = part(first, pretty)?;
    let multipart = Multipart::new(first, stream, format_error, pretty);
    let body = StreamBody::new(multipart.map(|chunk| chunk.map(Frame::data).map_err(BoxError::from)))
        .boxed_unsync();
    Ok(response(status, headers, MULTIPART_MIXED, body))
}

fn part(result: &FormattedResponse, pretty: bool) -> Result<Bytes, serde_json::Error> {
    let json = to_json(result, pretty)?;
    let length = json.len().to_string();
    let mut buf = Vec::with_capacity(PART_HEADER.len() + length.len() + json.len() + 6);
    buf.extend_from_slice(PART_HEADER.as_bytes());
    buf.extend_from_slice(length.as_bytes());
    buf.extend_from_slice(b"\r\n\r\n");
    buf.extend_from_slice(&json);
    buf.extend_from_slice(b"\r\n");
    Ok(buf.into())
}

/// Streams the parts of an incremental delivery.
///
/// The incremental stream is closed exactly once: when it is exhausted, or when the body is
/// dropped before that because the client went away.
pub(crate) struct Multipart {
    first: Option<Bytes>,
    stream: Option<IncrementalStream>,
    closing: Option<BoxFuture<'static, Result<(), BoxError>>>,
    format_error: FormatErrorFn,
    pretty: bool,
    is_terminated: bool,
}

impl Multipart {
    fn new(
        first: Bytes,
        stream: IncrementalStream,
        format_error: FormatErrorFn,
        pretty: bool,
    ) -> Self {
        Self {
            first: Some(first),
            stream: Some(stream),
            closing: None,
            format_error,
            pretty,
            is_terminated: false,
        }
    }

    fn terminate(&mut self, last: Option<Bytes>) -> Poll<Option<Result<Bytes, serde_json::Error>>> {
        self.is_terminated = true;
        let mut buf = last.map(Vec::from).unwrap_or_default();
        buf.extend_from_slice(TERMINATOR);
        Poll::Ready(Some(Ok(buf.into())))
    }
}

impl Stream for Multipart {
    type Item = Result<Bytes, serde_json::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        if self.is_terminated {
            return Poll::Ready(None);
        }

        loop {
            if let Some(closing) = self.closing.as_mut() {
                let closed = match closing.as_mut().poll(cx) {
                    Poll::Ready(closed) => closed,
                    Poll::Pending => return Poll::Pending,
                };
                self.closing = None;
                return match closed {
                    Ok(()) => self.terminate(None),
                    Err(error) => {
                        tracing::warn!(%error, "closing the incremental delivery failed");
                        let failure = FormattedResponse::failure(&error, &self.format_error);
                        let last = part(&failure, self.pretty)?;
                        self.terminate(Some(last))
                    }
                };
            }

            let Some(stream) = self.stream.as_mut() else {
                return self.terminate(None);
            };
            match stream.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(patch))) => {
                    let patch = FormattedResponse::new(patch, &self.format_error);
                    return Poll::Ready(Some(part(&patch, self.pretty)));
                }
                Poll::Ready(Some(Err(error))) => {
                    tracing::error!(%error, "incremental delivery failed");
                    // The producer failed, there is nothing left to close.
                    self.stream = None;
                    let failure = FormattedResponse::failure(&error, &self.format_error);
                    let last = part(&failure, self.pretty)?;
                    return self.terminate(Some(last));
                }
                Poll::Ready(None) => {
                    let closing = stream.cancel();
                    self.stream = None;
                    match closing {
                        Some(closing) => self.closing = Some(closing),
                        None => return self.terminate(None),
                    }
                }
            }
        }
    }
}

impl Drop for Multipart {
    fn drop(&mut self) {
        let closing = match (self.closing.take(), self.stream.as_mut()) {
            (Some(closing), _) => Some(closing),
            (None, Some(stream)) => stream.cancel(),
            (None, None) => None,
        };
        let Some(closing) = closing else {
            return;
        };
        tracing::debug!("response dropped before the incremental delivery completed, cancelling");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = closing.await {
                        tracing::warn!(%error, "cancelling the incremental delivery failed");
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime to cancel the incremental delivery on"),
        }
    }
}

/// Cancels an incremental delivery that will not be streamed.
pub(crate) fn cancel_in_background(mut stream: IncrementalStream) {
    if let Some(closing) = stream.cancel() {
        tokio::spawn(async move {
            if let Err(error) = closing.await {
                tracing::warn!(%error, "cancelling the incremental delivery failed");
            }
        });
    }
}
