//! Request body decoding.

use std::io;
use std::pin::pin;

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::bufread::ZlibDecoder;
use bytes::Bytes;
use encoding_rs::Encoding;
use futures::TryStreamExt;
use http::HeaderMap;
use http::header::CONTENT_ENCODING;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http_body::Body;
use http_body_util::BodyExt;
use mediatype::MediaType;
use mediatype::ReadParams;
use mediatype::names::CHARSET;
use serde_json_bytes::ByteString;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tower::BoxError;

use crate::error::RequestError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A body already decoded by the HTTP framework, inserted in the request extensions.
///
/// An object is used as the parameter bag as is, a string is used as the query when the
/// request content type is `application/graphql`, anything else yields no parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedBody(pub Value);

/// The request content type, reduced to what decoding needs.
struct ContentType {
    essence: String,
    charset: Option<String>,
}

impl ContentType {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let media_type = MediaType::parse(raw).ok()?;
        let essence = format!("{}/{}", media_type.ty.as_str(), media_type.subty.as_str())
            .to_ascii_lowercase();
        let charset = media_type
            .get_param(CHARSET)
            .map(|value| value.as_str().trim_matches('"').to_ascii_lowercase());
        Some(Self { essence, charset })
    }
}

/// Decodes the request body into a parameter bag.
pub async fn parse_body<B>(parts: &Parts, body: B, limit: usize) -> Result<Object, RequestError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let parsed = parts.extensions.get::<ParsedBody>();
    if let Some(ParsedBody(Value::Object(object))) = parsed {
        return Ok(object.clone());
    }

    if !parts.headers.contains_key(CONTENT_TYPE) {
        return Ok(Object::new());
    }
    // An unparseable content type is treated like an unknown one.
    let Some(content_type) = ContentType::from_headers(&parts.headers) else {
        return Ok(Object::new());
    };

    match parsed {
        Some(ParsedBody(Value::String(query))) if content_type.essence == "application/graphql" => {
            return Ok(query_bag(query.as_str()));
        }
        Some(ParsedBody(Value::Null)) | None => {}
        Some(_) => return Ok(Object::new()),
    }

    if content_length(&parts.headers)? == Some(0) {
        return Ok(Object::new());
    }

    let text = read_body(&parts.headers, &content_type, body, limit).await?;
    match content_type.essence.as_str() {
        "application/graphql" => Ok(query_bag(&text)),
        "application/json" => parse_json_object(&text),
        "application/x-www-form-urlencoded" => parse_form(&text),
        _ => Ok(Object::new()),
    }
}

fn query_bag(query: &str) -> Object {
    let mut bag = Object::new();
    bag.insert("query", Value::String(ByteString::from(query)));
    bag
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, RequestError> {
    headers
        .get(CONTENT_LENGTH)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<usize>().ok())
                .ok_or_else(|| RequestError::InvalidBody("invalid content length".to_string()))
        })
        .transpose()
}

fn charset_encoding(charset: Option<&str>) -> Result<&'static Encoding, RequestError> {
    let charset = charset.unwrap_or("utf-8");
    let unsupported = || RequestError::UnsupportedCharset(charset.to_ascii_uppercase());
    let is_utf = charset
        .strip_prefix("utf-")
        .is_some_and(|bits| !bits.is_empty() && bits.bytes().all(|b| b.is_ascii_digit()));
    if !is_utf {
        return Err(unsupported());
    }
    Encoding::for_label(charset.as_bytes()).ok_or_else(unsupported)
}

enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    fn from_headers(headers: &HeaderMap) -> Result<Self, RequestError> {
        let encoding = headers
            .get(CONTENT_ENCODING)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).to_ascii_lowercase())
            .unwrap_or_else(|| "identity".to_string());
        match encoding.as_str() {
            "identity" => Ok(ContentEncoding::Identity),
            "gzip" => Ok(ContentEncoding::Gzip),
            "deflate" => Ok(ContentEncoding::Deflate),
            _ => Err(RequestError::UnsupportedContentEncoding(encoding)),
        }
    }
}

async fn read_body<B>(
    headers: &HeaderMap,
    content_type: &ContentType,
    body: B,
    limit: usize,
) -> Result<String, RequestError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let encoding = charset_encoding(content_type.charset.as_deref())?;
    let content_encoding = ContentEncoding::from_headers(headers)?;

    // The declared length only describes the payload when it is not compressed.
    let expected_length = match content_encoding {
        ContentEncoding::Identity => content_length(headers)?,
        ContentEncoding::Gzip | ContentEncoding::Deflate => None,
    };
    if expected_length.is_some_and(|length| length > limit) {
        return Err(RequestError::PayloadTooLarge);
    }

    let reader = StreamReader::new(
        body.into_data_stream().map_err(|error| {
            let error: BoxError = error.into();
            io::Error::other(error)
        }),
    );
    let decoded = match content_encoding {
        ContentEncoding::Identity => read_limited(reader, limit).await?,
        ContentEncoding::Gzip => read_limited(GzipDecoder::new(reader), limit).await?,
        ContentEncoding::Deflate => read_limited(ZlibDecoder::new(reader), limit).await?,
    };

    if expected_length.is_some_and(|length| length != decoded.len()) {
        return Err(RequestError::InvalidBody(
            "request size did not match content length".to_string(),
        ));
    }

    let (text, _, _) = encoding.decode(&decoded);
    Ok(text.into_owned())
}

/// Reads at most `limit` decoded bytes, stopping as soon as the limit is exceeded.
async fn read_limited<R>(reader: R, limit: usize) -> Result<Vec<u8>, RequestError>
where
    R: AsyncRead,
{
    let reader = pin!(reader);
    let mut decoded = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .await
        .map_err(|error| RequestError::InvalidBody(error.to_string()))?;
    if decoded.len() > limit {
        return Err(RequestError::PayloadTooLarge);
    }
    Ok(decoded)
}

/// Parses a JSON body, which must be an object.
fn parse_json_object(text: &str) -> Result<Object, RequestError> {
    let looks_like_object = text
        .trim_start_matches([' ', '\t', '\n', '\r'])
        .starts_with('{');
    if !looks_like_object {
        return Err(RequestError::InvalidJsonBody);
    }
    serde_json::from_str::<Object>(text).map_err(|_| RequestError::InvalidJsonBody)
}

/// Parses a form body. The first occurrence of a repeated key wins.
pub(crate) fn parse_form(text: &str) -> Result<Object, RequestError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(text)
        .map_err(|error| RequestError::InvalidBody(error.to_string()))?;
    let mut bag = Object::new();
    for (key, value) in pairs {
        if !bag.contains_key(key.as_str()) {
            bag.insert(key, Value::String(value.into()));
        }
    }
    Ok(bag)
}
