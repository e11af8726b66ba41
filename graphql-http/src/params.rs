//! GraphQL request parameters.

use bytes::Bytes;
use http::request::Parts;
use http_body::Body;
use serde::Serialize;
use tower::BoxError;

use crate::body::parse_body;
use crate::body::parse_form;
use crate::error::RequestError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// The parameters of a GraphQL request, merged from the URL and the body.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParams {
    /// The query text.
    pub query: Option<String>,
    /// The operation variables.
    pub variables: Option<Object>,
    /// The name of the operation to execute.
    pub operation_name: Option<String>,
    /// Whether the client asked for the raw result, bypassing the explorer.
    pub raw: bool,
}

#[buildstructor::buildstructor]
impl RequestParams {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        variables: Option<Object>,
        operation_name: Option<String>,
        raw: Option<bool>,
    ) -> Self {
        Self {
            query,
            variables,
            operation_name,
            raw: raw.unwrap_or_default(),
        }
    }

    /// Merges the URL parameters with the body parameters, the URL taking precedence.
    pub fn from_sources(url: &Object, body: &Object) -> Result<Self, RequestError> {
        let lookup = |key: &str| {
            url.get(key)
                .filter(|value| !value.is_null())
                .or_else(|| body.get(key).filter(|value| !value.is_null()))
        };

        let query = match lookup("query") {
            Some(Value::String(query)) => Some(query.as_str().to_string()),
            _ => None,
        };

        let variables = match lookup("variables") {
            Some(Value::String(variables)) => {
                match serde_json::from_str::<Value>(variables.as_str()) {
                    Ok(Value::Object(variables)) => Some(variables),
                    Ok(_) => None,
                    Err(_) => return Err(RequestError::InvalidVariables),
                }
            }
            Some(Value::Object(variables)) => Some(variables.clone()),
            _ => None,
        };

        let operation_name = match lookup("operationName") {
            Some(Value::String(operation_name)) => Some(operation_name.as_str().to_string()),
            _ => None,
        };

        let raw = url.contains_key("raw") || body.contains_key("raw");

        Ok(Self {
            query,
            variables,
            operation_name,
            raw,
        })
    }
}

/// Extracts the parameters of a request from its query string and body.
pub async fn get_graphql_params<B>(
    parts: &Parts,
    body: B,
    limit: usize,
) -> Result<RequestParams, RequestError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let url_data = match parts.uri.query() {
        Some(query) => parse_form(query)?,
        None => Object::new(),
    };
    let body_data = parse_body(parts, body, limit).await?;
    RequestParams::from_sources(&url_data, &body_data)
}
