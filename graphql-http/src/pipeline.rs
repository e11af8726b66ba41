//! The request pipeline.
//!
//! Drives a request from its raw HTTP form through parameter extraction, option resolution,
//! parsing, validation and execution, and hands the outcome to the emitter.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use http::HeaderMap;
use http::Method;
use http::StatusCode;
use http::request::Parts;
use http_body::Body;
use tower::BoxError;
use tracing::Instrument;

use crate::configuration::Configuration;
use crate::emitter::FormattedResponse;
use crate::emitter::ResponseBody;
use crate::emitter::cancel_in_background;
use crate::emitter::html_response;
use crate::emitter::json_response;
use crate::emitter::multipart_response;
use crate::engine::ContextValue;
use crate::engine::ExecutionArgs;
use crate::engine::ExecutionResult;
use crate::engine::FormatErrorFn;
use crate::engine::IncrementalStream;
use crate::engine::OperationKind;
use crate::engine::QueryEngine;
use crate::error::HttpError;
use crate::error::RequestError;
use crate::explorer::ExplorerData;
use crate::explorer::ExplorerOptions;
use crate::explorer::render_explorer;
use crate::graphql;
use crate::negotiation::prefers_html;
use crate::options::ExtensionsInfo;
use crate::options::Options;
use crate::options::ResolvedOptions;
use crate::params::RequestParams;
use crate::params::get_graphql_params;

/// How far a request went.
enum Step {
    /// The explorer is shown without executing anything.
    Explorer,
    /// The operation was executed.
    Executed(graphql::Response),
}

/// What is known about a request while it goes through the pipeline.
struct RequestState {
    params: Option<RequestParams>,
    response_headers: HeaderMap,
    pretty: bool,
    format_error: FormatErrorFn,
    show_explorer: bool,
    explorer_options: Option<ExplorerOptions>,
    stream: Option<IncrementalStream>,
}

impl RequestState {
    fn new(engine: &Arc<dyn QueryEngine>) -> Self {
        let engine = engine.clone();
        Self {
            params: None,
            response_headers: HeaderMap::new(),
            pretty: false,
            format_error: Arc::new(move |error: &graphql::Error| engine.format_error(error)),
            show_explorer: false,
            explorer_options: None,
            stream: None,
        }
    }

    fn apply_options(&mut self, options: &ResolvedOptions) {
        self.pretty = options.data.pretty;
        if let Some(format_error) = &options.data.format_error_fn {
            self.format_error = format_error.clone();
        }
    }

    async fn run<B>(
        &mut self,
        engine: &Arc<dyn QueryEngine>,
        options: &Options,
        configuration: &Configuration,
        parts: &Parts,
        body: B,
    ) -> Result<Step, HttpError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let params = match get_graphql_params(parts, body, configuration.body_limit()).await {
            Ok(params) => params,
            Err(error) => {
                // Options still apply to the error response.
                let resolved = options
                    .resolve(parts, &mut self.response_headers, &RequestParams::default())
                    .await?;
                self.apply_options(&resolved);
                return Err(error.into());
            }
        };
        let resolved = options
            .resolve(parts, &mut self.response_headers, &params)
            .await?;
        self.apply_options(&resolved);
        self.params = Some(params.clone());
        let ResolvedOptions { data, schema } = resolved;

        if parts.method != Method::GET && parts.method != Method::POST {
            return Err(RequestError::MethodNotAllowed.into());
        }

        self.show_explorer =
            !params.raw && data.explorer.is_enabled() && prefers_html(&parts.headers);
        self.explorer_options = data.explorer.options().cloned();

        let Some(query) = params.query.as_deref() else {
            if self.show_explorer {
                return Ok(Step::Explorer);
            }
            return Err(RequestError::MissingQuery.into());
        };

        let schema_errors = engine.validate_schema(&schema);
        if !schema_errors.is_empty() {
            return Err(RequestError::SchemaValidation(schema_errors).into());
        }

        let cached = match &data.document_cache {
            Some(cache) => cache
                .get(query, &schema)
                .map_err(RequestError::from)?,
            None => None,
        };
        let is_cached = cached.is_some();
        let document = match cached {
            Some(document) => {
                tracing::debug!("using cached document");
                document
            }
            None => match &data.parse_fn {
                Some(parse) => parse(query),
                None => engine.parse(query),
            }
            .map_err(RequestError::Syntax)?,
        };

        // Validation rules are per request: cached documents are validated again.
        let validation_errors = match &data.validate_fn {
            Some(validate) => validate(&schema, &document, &data.validation_rules),
            None => engine.validate(&schema, &document, &data.validation_rules),
        };
        if !validation_errors.is_empty() {
            return Err(RequestError::Validation(validation_errors).into());
        }
        if !is_cached
            && let Some(cache) = &data.document_cache
        {
            cache.put(query, &schema, document.clone());
        }
        tracing::debug!("document validated");

        if parts.method == Method::GET {
            match document.operation_kind(params.operation_name.as_deref()) {
                Some(OperationKind::Query) | None => {}
                Some(kind) if self.show_explorer => {
                    tracing::debug!(%kind, "showing the explorer instead of executing over GET");
                    return Ok(Step::Explorer);
                }
                Some(kind) => return Err(RequestError::OperationNotAllowedOverGet(kind).into()),
            }
        }

        let context: ContextValue = match &data.context_value {
            Some(context) => context.clone(),
            None => Arc::new(parts.clone()),
        };
        let args = ExecutionArgs {
            schema,
            document: document.clone(),
            root_value: data.root_value.clone(),
            context_value: context.clone(),
            variables: params.variables.clone(),
            operation_name: params.operation_name.clone(),
            field_resolver: data.field_resolver.clone(),
            type_resolver: data.type_resolver.clone(),
        };
        let executed = match &data.execute_fn {
            Some(execute) => execute(args).await,
            None => engine.execute(args).await,
        }
        .map_err(RequestError::ExecutionContext)?;

        let mut result = match executed {
            ExecutionResult::Response(response) => response,
            ExecutionResult::Incremental(stream) => self.first_result(stream).await?,
        };
        tracing::debug!("operation executed");

        if let Some(extensions) = &data.extensions_fn {
            let info = ExtensionsInfo {
                document,
                variables: params.variables.clone(),
                operation_name: params.operation_name.clone(),
                result: result.clone(),
                context,
            };
            if let Some(extensions) = extensions(info).await.map_err(HttpError::from_boxed)? {
                result.extensions = extensions;
            }
        }

        Ok(Step::Executed(result))
    }

    /// Pulls the initial result of an incremental delivery, keeping the rest for the emitter.
    async fn first_result(
        &mut self,
        mut stream: IncrementalStream,
    ) -> Result<graphql::Response, RequestError> {
        match stream.next().await {
            Some(Ok(first)) => {
                self.stream = Some(stream);
                Ok(first)
            }
            Some(Err(error)) => {
                cancel_in_background(stream);
                Err(RequestError::ExecutionContext(error))
            }
            None => {
                cancel_in_background(stream);
                Ok(graphql::Response::default())
            }
        }
    }

    fn explorer_page(&self, result: Option<&FormattedResponse>) -> String {
        let result = result.and_then(|result| serde_json_bytes::to_value(result).ok());
        let data = match &self.params {
            Some(params) => ExplorerData {
                query: params.query.as_deref(),
                variables: params.variables.as_ref(),
                operation_name: params.operation_name.as_deref(),
                result: result.as_ref(),
            },
            None => ExplorerData::default(),
        };
        render_explorer(&data, self.explorer_options.as_ref())
    }

    fn emit(mut self, step: Result<Step, HttpError>) -> http::Response<ResponseBody> {
        let mut headers = std::mem::take(&mut self.response_headers);
        let (mut status, result) = match step {
            Ok(Step::Explorer) => {
                tracing::debug!("rendering the explorer");
                return html_response(StatusCode::OK, headers, self.explorer_page(None));
            }
            Ok(Step::Executed(result)) => (StatusCode::OK, result),
            Err(error) => {
                if let Some(stream) = self.stream.take() {
                    cancel_in_background(stream);
                }
                headers.extend(error.headers.clone());
                (error.status, graphql::Response::from_errors(error.errors()))
            }
        };

        if status == StatusCode::OK && result.has_null_data() {
            status = StatusCode::INTERNAL_SERVER_ERROR;
        }
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), errors = ?result.errors, "GraphQL request failed");
        } else if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), errors = ?result.errors, "GraphQL request rejected");
        }

        let formatted = FormattedResponse::new(result, &self.format_error);

        if self.show_explorer {
            if let Some(stream) = self.stream.take() {
                cancel_in_background(stream);
            }
            let page = self.explorer_page(Some(&formatted));
            return html_response(status, headers, page);
        }

        let emitted = match self.stream.take() {
            Some(stream) => multipart_response(
                status,
                headers,
                &formatted,
                stream,
                self.format_error.clone(),
                self.pretty,
            ),
            None => json_response(status, headers, &formatted, self.pretty),
        };
        emitted.unwrap_or_else(|error| {
            tracing::error!(%error, "cannot serialize the GraphQL response");
            serialization_failure()
        })
    }
}

fn serialization_failure() -> http::Response<ResponseBody> {
    let result = FormattedResponse {
        errors: vec![serde_json_bytes::json!({"message": "Internal server error."})],
        ..Default::default()
    };
    // Serializing a literal cannot fail, an empty body is the last resort.
    json_response(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), &result, false).unwrap_or_else(
        |_| {
            let mut response = http::Response::new(ResponseBody::default());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        },
    )
}

/// Handles one GraphQL over HTTP request.
pub(crate) async fn process_request<B>(
    engine: Arc<dyn QueryEngine>,
    options: Options,
    configuration: Arc<Configuration>,
    request: http::Request<B>,
) -> http::Response<ResponseBody>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<BoxError>,
{
    let (parts, body) = request.into_parts();
    let span = tracing::info_span!(
        "graphql_http.request",
        method = %parts.method,
        path = %parts.uri.path(),
    );
    async move {
        let mut state = RequestState::new(&engine);
        let step = state
            .run(&engine, &options, &configuration, &parts, body)
            .await;
        state.emit(step)
    }
    .instrument(span)
    .await
}
