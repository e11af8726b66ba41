//! Per-request options.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::request::Parts;
use tower::BoxError;

use crate::cache::DocumentCache;
use crate::engine::ContextValue;
use crate::engine::Document;
use crate::engine::ExecuteFn;
use crate::engine::FieldResolver;
use crate::engine::FormatErrorFn;
use crate::engine::ParseFn;
use crate::engine::Schema;
use crate::engine::TypeResolver;
use crate::engine::ValidateFn;
use crate::engine::ValidationRule;
use crate::error::HttpError;
use crate::error::RequestError;
use crate::explorer::ExplorerConfig;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::params::RequestParams;

/// Produces the `extensions` of a response from the executed request.
pub type ExtensionsFn = Arc<
    dyn Fn(ExtensionsInfo) -> BoxFuture<'static, Result<Option<Object>, BoxError>> + Send + Sync,
>;

/// What an [`ExtensionsFn`] is given.
#[derive(Clone)]
pub struct ExtensionsInfo {
    pub document: Document,
    pub variables: Option<Object>,
    pub operation_name: Option<String>,
    pub result: graphql::Response,
    pub context: ContextValue,
}

/// Configuration applied to a single request.
#[derive(Clone, Default)]
pub struct OptionsData {
    /// The schema requests are executed against. Required.
    pub schema: Option<Schema>,
    /// The context handed to resolvers; defaults to the request head.
    pub context_value: Option<ContextValue>,
    pub root_value: Option<Value>,
    /// Rules run after the default validation rules.
    pub validation_rules: Vec<Arc<dyn ValidationRule>>,
    pub parse_fn: Option<ParseFn>,
    pub validate_fn: Option<ValidateFn>,
    pub execute_fn: Option<ExecuteFn>,
    pub format_error_fn: Option<FormatErrorFn>,
    pub extensions_fn: Option<ExtensionsFn>,
    pub explorer: ExplorerConfig,
    pub field_resolver: Option<FieldResolver>,
    pub type_resolver: Option<TypeResolver>,
    /// Pretty print JSON responses.
    pub pretty: bool,
    pub document_cache: Option<Arc<dyn DocumentCache>>,
}

#[buildstructor::buildstructor]
impl OptionsData {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        schema: Option<Schema>,
        context_value: Option<ContextValue>,
        root_value: Option<Value>,
        validation_rules: Vec<Arc<dyn ValidationRule>>,
        parse_fn: Option<ParseFn>,
        validate_fn: Option<ValidateFn>,
        execute_fn: Option<ExecuteFn>,
        format_error_fn: Option<FormatErrorFn>,
        extensions_fn: Option<ExtensionsFn>,
        explorer: Option<ExplorerConfig>,
        field_resolver: Option<FieldResolver>,
        type_resolver: Option<TypeResolver>,
        pretty: Option<bool>,
        document_cache: Option<Arc<dyn DocumentCache>>,
    ) -> Self {
        Self {
            schema,
            context_value,
            root_value,
            validation_rules,
            parse_fn,
            validate_fn,
            execute_fn,
            format_error_fn,
            extensions_fn,
            explorer: explorer.unwrap_or_default(),
            field_resolver,
            type_resolver,
            pretty: pretty.unwrap_or_default(),
            document_cache,
        }
    }
}

impl fmt::Debug for OptionsData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsData")
            .field("schema", &self.schema)
            .field("validation_rules", &self.validation_rules.len())
            .field("explorer", &self.explorer)
            .field("pretty", &self.pretty)
            .finish_non_exhaustive()
    }
}

/// Computes the options of each request.
///
/// Returning `Ok(None)` means the factory produced no options, which fails the request.
#[async_trait]
pub trait OptionsFactory: Send + Sync + 'static {
    async fn resolve(
        &self,
        request: &Parts,
        response_headers: &mut HeaderMap,
        params: &RequestParams,
    ) -> Result<Option<OptionsData>, BoxError>;
}

/// Options given once, or computed per request.
#[derive(Clone)]
pub enum Options {
    Static(Arc<OptionsData>),
    Factory(Arc<dyn OptionsFactory>),
}

impl Options {
    pub fn factory(factory: impl OptionsFactory) -> Self {
        Options::Factory(Arc::new(factory))
    }
}

impl From<OptionsData> for Options {
    fn from(options: OptionsData) -> Self {
        Options::Static(Arc::new(options))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Options::Static(options) => f.debug_tuple("Static").field(options).finish(),
            Options::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Options resolved for a request, with the schema they must carry.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedOptions {
    pub(crate) data: Arc<OptionsData>,
    pub(crate) schema: Schema,
}

impl Options {
    /// Resolves the options for a request.
    ///
    /// Factory errors keep their status when they are [`HttpError`]s, anything else is a 500.
    pub(crate) async fn resolve(
        &self,
        request: &Parts,
        response_headers: &mut HeaderMap,
        params: &RequestParams,
    ) -> Result<ResolvedOptions, HttpError> {
        let data = match self {
            Options::Static(data) => data.clone(),
            Options::Factory(factory) => factory
                .resolve(request, response_headers, params)
                .await
                .map_err(HttpError::from_boxed)?
                .map(Arc::new)
                .ok_or(RequestError::InvalidOptions)?,
        };
        let schema = data.schema.clone().ok_or(RequestError::MissingSchema)?;
        Ok(ResolvedOptions { data, schema })
    }
}
