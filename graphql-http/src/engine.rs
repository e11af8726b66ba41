//! The query engine contract.
//!
//! Parsing and validation default to `apollo-compiler`, execution is always provided by the
//! embedding application.

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;
use std::task::Context;
use std::task::Poll;

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tower::BoxError;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

const REQUEST_SOURCE_PATH: &str = "GraphQL request";
const SCHEMA_SOURCE_PATH: &str = "schema.graphql";

/// The value handed to resolvers as their context.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Resolves a field from its parent value, field name and arguments.
pub type FieldResolver = Arc<dyn Fn(&Value, &str, &Object) -> Option<Value> + Send + Sync>;

/// Resolves the concrete type name of a value of an abstract type.
pub type TypeResolver = Arc<dyn Fn(&Value, &str) -> Option<String> + Send + Sync>;

pub type ParseFn = Arc<dyn Fn(&str) -> Result<Document, graphql::Error> + Send + Sync>;

pub type ValidateFn = Arc<
    dyn Fn(&Schema, &Document, &[Arc<dyn ValidationRule>]) -> Vec<graphql::Error> + Send + Sync,
>;

pub type ExecuteFn = Arc<
    dyn Fn(ExecutionArgs) -> BoxFuture<'static, Result<ExecutionResult, BoxError>> + Send + Sync,
>;

pub type FormatErrorFn = Arc<dyn Fn(&graphql::Error) -> Value + Send + Sync>;

/// A query engine: parses, validates and executes GraphQL documents against a schema.
#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
    /// Parses query text. Only the first syntax error is reported.
    fn parse(&self, source: &str) -> Result<Document, graphql::Error> {
        Document::parse(source)
    }

    /// Validates the schema itself.
    fn validate_schema(&self, schema: &Schema) -> Vec<graphql::Error> {
        match schema.validate() {
            Ok(_) => Vec::new(),
            Err(errors) => errors.to_vec(),
        }
    }

    /// Validates a document with the default rules and then every additional rule.
    fn validate(
        &self,
        schema: &Schema,
        document: &Document,
        rules: &[Arc<dyn ValidationRule>],
    ) -> Vec<graphql::Error> {
        validate_document(schema, document, rules)
    }

    async fn execute(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError>;

    fn format_error(&self, error: &graphql::Error) -> Value {
        format_error(error)
    }
}

/// An additional validation rule run after the default GraphQL validation.
pub trait ValidationRule: Send + Sync {
    fn validate(&self, schema: &Schema, document: &Document) -> Vec<graphql::Error>;
}

impl<F> ValidationRule for F
where
    F: Fn(&Schema, &Document) -> Vec<graphql::Error> + Send + Sync,
{
    fn validate(&self, schema: &Schema, document: &Document) -> Vec<graphql::Error> {
        self(schema, document)
    }
}

/// Runs the GraphQL validation rules followed by `rules`, collecting every error.
pub fn validate_document(
    schema: &Schema,
    document: &Document,
    rules: &[Arc<dyn ValidationRule>],
) -> Vec<graphql::Error> {
    let valid_schema = match schema.validate() {
        Ok(valid_schema) => valid_schema,
        Err(errors) => return errors.to_vec(),
    };
    let mut errors = match document.ast().to_executable_validate(valid_schema) {
        Ok(_) => Vec::new(),
        Err(with_errors) => with_errors
            .errors
            .iter()
            .map(|diagnostic| diagnostic.to_json().into())
            .collect(),
    };
    for rule in rules {
        errors.extend(rule.validate(schema, document));
    }
    errors
}

/// Serializes an error into its `{message, locations, path, extensions}` shape.
pub fn format_error(error: &graphql::Error) -> Value {
    serde_json_bytes::to_value(error)
        .unwrap_or_else(|_| Value::String(error.message.clone().into()))
}

/// The identity of a schema: the hex encoded SHA-256 of its SDL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId(String);

impl SchemaId {
    pub fn new(sdl: &str) -> Self {
        SchemaId(hex::encode(Sha256::digest(sdl.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A compiled type system.
///
/// Cheap to clone. Schema validation runs at most once per schema.
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

struct SchemaInner {
    definition: apollo_compiler::Schema,
    id: SchemaId,
    validated: OnceLock<Result<Valid<apollo_compiler::Schema>, Vec<graphql::Error>>>,
}

impl Schema {
    /// Builds a schema from SDL. Type system validation is deferred to [`Schema::validate`].
    pub fn parse(sdl: &str) -> Result<Self, Vec<graphql::Error>> {
        let definition = apollo_compiler::Schema::parse(sdl, SCHEMA_SOURCE_PATH).map_err(
            |with_errors| {
                with_errors
                    .errors
                    .iter()
                    .map(|diagnostic| graphql::Error::from(diagnostic.to_json()))
                    .collect::<Vec<_>>()
            },
        )?;
        Ok(Self {
            inner: Arc::new(SchemaInner {
                definition,
                id: SchemaId::new(sdl),
                validated: OnceLock::new(),
            }),
        })
    }

    pub fn id(&self) -> &SchemaId {
        &self.inner.id
    }

    pub fn definition(&self) -> &apollo_compiler::Schema {
        &self.inner.definition
    }

    /// Validates the type system, memoizing the outcome.
    pub fn validate(&self) -> Result<&Valid<apollo_compiler::Schema>, &[graphql::Error]> {
        self.inner
            .validated
            .get_or_init(|| {
                self.inner.definition.clone().validate().map_err(|with_errors| {
                    with_errors
                        .errors
                        .iter()
                        .map(|diagnostic| diagnostic.to_json().into())
                        .collect()
                })
            })
            .as_ref()
            .map_err(Vec::as_slice)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("id", &self.inner.id).finish()
    }
}

/// The kind of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ast::OperationType> for OperationKind {
    fn from(operation_type: ast::OperationType) -> Self {
        match operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// A parsed GraphQL request document. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Document(Arc<ast::Document>);

impl Document {
    /// Parses query text, reporting the first syntax error.
    pub fn parse(source: &str) -> Result<Self, graphql::Error> {
        ast::Document::parse(source, REQUEST_SOURCE_PATH)
            .map(Self::from)
            .map_err(|with_errors| {
                with_errors
                    .errors
                    .iter()
                    .next()
                    .map(|diagnostic| graphql::Error::from(diagnostic.to_json()))
                    .unwrap_or_else(|| {
                        graphql::Error::builder()
                            .message("Syntax Error: invalid document.")
                            .build()
                    })
            })
    }

    pub fn ast(&self) -> &ast::Document {
        &self.0
    }

    /// Selects an operation: by name when one is given, otherwise the only operation of the
    /// document.
    pub fn operation(&self, operation_name: Option<&str>) -> Option<&Node<ast::OperationDefinition>> {
        let mut operations = self.0.definitions.iter().filter_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        });
        match operation_name {
            Some(name) => operations.find(|operation| {
                operation
                    .name
                    .as_ref()
                    .is_some_and(|operation_name| operation_name.as_str() == name)
            }),
            None => {
                let first = operations.next()?;
                operations.next().is_none().then_some(first)
            }
        }
    }

    pub fn operation_kind(&self, operation_name: Option<&str>) -> Option<OperationKind> {
        self.operation(operation_name)
            .map(|operation| operation.operation_type.into())
    }
}

impl From<ast::Document> for Document {
    fn from(document: ast::Document) -> Self {
        Document(Arc::new(document))
    }
}

/// Everything an engine needs to execute an operation.
#[derive(Clone)]
pub struct ExecutionArgs {
    pub schema: Schema,
    pub document: Document,
    pub root_value: Option<Value>,
    pub context_value: ContextValue,
    pub variables: Option<Object>,
    pub operation_name: Option<String>,
    pub field_resolver: Option<FieldResolver>,
    pub type_resolver: Option<TypeResolver>,
}

impl fmt::Debug for ExecutionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionArgs")
            .field("schema", &self.schema)
            .field("variables", &self.variables)
            .field("operation_name", &self.operation_name)
            .finish_non_exhaustive()
    }
}

/// The outcome of an execution.
#[derive(Debug)]
pub enum ExecutionResult {
    /// A single, complete response.
    Response(graphql::Response),
    /// An initial response followed by patches.
    Incremental(IncrementalStream),
}

impl From<graphql::Response> for ExecutionResult {
    fn from(response: graphql::Response) -> Self {
        ExecutionResult::Response(response)
    }
}

impl From<IncrementalStream> for ExecutionResult {
    fn from(stream: IncrementalStream) -> Self {
        ExecutionResult::Incremental(stream)
    }
}

type CancelFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A lazy, non-restartable sequence of responses: the first item is the initial result and
/// every following item is a patch.
///
/// Once cancelled the stream ends and the cancel hook is never run again.
pub struct IncrementalStream {
    stream: BoxStream<'static, Result<graphql::Response, BoxError>>,
    on_cancel: Option<CancelFn>,
    cancelled: bool,
}

impl IncrementalStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<graphql::Response, BoxError>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            on_cancel: None,
            cancelled: false,
        }
    }

    /// Sets the hook run when the consumer stops early or the stream is exhausted.
    pub fn with_cancel<F, Fut>(mut self, on_cancel: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_cancel = Some(Box::new(move || Box::pin(on_cancel())));
        self
    }

    /// Closes the stream. Returns the cancel hook future the first time only.
    pub fn cancel(&mut self) -> Option<BoxFuture<'static, Result<(), BoxError>>> {
        if self.cancelled {
            return None;
        }
        self.cancelled = true;
        Some(match self.on_cancel.take() {
            Some(on_cancel) => on_cancel(),
            None => Box::pin(futures::future::ready(Ok(()))),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Stream for IncrementalStream {
    type Item = Result<graphql::Response, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.stream.poll_next_unpin(cx)
    }
}

impl fmt::Debug for IncrementalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalStream")
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
