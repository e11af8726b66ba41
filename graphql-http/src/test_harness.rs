//! Test helpers.
//!
//! [`TestEngine`] executes operations against canned values so that the HTTP behaviour can be
//! exercised in memory:
//!
//! ```
//! # fn main() -> Result<(), tower::BoxError> {
//! use graphql_http::GraphQLHttp;
//! use graphql_http::OptionsData;
//! use graphql_http::test_harness::TestEngine;
//!
//! let engine = TestEngine::builder().field("hello", "world").build()?;
//! let options = OptionsData::builder().schema(engine.schema()).build();
//! let service = GraphQLHttp::new(engine, options);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use apollo_compiler::ast;
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tower::BoxError;

use crate::engine::ExecutionArgs;
use crate::engine::ExecutionResult;
use crate::engine::IncrementalStream;
use crate::engine::OperationKind;
use crate::engine::QueryEngine;
use crate::engine::Schema;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// The schema used when none is given.
pub const DEFAULT_SDL: &str = r#"
type Query {
  hello(who: String): String
  test: String
  nullable: String
  failing: String
}

type Mutation {
  bye: String
}

type Subscription {
  ticks: Int
}
"#;

/// A [`QueryEngine`] resolving the root fields of operations to canned values.
///
/// Nested selections are not resolved: the canned value of a root field is returned as is.
pub struct TestEngine {
    schema: Schema,
    fields: HashMap<String, Value>,
    failing_fields: HashMap<String, String>,
    patches: Vec<graphql::Response>,
    hold_open: bool,
    cancellations: Arc<AtomicUsize>,
}

#[buildstructor::buildstructor]
impl TestEngine {
    /// * `.sdl(..)` replaces [`DEFAULT_SDL`].
    /// * `.field(name, value)` resolves a root field.
    /// * `.failing_field(name, message)` makes a root field fail.
    /// * `.patch(response)` delivers the result incrementally, followed by the patches.
    /// * `.hold_open(true)` keeps the incremental delivery open after the last patch.
    ///
    /// Fails when the SDL does not parse.
    #[builder(visibility = "pub")]
    fn new(
        sdl: Option<String>,
        fields: HashMap<String, Value>,
        failing_fields: HashMap<String, String>,
        patches: Vec<graphql::Response>,
        hold_open: Option<bool>,
    ) -> Result<Self, BoxError> {
        let sdl = sdl.unwrap_or_else(|| DEFAULT_SDL.to_string());
        let schema = Schema::parse(&sdl).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|error| error.to_string()).collect();
            format!("invalid test schema: {}", messages.join(", "))
        })?;
        Ok(Self {
            schema,
            fields,
            failing_fields,
            patches,
            hold_open: hold_open.unwrap_or_default(),
            cancellations: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl TestEngine {
    pub fn schema(&self) -> Schema {
        self.schema.clone()
    }

    /// How many incremental deliveries were cancelled.
    pub fn cancellations(&self) -> Arc<AtomicUsize> {
        self.cancellations.clone()
    }

    fn resolve(&self, args: &ExecutionArgs) -> graphql::Response {
        let operation_name = args.operation_name.as_deref();
        let Some(operation) = args.document.operation(operation_name) else {
            let message = match operation_name {
                Some(name) => format!("Unknown operation named \"{name}\"."),
                None => "Must provide operation name if query contains multiple operations."
                    .to_string(),
            };
            return graphql::Response::from_errors(vec![
                graphql::Error::builder().message(message).build(),
            ]);
        };

        let root_type = match OperationKind::from(operation.operation_type) {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        };
        let root_value = args.root_value.clone().unwrap_or(Value::Null);

        let mut data = Object::new();
        let mut errors = Vec::new();
        for selection in &operation.selection_set {
            let ast::Selection::Field(field) = selection else {
                continue;
            };
            let response_key = field.alias.as_ref().unwrap_or(&field.name).as_str();
            let name = field.name.as_str();
            if name == "__typename" {
                data.insert(response_key.to_string(), Value::String(root_type.into()));
                continue;
            }
            if let Some(message) = self.failing_fields.get(name) {
                let mut path = Path::default();
                path.push_key(response_key);
                errors.push(graphql::Error::builder().message(message.clone()).path(path).build());
                data.insert(response_key.to_string(), Value::Null);
                continue;
            }
            let arguments = field_arguments(field, args.variables.as_ref());
            let value = args
                .field_resolver
                .as_ref()
                .and_then(|resolver| resolver(&root_value, name, &arguments))
                .or_else(|| self.fields.get(name).cloned())
                .unwrap_or(Value::Null);
            data.insert(response_key.to_string(), value);
        }

        graphql::Response::builder()
            .data(Value::Object(data))
            .errors(errors)
            .build()
    }
}

/// Literal and variable arguments of a field, as JSON.
fn field_arguments(field: &ast::Field, variables: Option<&Object>) -> Object {
    field
        .arguments
        .iter()
        .map(|argument| {
            let value = match &*argument.value {
                ast::Value::Variable(variable) => variables
                    .and_then(|variables| variables.get(variable.as_str()).cloned())
                    .unwrap_or(Value::Null),
                ast::Value::String(value) => Value::String(value.as_str().into()),
                ast::Value::Boolean(value) => Value::Bool(*value),
                ast::Value::Int(value) => value
                    .try_to_i32()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                ast::Value::Enum(value) => Value::String(value.as_str().into()),
                _ => Value::Null,
            };
            (argument.name.as_str().into(), value)
        })
        .collect()
}

#[async_trait]
impl QueryEngine for TestEngine {
    async fn execute(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError> {
        let response = self.resolve(&args);
        if self.patches.is_empty() {
            return Ok(response.into());
        }

        let mut first = response;
        first.has_next = Some(true);
        let responses: Vec<Result<graphql::Response, BoxError>> = std::iter::once(first)
            .chain(self.patches.iter().cloned())
            .map(Ok)
            .collect();
        let delivery = if self.hold_open {
            stream::iter(responses).chain(stream::pending()).boxed()
        } else {
            stream::iter(responses).boxed()
        };
        let cancellations = self.cancellations.clone();
        Ok(IncrementalStream::new(delivery)
            .with_cancel(move || async move {
                cancellations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .into())
    }
}
