//! Serves GraphQL over HTTP.
//!
//! [`GraphQLHttp`] is a [`tower::Service`] turning HTTP requests into GraphQL operations run by a
//! [`QueryEngine`], and their results into JSON, `multipart/mixed` incremental responses, or the
//! GraphiQL explorer page.

#![warn(unreachable_pub)]

pub mod json_ext;

mod axum_factory;
pub mod body;
pub mod cache;
mod configuration;
mod emitter;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod graphql;
pub mod negotiation;
pub mod options;
pub mod params;
mod pipeline;
mod service;
pub mod test_harness;

pub use body::ParsedBody;
pub use cache::DocumentCache;
pub use cache::InMemoryDocumentCache;
pub use configuration::Configuration;
pub use configuration::ConfigurationError;
pub use emitter::FormattedIncremental;
pub use emitter::FormattedResponse;
pub use emitter::ResponseBody;
pub use engine::Document;
pub use engine::ExecutionArgs;
pub use engine::ExecutionResult;
pub use engine::IncrementalStream;
pub use engine::QueryEngine;
pub use engine::Schema;
pub use error::HttpError;
pub use error::RequestError;
pub use explorer::ExplorerConfig;
pub use explorer::ExplorerOptions;
pub use options::Options;
pub use options::OptionsData;
pub use options::OptionsFactory;
pub use params::RequestParams;
pub use service::GraphQLHttp;
