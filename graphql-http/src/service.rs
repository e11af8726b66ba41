//! The GraphQL over HTTP service.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body::Body;
use tower::BoxError;
use tower::Service;

use crate::configuration::Configuration;
use crate::emitter::ResponseBody;
use crate::engine::QueryEngine;
use crate::options::Options;
use crate::pipeline::process_request;

/// Serves GraphQL over HTTP for any framework speaking [`http`] types.
///
/// Every failure is turned into an HTTP response, the service itself never fails.
#[derive(Clone)]
pub struct GraphQLHttp {
    engine: Arc<dyn QueryEngine>,
    options: Options,
    pub(crate) configuration: Arc<Configuration>,
}

impl GraphQLHttp {
    pub fn new(engine: impl QueryEngine, options: impl Into<Options>) -> Self {
        Self::from_shared(Arc::new(engine), options)
    }

    /// Builds the service around an engine shared with other services.
    pub fn from_shared(engine: Arc<dyn QueryEngine>, options: impl Into<Options>) -> Self {
        Self {
            engine,
            options: options.into(),
            configuration: Arc::new(Configuration::default()),
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Arc::new(configuration);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

impl fmt::Debug for GraphQLHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphQLHttp")
            .field("options", &self.options)
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

impl<B> Service<http::Request<B>> for GraphQLHttp
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    type Response = http::Response<ResponseBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let engine = self.engine.clone();
        let options = self.options.clone();
        let configuration = self.configuration.clone();
        Box::pin(async move { Ok(process_request(engine, options, configuration, request).await) })
    }
}
