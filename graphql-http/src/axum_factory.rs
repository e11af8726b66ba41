//! Mounting the service on an axum router.

use axum::Router;

use crate::configuration::ConfigurationError;
use crate::service::GraphQLHttp;

impl GraphQLHttp {
    /// A router serving GraphQL on the configured endpoint.
    pub fn into_router(self) -> Result<Router, ConfigurationError> {
        self.configuration.validate()?;
        let endpoint = self.configuration.endpoint.clone();
        Ok(Router::new().route_service(&endpoint, self))
    }
}
