//! Users module: profiles, block lists and notification preferences.
//!
//! The service doubles as the [`UserDirectory`](usergraph_core::UserDirectory)
//! that the following module reads from.
//!
//! ```ignore
//! let module = users::UsersModule::new(sql)?;
//! let directory: Arc<dyn UserDirectory> = module.service().clone();
//! let router = module.routes(); // Mount under /users
//! ```

pub mod api;
pub mod model;
pub mod service;

use std::sync::Arc;

use axum::Router;

use usergraph_core::{Module, ServiceError};
use usergraph_sql::SQLStore;

use crate::service::UsersService;

pub struct UsersModule {
    service: Arc<UsersService>,
}

impl UsersModule {
    pub fn new(sql: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        let service = UsersService::new(sql).map_err(ServiceError::from)?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &Arc<UsersService> {
        &self.service
    }
}

impl Module for UsersModule {
    fn name(&self) -> &str {
        "users"
    }

    fn routes(&self) -> Router {
        api::build_router(self.service.clone())
    }
}
