pub mod api;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod model;
pub mod outbox;
pub mod store;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use usergraph_core::{Module, ServiceError, UserDirectory};
use usergraph_sql::SQLStore;

use emitter::NotificationEmitter;
use engine::FollowingEngine;
use worker::{Dispatcher, DispatcherConfig};

pub use error::FollowingError;

/// The Following module: follow requests, the follower graph and the
/// notification outbox.
///
/// Creating the module starts the outbox dispatcher, so it must be built
/// inside a tokio runtime.
pub struct FollowingModule {
    engine: Arc<FollowingEngine>,
    dispatcher: Dispatcher,
}

impl FollowingModule {
    pub fn new(
        db: Arc<dyn SQLStore>,
        directory: Arc<dyn UserDirectory>,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Result<Self, ServiceError> {
        Self::with_config(db, directory, emitter, DispatcherConfig::default())
    }

    pub fn with_config(
        db: Arc<dyn SQLStore>,
        directory: Arc<dyn UserDirectory>,
        emitter: Arc<dyn NotificationEmitter>,
        config: DispatcherConfig,
    ) -> Result<Self, ServiceError> {
        let engine = Arc::new(FollowingEngine::new(db, directory)?);
        let dispatcher = worker::start(Arc::clone(&engine), emitter, config);

        Ok(Self { engine, dispatcher })
    }

    pub fn engine(&self) -> &Arc<FollowingEngine> {
        &self.engine
    }

    /// Stop the dispatcher after its current pass. Undelivered notifications
    /// stay in the outbox.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

impl Module for FollowingModule {
    fn name(&self) -> &str {
        "following"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.engine))
    }
}
