pub mod config;
pub mod controllers;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use services::coordinator::BookingCoordinator;
use store::Store;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub coordinator: BookingCoordinator,
    pub config: config::Config,
}

impl AppState {
    /// Подключается к БД, прогоняет миграции и засевает пул мест.
    pub async fn new(config: config::Config) -> Result<Arc<Self>, error::BookingError> {
        let store = store::connect(&config.database).await?;
        store.provision().await?;
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Arc<dyn Store>, config: config::Config) -> Arc<Self> {
        let coordinator = BookingCoordinator::new(store.clone(), config.booking.clone());
        Arc::new(Self {
            store,
            coordinator,
            config,
        })
    }
}
