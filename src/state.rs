//! Shared application state for all routes. Immutable after startup.

use crate::config::ResolvedModel;
use crate::service::ResourceService;
use crate::settings::Settings;
use crate::store::ResourceStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub model: Arc<ResolvedModel>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn ResourceStore>, model: ResolvedModel, settings: Settings) -> Self {
        AppState {
            store,
            model: Arc::new(model),
            settings: Arc::new(settings),
        }
    }

    pub fn service(&self) -> ResourceService {
        ResourceService::new(self.store.clone(), self.model.clone())
    }
}
