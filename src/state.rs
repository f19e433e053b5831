use std::sync::Arc;

use crate::{
    backend::ChatBackend, catalog::ModelIdentity, config::ProxyConfig, metrics::AppMetrics,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub model: Arc<ModelIdentity>,
    pub backend: Arc<dyn ChatBackend>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new<B>(config: ProxyConfig, backend: Arc<B>) -> Self
    where
        B: ChatBackend + 'static,
    {
        let backend: Arc<dyn ChatBackend> = backend;
        let model = ModelIdentity::from_backend_model(&config.backend.model);
        Self {
            config: Arc::new(config),
            model: Arc::new(model),
            backend,
            metrics: Arc::new(AppMetrics::new()),
        }
    }

    /// Built from defaults only, so tests never depend on the host environment.
    pub fn new_for_tests<B>(backend: Arc<B>) -> Self
    where
        B: ChatBackend + 'static,
    {
        Self::new(ProxyConfig::from_lookup(|_| None), backend)
    }
}
