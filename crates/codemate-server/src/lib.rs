mod http;

pub use http::{app_router, serve};

use std::sync::Arc;

use codemate_core::{Engine, EventHub, Store, ToolRunner};

/// Application-scoped values threaded through every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub hub: EventHub,
    pub engine: Engine,
}

impl AppState {
    pub fn new(store: Arc<Store>, hub: EventHub, runner: Arc<dyn ToolRunner>) -> Self {
        let engine = Engine::new(store.clone(), hub.clone(), runner);
        Self { store, hub, engine }
    }
}
