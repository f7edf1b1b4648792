pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod registry;
pub mod store;
pub mod ws;

use std::sync::Arc;

use axum::{Router, extract::FromRef, routing::get};
use tower_http::cors::CorsLayer;

pub use codec::{Event, Kind};
pub use config::Config;
pub use error::{CodecError, IngestError, SendError, StoreError};
pub use hub::{Hub, Session};
pub use registry::{ConnectionId, Registry};
pub use store::{MessageStore, SqliteStore};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            hub: Arc::new(Hub::new(store)),
        }
    }
}

/// WebSocket relay on `/` and `/ws`.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::relay_ws))
        .route("/ws", get(ws::relay_ws))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}
