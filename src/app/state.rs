//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomConfig;
use crate::registry::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let room_config = RoomConfig {
            idle_timeout: config.room_idle_timeout,
            ..RoomConfig::default()
        };

        Self {
            config,
            registry: Arc::new(RoomRegistry::new(room_config)),
        }
    }
}
