use std::sync::Arc;

use crate::{config::Config, database::Database, realtime::Hub};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub hub: Hub,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            hub: Hub::new(),
        }
    }
}
