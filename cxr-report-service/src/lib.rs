pub mod agents;
pub mod config;
pub mod export;
pub mod records;
pub mod service;
pub mod terminal;

pub use config::{Config, ConfigError};
pub use service::{AppState, build_driver, build_router, create_app, create_app_state};
