pub mod auth;
pub mod chat;
pub mod config;
pub mod config_manager;
pub mod discovery;
pub mod errors;
pub mod middleware;
pub mod providers;
pub mod server;
pub mod usage;

// Re-export commonly used types for easier access
pub use config::{Config, load_config};
pub use errors::{AppError, AppResult};
pub use server::{AppState, create_app, start_server};
