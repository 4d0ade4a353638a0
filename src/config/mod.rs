pub mod env;
mod loader;

pub use env::{AppConfig, OpenRouterConfig};
pub use loader::load_config;
