pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod prompt;
pub mod quotes;
pub mod services;
pub mod session;
pub mod traits;
