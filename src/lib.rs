// Core modules
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::SandboxEngine;
pub use error::EngineError;
pub use models::*;

pub type Result<T> = std::result::Result<T, EngineError>;
