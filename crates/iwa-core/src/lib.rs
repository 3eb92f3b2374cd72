pub mod config;
pub mod discovery;
pub mod execution;
pub mod fetch;
pub mod install;
pub mod manager;
pub mod manifest;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod sqlite;
pub mod staging;

pub use config::{FeatureToggles, UpdateManagerConfig};
pub use manager::UpdateManager;
