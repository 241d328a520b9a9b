//! Persistent configuration

pub mod env_file;
pub mod settings;
