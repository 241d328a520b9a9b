//! BookAI deployment controller
//!
//! Rebuilds the service containers, manages the `.env` file they read at
//! startup and exposes them to chat channels through webhooks or tunnels.

pub mod announce;
pub mod app;
pub mod channels;
pub mod console;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
