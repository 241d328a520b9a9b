//! Deployment module

pub mod fsm;
pub mod lifecycle;
pub mod patch;
pub mod runtime;
