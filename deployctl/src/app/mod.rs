//! Controller application layer

pub mod options;
pub mod run;
