//! External channel exposure

pub mod exposure;
pub mod tunnel;
