//! Data models

pub mod dataset;
pub mod user;

pub use dataset::*;
pub use user::*;
