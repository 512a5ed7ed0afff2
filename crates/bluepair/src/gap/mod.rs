//! Device addressing shared with the Security Manager.
pub mod types;

pub use types::*;
