pub mod config;
pub mod models;
pub mod ports;

pub use config::*;
pub use models::*;
pub use ports::*;

pub use microcore_errors::{MicrocoreError, MicrocoreResult};
