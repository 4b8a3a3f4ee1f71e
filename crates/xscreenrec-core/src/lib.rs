pub mod config;
pub mod errors;
pub mod types;

pub use config::{RecorderSettings, SessionConfig};
pub use errors::{ConfigError, EncodingError, RecorderError, ResourceError};
pub use types::*;
