pub mod adapter;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;

pub use adapter::StoreTupleReader;
pub use config::{AppConfig, ConfigError};
pub use error::ApiError;
pub use logging::init_logging;
pub use service::{
    AuthzService, CheckPermissionInput, CheckPermissionOutput, Consistency, ReloadSchemaOutput,
};
