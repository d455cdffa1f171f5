pub mod config;
pub mod structured_logging;

pub use config::{env_override, env_override_u64, load_config, parse_config, ENV_PREFIX};
pub use structured_logging::{
    init_structured_logging, JsonFormatter, LoggingConfig, OperationTimer, StructuredLogEntry,
};
