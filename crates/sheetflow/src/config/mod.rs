pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, load_from_env, validate_config,
    CONFIG_PATH_ENV,
};
pub use schema::{ApiConfig, Config, QueueWorkerConfig, UploadConfig, WorkersConfig};
