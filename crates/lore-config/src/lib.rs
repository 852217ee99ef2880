//! Configuration system for the Lore knowledge engine.
//!
//! Provides TOML-based configuration with:
//! - One section per engine component (`[retrieval]`, `[dedup]`, `[merge]`, ...)
//! - Defaults for every field, so partial files are valid
//! - Config file layering (XDG user config + project-local `lore.toml`)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, default_database_path, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
