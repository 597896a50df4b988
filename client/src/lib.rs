//! Desktop side of finchvoice: cpal audio devices and the TOML config the
//! `finchvoice` binary runs from.

pub mod audio;
pub mod config;

pub use config::{AudioSettings, ClientConfig, ConfigError};
