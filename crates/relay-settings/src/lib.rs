//! # relay-settings
//!
//! Layered configuration for relay nodes, in priority order:
//! 1. compiled defaults ([`RelaySettings::default()`])
//! 2. `~/.relay/settings.json`, or the path given with `--config`, deep-merged
//!    over the defaults
//! 3. `RELAY_*` environment variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings_from_path, load_with_overrides, parse_dispatchers, settings_path,
    validate,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(validate(&RelaySettings::default()).is_ok());
    }

    #[test]
    fn settings_path_is_under_relay_dir() {
        let path = settings_path();
        assert!(path.ends_with(".relay/settings.json"));
    }
}
