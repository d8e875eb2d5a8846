//! Engine configuration: the settings document, its environment overlay
//! and a shared handle for live replacement.

mod settings_env;
mod settings_handle;
mod settings_model;

pub use settings_handle::SettingsHandle;
pub use settings_model::*;
