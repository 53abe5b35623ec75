//! SettingsStore - persistent user settings for the agent UI
//!
//! Settings are a JSON document with built-in defaults. A settings file on
//! disk only needs the keys it overrides: loading deep-merges the file over
//! the defaults, so new default keys appear automatically.
//!
//! # Example
//!
//! ```ignore
//! use settingsstore::SettingsStore;
//!
//! let mut store = SettingsStore::open("config/ui_settings.json")?;
//! let temperature = store.get("model.temperature");
//! store.set("ui.theme", "light".into())?;
//! store.save()?;
//! ```

mod store;

pub use store::{SettingsStore, default_settings, default_settings_path};
