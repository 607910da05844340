//! Inspector configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! is a valid configuration. Unknown fields are rejected to catch typos.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keys::{KeyBinding, Modifier};

/// Default color shared by every guide line.
pub const DEFAULT_GUIDE_COLOR: &str = "#bbf451";

/// Default message history capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// The two shortcuts the tracker registry owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bindings {
    pub clear_all: String,
    pub toggle_lock: String,
}

impl Default for Bindings {
    fn default() -> Self {
        Self {
            clear_all: "Escape".to_string(),
            toggle_lock: "Alt+L".to_string(),
        }
    }
}

impl Bindings {
    pub fn clear_all(&self) -> Result<KeyBinding, ConfigError> {
        parse_binding("clear_all", &self.clear_all)
    }

    pub fn toggle_lock(&self) -> Result<KeyBinding, ConfigError> {
        parse_binding("toggle_lock", &self.toggle_lock)
    }
}

fn parse_binding(field: &str, value: &str) -> Result<KeyBinding, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("bindings.{}: {}", field, e)))
}

/// Tunables for one content context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectorConfig {
    /// Page zoom divisor applied to every extracted length.
    pub zoom: f64,
    pub guide_color: String,
    /// Boxes whose width and height both differ by less than this are the same size.
    pub same_size_tolerance: f64,
    pub max_ancestor_depth: usize,
    /// Id/class prefix marking the overlay's own elements.
    pub reserved_prefix: String,
    /// Attribute set on the overlay's root element.
    pub overlay_root_attribute: String,
    /// URL scheme that identifies the control surface.
    pub extension_scheme: String,
    pub history_capacity: usize,
    /// Held while locked to measure against another element.
    pub alt_target_modifier: Modifier,
    pub bindings: Bindings,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            guide_color: DEFAULT_GUIDE_COLOR.to_string(),
            same_size_tolerance: 2.0,
            max_ancestor_depth: 20,
            reserved_prefix: "plumbline-".to_string(),
            overlay_root_attribute: "data-plumbline-root".to_string(),
            extension_scheme: "chrome-extension".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alt_target_modifier: Modifier::Alt,
            bindings: Bindings::default(),
        }
    }
}

impl InspectorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "zoom must be a positive number, got {}",
                self.zoom
            )));
        }
        if !(self.same_size_tolerance.is_finite() && self.same_size_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(
                "same_size_tolerance must be zero or positive".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.reserved_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "reserved_prefix must not be empty".to_string(),
            ));
        }
        self.bindings.clear_all()?;
        self.bindings.toggle_lock()?;
        Ok(())
    }
}
