//! Keyboard shortcut parsing and matching.
//!
//! Bindings are written the way users type them: `Escape`, `Alt+L`,
//! `Ctrl+Shift+K`. Matching is case-insensitive on the key and exact on the
//! modifier set, so `Alt+L` does not fire for `Ctrl+Alt+L`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::KeydownPayload;
use crate::telemetry::Modifiers;

/// A single modifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Alt,
    Ctrl,
    Meta,
    Shift,
}

/// A key plus the exact set of modifiers that must be held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    key: String,
    modifiers: Modifiers,
}

/// Why a binding string was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBindingError(String);

impl fmt::Display for ParseBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key binding '{}'", self.0)
    }
}

impl std::error::Error for ParseBindingError {}

impl KeyBinding {
    /// Normalized key name (lowercase).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// True when the keydown is this key with exactly these modifiers.
    pub fn matches(&self, event: &KeydownPayload) -> bool {
        normalize_key(&event.key) == self.key && event.modifiers == self.modifiers
    }
}

fn normalize_key(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "esc" => "escape".to_string(),
        "space" | "spacebar" => " ".to_string(),
        "del" => "delete".to_string(),
        other => other.to_string(),
    }
}

impl FromStr for KeyBinding {
    type Err = ParseBindingError;

    fn from_str(binding: &str) -> Result<Self, Self::Err> {
        let mut modifiers = Modifiers::default();
        let mut key: Option<&str> = None;

        for part in binding.split('+').map(str::trim) {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" | "option" => modifiers.alt = true,
                "meta" | "cmd" | "command" | "super" => modifiers.meta = true,
                "shift" => modifiers.shift = true,
                "" => return Err(ParseBindingError(binding.to_string())),
                _ if key.is_some() => return Err(ParseBindingError(binding.to_string())),
                _ => key = Some(part),
            }
        }

        let key = key.ok_or_else(|| ParseBindingError(binding.to_string()))?;
        Ok(Self {
            key: normalize_key(key),
            modifiers,
        })
    }
}

impl fmt::Display for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (held, name) in [
            (m.ctrl, "Ctrl"),
            (m.alt, "Alt"),
            (m.meta, "Meta"),
            (m.shift, "Shift"),
        ] {
            if held {
                write!(f, "{}+", name)?;
            }
        }
        match self.key.as_str() {
            " " => write!(f, "Space"),
            key => {
                let mut chars = key.chars();
                match chars.next() {
                    Some(first) => write!(f, "{}{}", first.to_uppercase(), chars.as_str()),
                    None => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keydown(key: &str, modifiers: Modifiers) -> KeydownPayload {
        KeydownPayload {
            key: key.to_string(),
            modifiers,
        }
    }

    #[test]
    fn parse_single_key() {
        let binding: KeyBinding = "Escape".parse().unwrap();
        assert_eq!(binding.key(), "escape");
        assert_eq!(binding.modifiers(), Modifiers::default());
    }

    #[test]
    fn parse_combo() {
        let binding: KeyBinding = "Ctrl+Shift+K".parse().unwrap();
        assert_eq!(binding.key(), "k");
        assert!(binding.modifiers().ctrl);
        assert!(binding.modifiers().shift);
        assert!(!binding.modifiers().alt);
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("Esc".parse::<KeyBinding>().unwrap().key(), "escape");
        assert!("Cmd+S".parse::<KeyBinding>().unwrap().modifiers().meta);
        assert!("Option+L".parse::<KeyBinding>().unwrap().modifiers().alt);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("".parse::<KeyBinding>().is_err());
        assert!("Ctrl+".parse::<KeyBinding>().is_err());
        assert!("Alt".parse::<KeyBinding>().is_err());
        assert!("A+B".parse::<KeyBinding>().is_err());
    }

    #[test]
    fn matches_exact_modifiers() {
        let binding: KeyBinding = "Alt+L".parse().unwrap();
        let alt = Modifiers {
            alt: true,
            ..Modifiers::default()
        };
        let ctrl_alt = Modifiers {
            ctrl: true,
            ..alt
        };

        assert!(binding.matches(&keydown("l", alt)));
        assert!(binding.matches(&keydown("L", alt)));
        assert!(!binding.matches(&keydown("l", Modifiers::default())));
        assert!(!binding.matches(&keydown("l", ctrl_alt)));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for text in ["Escape", "Alt+L", "Ctrl+Shift+K", "Space"] {
            let binding: KeyBinding = text.parse().unwrap();
            assert_eq!(binding.to_string(), text);
        }
    }
}
