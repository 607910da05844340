//! Execution contexts and addressing.
//!
//! The tool runs in three isolated contexts that never share memory:
//!
//! | Context | Runs in | Identified by |
//! |---------|---------|---------------|
//! | `background` | privileged worker | no document |
//! | `content` | overlay injected into a page | any other document |
//! | `popup` | control surface | document on the extension scheme |
//!
//! A message is addressed to a [`ContextSet`], not a single context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Background,
    Content,
    Popup,
}

impl ContextKind {
    pub const ALL: [ContextKind; 3] = [ContextKind::Background, ContextKind::Content, ContextKind::Popup];

    /// Work out which context we are from the hosting document's URL.
    ///
    /// `extension_scheme` is compared without its trailing colon, so both
    /// `chrome-extension` and `chrome-extension:` work.
    pub fn identify(document_url: Option<&str>, extension_scheme: &str) -> Self {
        let Some(url) = document_url else {
            return ContextKind::Background;
        };

        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or_default();
        let wanted = extension_scheme.trim_end_matches(':');
        if !scheme.is_empty() && scheme.eq_ignore_ascii_case(wanted) {
            ContextKind::Popup
        } else {
            ContextKind::Content
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Background => "background",
            ContextKind::Content => "content",
            ContextKind::Popup => "popup",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(ContextKind::Background),
            "content" => Ok(ContextKind::Content),
            "popup" => Ok(ContextKind::Popup),
            other => Err(format!("unknown context '{}'", other)),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A set of contexts. Serializes as `{"content": true}` with false members omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextSet {
    #[serde(default, skip_serializing_if = "is_false")]
    pub background: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub content: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub popup: bool,
}

impl ContextSet {
    pub const ALL: ContextSet = ContextSet {
        background: true,
        content: true,
        popup: true,
    };

    pub const NONE: ContextSet = ContextSet {
        background: false,
        content: false,
        popup: false,
    };

    /// A set holding exactly one context.
    #[must_use]
    pub fn only(kind: ContextKind) -> Self {
        Self::NONE.with(kind)
    }

    #[must_use]
    pub fn with(mut self, kind: ContextKind) -> Self {
        match kind {
            ContextKind::Background => self.background = true,
            ContextKind::Content => self.content = true,
            ContextKind::Popup => self.popup = true,
        }
        self
    }

    pub fn contains(&self, kind: ContextKind) -> bool {
        match kind {
            ContextKind::Background => self.background,
            ContextKind::Content => self.content,
            ContextKind::Popup => self.popup,
        }
    }

    /// Members in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = ContextKind> + '_ {
        ContextKind::ALL.into_iter().filter(|k| self.contains(*k))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single member, when the set holds exactly one context.
    pub fn single(&self) -> Option<ContextKind> {
        let mut members = self.iter();
        match (members.next(), members.next()) {
            (Some(kind), None) => Some(kind),
            _ => None,
        }
    }
}

impl From<ContextKind> for ContextSet {
    fn from(kind: ContextKind) -> Self {
        ContextSet::only(kind)
    }
}

impl FromIterator<ContextKind> for ContextSet {
    fn from_iter<I: IntoIterator<Item = ContextKind>>(iter: I) -> Self {
        iter.into_iter().fold(ContextSet::NONE, ContextSet::with)
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|k| k.as_str()).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}
