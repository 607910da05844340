//! Document Access capability.
//!
//! The inspector never touches a real rendering engine. Everything it needs
//! from a page (hit testing, layout boxes, computed style, attributes, tree
//! structure) goes through [`DocumentAccess`], so the geometry logic runs
//! unchanged against a browser binding or against [`StaticDocument`].
//!
//! Detached elements are not an error: implementations report
//! [`Rect::ZERO`] and an empty style for them.

pub mod memory;

pub use memory::{StaticDocument, StaticNode};

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{Point, Rect};

/// Opaque, copyable reference to an element in a document.
///
/// Handles are what travel inside `ELEMENT_HOVER` payloads; they are only
/// meaningful to the context that owns the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u64);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element:{}", self.0)
    }
}

impl From<u64> for ElementHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Resolved CSS property values for one element.
///
/// Lookups mirror `getPropertyValue`: a missing property reads as "".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputedStyle {
    properties: BTreeMap<String, String>,
}

impl ComputedStyle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(property.into(), value.into());
    }

    /// Value of a property, or "" when unset.
    pub fn get(&self, property: &str) -> &str {
        self.properties.get(property).map_or("", String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// `display: contents` boxes generate no layout box of their own.
    pub fn is_display_contents(&self) -> bool {
        self.get("display").trim() == "contents"
    }

    /// Opacity as a number; unset or unparseable reads as fully opaque.
    pub fn opacity(&self) -> f64 {
        crate::inspect::parse_css_number(self.get("opacity")).unwrap_or(1.0)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ComputedStyle {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Narrow view of a live document used by the inspector.
pub trait DocumentAccess {
    /// Top-most element whose box contains the point.
    fn element_at_point(&self, point: Point) -> Option<ElementHandle>;

    /// Layout box in viewport coordinates; [`Rect::ZERO`] when detached.
    fn bounding_rect(&self, element: ElementHandle) -> Rect;

    /// Computed style; empty when detached.
    fn computed_style(&self, element: ElementHandle) -> ComputedStyle;

    /// Tag name as stored by the document (any case); `None` when unknown.
    fn tag_name(&self, element: ElementHandle) -> Option<String>;

    /// Attributes as name/value pairs, in document order.
    fn attributes(&self, element: ElementHandle) -> Vec<(String, String)>;

    /// Parent element; `None` for the root or a detached element.
    fn parent(&self, element: ElementHandle) -> Option<ElementHandle>;

    /// Element children in document order.
    fn children(&self, element: ElementHandle) -> Vec<ElementHandle>;

    /// Whether the element is still part of the document.
    fn is_connected(&self, element: ElementHandle) -> bool;

    /// The `<body>` element, if the document has one.
    fn body(&self) -> Option<ElementHandle>;

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.attributes(element)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The `id` attribute, or "".
    fn id(&self, element: ElementHandle) -> String {
        self.attribute(element, "id").unwrap_or_default()
    }

    /// Whitespace-separated entries of the `class` attribute.
    fn classes(&self, element: ElementHandle) -> Vec<String> {
        self.attribute(element, "class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The element followed by its ancestors, nearest first.
    ///
    /// Stops at the first repeat, so a looping parent chain still ends.
    fn ancestors(&self, element: ElementHandle) -> Vec<ElementHandle> {
        let mut chain = vec![element];
        let mut seen = HashSet::from([element]);
        let mut current = element;

        while let Some(parent) = self.parent(current) {
            if !seen.insert(parent) {
                warn!("Parent chain of {} loops back to {}", element, parent);
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Inclusive containment: an element contains itself.
    fn contains(&self, ancestor: ElementHandle, descendant: ElementHandle) -> bool {
        self.ancestors(descendant).contains(&ancestor)
    }

    /// Nearest inclusive ancestor carrying the attribute.
    fn closest_with_attribute(&self, element: ElementHandle, name: &str) -> Option<ElementHandle> {
        self.ancestors(element)
            .into_iter()
            .find(|el| self.attribute(*el, name).is_some())
    }
}
