//! Element inspection: metadata snapshots, ancestor discovery, visibility.
//!
//! All functions are pure over a [`DocumentAccess`]. The only state is the
//! zoom divisor applied to extracted lengths, which lets pages rendered at a
//! browser zoom other than 100% report CSS pixels.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::InspectorConfig;
use crate::dom::{ComputedStyle, DocumentAccess, ElementHandle};
use crate::geometry::{round_px, Axis, Point, Rect};

/// Smallest accepted zoom divisor.
pub const MIN_ZOOM: f64 = 0.1;

/// Largest accepted zoom divisor.
pub const MAX_ZOOM: f64 = 5.0;

/// Rounded size and position of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
    /// Reduced `W:H` ratio, or `N/A`.
    pub aspect_ratio: String,
    pub x: i64,
    pub y: i64,
}

/// Summary of the computed style shown next to an inspected element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSummary {
    pub font_size: String,
    pub line_height: String,
    pub font_family: String,
    pub color: String,
    pub background_color: String,
    pub margin: String,
    pub padding: String,
    pub border: String,
    pub display: String,
    pub position: String,
    pub z_index: String,
    pub line_height_to_font_size_ratio: String,
}

/// Immutable snapshot of an element's identity, geometry, and style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag_name: String,
    pub id: String,
    pub classes: Vec<String>,
    pub dimensions: Dimensions,
    pub computed_styles: StyleSummary,
    pub attributes: BTreeMap<String, String>,
}

/// Box-model property families that collapse to CSS shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxProperty {
    Margin,
    Padding,
    Border,
}

impl BoxProperty {
    fn name(self) -> &'static str {
        match self {
            BoxProperty::Margin => "margin",
            BoxProperty::Padding => "padding",
            BoxProperty::Border => "border",
        }
    }
}

/// Geometry utility bound to one document.
pub struct Inspector {
    document: Rc<dyn DocumentAccess>,
    zoom: Cell<f64>,
    same_size_tolerance: f64,
    max_ancestor_depth: usize,
    reserved_prefix: String,
    overlay_root_attribute: String,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("zoom", &self.zoom.get())
            .field("same_size_tolerance", &self.same_size_tolerance)
            .field("max_ancestor_depth", &self.max_ancestor_depth)
            .finish_non_exhaustive()
    }
}

impl Inspector {
    pub fn new(document: Rc<dyn DocumentAccess>, config: &InspectorConfig) -> Self {
        Self {
            document,
            zoom: Cell::new(config.zoom.clamp(MIN_ZOOM, MAX_ZOOM)),
            same_size_tolerance: config.same_size_tolerance,
            max_ancestor_depth: config.max_ancestor_depth,
            reserved_prefix: config.reserved_prefix.clone(),
            overlay_root_attribute: config.overlay_root_attribute.clone(),
        }
    }

    pub fn document(&self) -> &dyn DocumentAccess {
        self.document.as_ref()
    }

    pub fn zoom(&self) -> f64 {
        self.zoom.get()
    }

    /// Set the zoom divisor, clamped to [`MIN_ZOOM`]..=[`MAX_ZOOM`].
    pub fn set_zoom(&self, zoom: f64) {
        if !zoom.is_finite() {
            warn!("Ignoring non-finite zoom level {}", zoom);
            return;
        }
        self.zoom.set(zoom.clamp(MIN_ZOOM, MAX_ZOOM));
    }

    /// Live layout box of an element.
    pub fn bounding_rect(&self, element: ElementHandle) -> Rect {
        self.document.bounding_rect(element)
    }

    /// Snapshot tag, identity, rounded dimensions, style summary, attributes.
    pub fn element_info(&self, element: ElementHandle) -> ElementInfo {
        let doc = self.document.as_ref();
        let rect = doc.bounding_rect(element);
        let style = doc.computed_style(element);

        ElementInfo {
            tag_name: doc.tag_name(element).unwrap_or_default().to_lowercase(),
            id: doc.id(element),
            classes: doc.classes(element),
            dimensions: self.dimensions(&rect),
            computed_styles: summarize_style(&style),
            attributes: doc.attributes(element).into_iter().collect(),
        }
    }

    fn dimensions(&self, rect: &Rect) -> Dimensions {
        let zoom = self.zoom.get();
        let width = round_px(rect.width / zoom);
        let height = round_px(rect.height / zoom);

        Dimensions {
            width,
            height,
            aspect_ratio: aspect_ratio(width, height),
            x: round_px(rect.x / zoom),
            y: round_px(rect.y / zoom),
        }
    }

    /// First ancestor whose box size differs from the element's.
    ///
    /// Pass-through wrappers with the same box are climbed over, and
    /// `display: contents` ancestors are skipped without comparison since
    /// they have no box. Returns `None` when the root is passed without a
    /// differing ancestor; a depth guard returns the ancestor under
    /// inspection once exhausted.
    pub fn find_ancestor(&self, element: ElementHandle) -> Option<ElementHandle> {
        let doc = self.document.as_ref();
        let mut current_rect = doc.bounding_rect(element);
        let mut candidate = doc.parent(element);
        let mut remaining = self.max_ancestor_depth;

        while let Some(ancestor) = candidate {
            if remaining == 0 {
                debug!(
                    "Ancestor search for {} hit depth limit ({}), stopping at {}",
                    element, self.max_ancestor_depth, ancestor
                );
                return Some(ancestor);
            }
            remaining -= 1;

            if doc.computed_style(ancestor).is_display_contents() {
                candidate = doc.parent(ancestor);
                continue;
            }

            let ancestor_rect = doc.bounding_rect(ancestor);
            if !current_rect.same_size(&ancestor_rect, self.same_size_tolerance) {
                return Some(ancestor);
            }

            current_rect = ancestor_rect;
            candidate = doc.parent(ancestor);
        }

        None
    }

    /// True for elements belonging to the injected overlay.
    pub fn is_extension_element(&self, element: ElementHandle) -> bool {
        let doc = self.document.as_ref();

        doc.closest_with_attribute(element, &self.overlay_root_attribute)
            .is_some()
            || doc.id(element).starts_with(&self.reserved_prefix)
            || doc
                .attribute(element, "class")
                .is_some_and(|c| c.contains(&self.reserved_prefix))
    }

    /// Distance between the origins of two boxes along an axis, in CSS pixels.
    pub fn calculate_distance(&self, a: &Rect, b: &Rect, axis: Axis) -> i64 {
        let distance = match axis {
            Axis::Horizontal => (a.x - b.x).abs(),
            Axis::Vertical => (a.y - b.y).abs(),
        };
        round_px(distance / self.zoom.get())
    }

    /// Rendered with a non-zero box and not hidden by style.
    pub fn is_element_visible(&self, element: ElementHandle) -> bool {
        let rect = self.document.bounding_rect(element);
        let style = self.document.computed_style(element);

        rect.width != 0.0
            && rect.height != 0.0
            && style.get("visibility") != "hidden"
            && style.get("display") != "none"
            && style.opacity() > 0.0
    }

    /// Selector path from just below `<body>` down to the element.
    ///
    /// Each step is `tag#id.class` with `:nth-of-type(n)` appended when
    /// siblings share the tag.
    pub fn element_path(&self, element: ElementHandle) -> Vec<String> {
        let doc = self.document.as_ref();
        let body = doc.body();
        let mut path = Vec::new();

        for el in doc.ancestors(element) {
            if Some(el) == body {
                break;
            }

            let tag = doc.tag_name(el).unwrap_or_default().to_lowercase();
            let mut selector = tag.clone();

            let id = doc.id(el);
            if !id.is_empty() {
                selector.push('#');
                selector.push_str(&id);
            }

            let classes = doc.classes(el);
            if !classes.is_empty() {
                selector.push('.');
                selector.push_str(&classes.join("."));
            }

            if let Some(parent) = doc.parent(el) {
                let same_tag: Vec<ElementHandle> = doc
                    .children(parent)
                    .into_iter()
                    .filter(|s| {
                        doc.tag_name(*s)
                            .is_some_and(|t| t.eq_ignore_ascii_case(&tag))
                    })
                    .collect();
                if same_tag.len() > 1 {
                    if let Some(index) = same_tag.iter().position(|s| *s == el) {
                        selector.push_str(&format!(":nth-of-type({})", index + 1));
                    }
                }
            }

            path.push(selector);
        }

        path.reverse();
        path
    }

    /// Top-most element at a viewport point.
    pub fn element_at_point(&self, point: Point) -> Option<ElementHandle> {
        self.document.element_at_point(point)
    }
}

fn summarize_style(style: &ComputedStyle) -> StyleSummary {
    let font_size = style.get("font-size").to_string();
    let line_height = style.get("line-height").to_string();
    let ratio = line_height_ratio(&font_size, &line_height);

    StyleSummary {
        font_family: style.get("font-family").to_string(),
        color: style.get("color").to_string(),
        background_color: style.get("background-color").to_string(),
        margin: format_box_model(style, BoxProperty::Margin),
        padding: format_box_model(style, BoxProperty::Padding),
        border: format_box_model(style, BoxProperty::Border),
        display: style.get("display").to_string(),
        position: style.get("position").to_string(),
        z_index: style.get("z-index").to_string(),
        line_height_to_font_size_ratio: ratio,
        font_size,
        line_height,
    }
}

/// Greatest common divisor (Euclidean algorithm).
pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Reduce `width:height` to lowest terms, or `N/A` for empty boxes.
pub fn aspect_ratio(width: i64, height: i64) -> String {
    if width <= 0 || height <= 0 {
        return "N/A".to_string();
    }

    let (w, h) = (width as u64, height as u64);
    let divisor = gcd(w, h);
    format!("{}:{}", w / divisor, h / divisor)
}

/// Collapse four edge values to CSS shorthand.
///
/// Margin and padding give 1 value when all edges match, 2 when
/// top/bottom and left/right pair up, 4 otherwise. Border reports
/// width, style, and color.
pub fn format_box_model(style: &ComputedStyle, property: BoxProperty) -> String {
    let name = property.name();

    if property == BoxProperty::Border {
        return format!(
            "{} {} {}",
            style.get("border-width"),
            style.get("border-style"),
            style.get("border-color")
        );
    }

    let top = style.get(&format!("{}-top", name));
    let right = style.get(&format!("{}-right", name));
    let bottom = style.get(&format!("{}-bottom", name));
    let left = style.get(&format!("{}-left", name));

    if top == right && right == bottom && bottom == left {
        return top.to_string();
    }

    if top == bottom && left == right {
        return format!("{} {}", top, right);
    }

    format!("{} {} {} {}", top, right, bottom, left)
}

/// Line height divided by font size, to two decimals.
pub fn line_height_ratio(font_size: &str, line_height: &str) -> String {
    let font_size = match parse_css_number(font_size) {
        Some(size) if size > 0.0 => size,
        _ => return "N/A".to_string(),
    };

    if line_height.trim() == "normal" {
        return "normal (\u{2248}1.2)".to_string();
    }

    match parse_css_number(line_height) {
        Some(height) if height > 0.0 => format!("{:.2}", height / font_size),
        _ => "N/A".to_string(),
    }
}

/// Leading CSS number: sign, digits with optional fraction, optional exponent.
static CSS_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d*\.?\d+(?:[eE][+-]?\d+)?)").expect("CSS number pattern is valid"));

/// Parse the leading number of a CSS value (`"16px"` -> 16.0).
///
/// Trailing units are ignored.
pub fn parse_css_number(value: &str) -> Option<f64> {
    CSS_NUMBER
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
