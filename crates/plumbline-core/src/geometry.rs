//! Rectangles, guide lines, and the distance-line algorithm.
//!
//! Given a measured box (`from`) and a reference box (`to`), the algorithm
//! produces the guide lines drawn between them:
//!
//! | Relationship | Lines | Labels |
//! |--------------|-------|--------|
//! | One box contains the other | 4 | top, left, right, bottom |
//! | Disjoint or partially overlapping | 2 | nearest horizontal + nearest vertical |
//!
//! Locked measurements additionally carry 8 structural guides spanning the
//! viewport. Structural guides use [`STRUCTURAL_DISTANCE`] as their distance.

use serde::{Deserialize, Serialize};

/// Distance value marking a structural guide rather than a measurement.
pub const STRUCTURAL_DISTANCE: i64 = -1;

/// A point in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned box in viewport pixels, as reported by layout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// The box reported for detached or unrendered elements.
    pub const ZERO: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Center of the box.
    pub fn midpoint(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True when the box has no extent at all (detached element).
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 && self.height <= 0.0
    }

    /// True when `other` lies entirely within this box (edges may touch).
    pub fn contains(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.top() >= self.top()
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// True when either box contains the other.
    pub fn is_containing_pair(&self, other: &Rect) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// True when both dimensions differ by less than `tolerance`.
    pub fn same_size(&self, other: &Rect, tolerance: f64) -> bool {
        (self.width - other.width).abs() < tolerance
            && (self.height - other.height).abs() < tolerance
    }

    /// True when the point lies inside the box (edges inclusive).
    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.left()
            && point.x <= self.right()
            && point.y >= self.top()
            && point.y <= self.bottom()
    }
}

/// Which edge a distance line measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Top,
    Left,
    Right,
    Bottom,
}

/// Measurement axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    #[default]
    Horizontal,
    Vertical,
}

/// A guide line ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Edge label; absent for structural guides.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Rounded pixel distance, or [`STRUCTURAL_DISTANCE`].
    pub distance: i64,
    pub color: String,
}

impl Line {
    fn measured(edge: Edge, from: Point, to: Point, distance: f64, color: &str) -> Self {
        Self {
            edge: Some(edge),
            x1: from.x,
            y1: from.y,
            x2: to.x,
            y2: to.y,
            distance: round_px(distance.abs()),
            color: color.to_string(),
        }
    }

    fn structural(from: Point, to: Point, color: &str) -> Self {
        Self {
            edge: None,
            x1: from.x,
            y1: from.y,
            x2: to.x,
            y2: to.y,
            distance: STRUCTURAL_DISTANCE,
            color: color.to_string(),
        }
    }

    /// True for full-width/height alignment guides.
    pub fn is_structural(&self) -> bool {
        self.distance == STRUCTURAL_DISTANCE
    }
}

/// Where guide lines cross the measured box on the cross axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// Follow the live pointer.
    Pointer(Point),
    /// Pin to the center of the measured box.
    Midpoint,
}

impl Anchor {
    fn resolve(self, rect: &Rect) -> Point {
        match self {
            Anchor::Pointer(point) => point,
            Anchor::Midpoint => rect.midpoint(),
        }
    }
}

/// Round to the nearest whole pixel.
#[inline]
pub(crate) fn round_px(value: f64) -> i64 {
    value.round() as i64
}

/// Compute the guide lines between a measured box and a reference box.
///
/// Returns no lines when either box is degenerate, 4 lines for a containing
/// pair, and 2 lines (one per axis) otherwise. Boxes whose edges touch count
/// as overlapping, so they measure to the nearest matching edge rather than
/// reporting a zero gap.
pub fn distance_lines(from: &Rect, to: &Rect, anchor: Anchor, color: &str) -> Vec<Line> {
    if from.is_degenerate() || to.is_degenerate() {
        return Vec::new();
    }

    let Point { x, y } = anchor.resolve(from);

    if from.is_containing_pair(to) {
        return vec![
            Line::measured(
                Edge::Top,
                Point::new(x, from.top()),
                Point::new(x, to.top()),
                from.top() - to.top(),
                color,
            ),
            Line::measured(
                Edge::Left,
                Point::new(from.left(), y),
                Point::new(to.left(), y),
                from.left() - to.left(),
                color,
            ),
            Line::measured(
                Edge::Right,
                Point::new(from.right(), y),
                Point::new(to.right(), y),
                to.right() - from.right(),
                color,
            ),
            Line::measured(
                Edge::Bottom,
                Point::new(x, from.bottom()),
                Point::new(x, to.bottom()),
                to.bottom() - from.bottom(),
                color,
            ),
        ];
    }

    vec![
        nearest_horizontal(from, to, y, color),
        nearest_vertical(from, to, x, color),
    ]
}

fn nearest_horizontal(from: &Rect, to: &Rect, y: f64, color: &str) -> Line {
    if from.right() < to.left() {
        // Measured box sits left of the reference
        return Line::measured(
            Edge::Right,
            Point::new(from.right(), y),
            Point::new(to.left(), y),
            to.left() - from.right(),
            color,
        );
    }

    if from.left() > to.right() {
        return Line::measured(
            Edge::Left,
            Point::new(from.left(), y),
            Point::new(to.right(), y),
            from.left() - to.right(),
            color,
        );
    }

    let left = (from.left() - to.left()).abs();
    let right = (from.right() - to.right()).abs();
    if left <= right {
        Line::measured(
            Edge::Left,
            Point::new(from.left(), y),
            Point::new(to.left(), y),
            left,
            color,
        )
    } else {
        Line::measured(
            Edge::Right,
            Point::new(from.right(), y),
            Point::new(to.right(), y),
            right,
            color,
        )
    }
}

fn nearest_vertical(from: &Rect, to: &Rect, x: f64, color: &str) -> Line {
    if from.bottom() < to.top() {
        // Measured box sits above the reference
        return Line::measured(
            Edge::Bottom,
            Point::new(x, from.bottom()),
            Point::new(x, to.top()),
            to.top() - from.bottom(),
            color,
        );
    }

    if from.top() > to.bottom() {
        return Line::measured(
            Edge::Top,
            Point::new(x, from.top()),
            Point::new(x, to.bottom()),
            from.top() - to.bottom(),
            color,
        );
    }

    let top = (from.top() - to.top()).abs();
    let bottom = (from.bottom() - to.bottom()).abs();
    if top <= bottom {
        Line::measured(
            Edge::Top,
            Point::new(x, from.top()),
            Point::new(x, to.top()),
            top,
            color,
        )
    } else {
        Line::measured(
            Edge::Bottom,
            Point::new(x, from.bottom()),
            Point::new(x, to.bottom()),
            bottom,
            color,
        )
    }
}

/// Full-viewport alignment guides through every edge of both boxes.
///
/// Order: parent top, target top, parent left, target left, parent right,
/// target right, parent bottom, target bottom.
pub fn structural_guides(
    target: &Rect,
    parent: &Rect,
    viewport_width: f64,
    viewport_height: f64,
    color: &str,
) -> Vec<Line> {
    let horizontal = |y: f64| Line::structural(Point::new(0.0, y), Point::new(viewport_width, y), color);
    let vertical = |x: f64| Line::structural(Point::new(x, 0.0), Point::new(x, viewport_height), color);

    vec![
        horizontal(parent.top()),
        horizontal(target.top()),
        vertical(parent.left()),
        vertical(target.left()),
        vertical(parent.right()),
        vertical(target.right()),
        horizontal(parent.bottom()),
        horizontal(target.bottom()),
    ]
}
