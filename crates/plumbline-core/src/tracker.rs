//! Tracker: one measured element pair and its guide lines.
//!
//! # State machine
//!
//! | State | On hover | On pointer move |
//! |-------|----------|-----------------|
//! | unlocked | hovered element becomes `target`, its ancestor `parent_of_target` | lines follow the pointer |
//! | locked | with the alt-target modifier held, hovered element becomes `hovered_alt_target` | nothing |
//!
//! [`Tracker::toggle_lock`] is the only transition. Unlocking clears the
//! alt target.
//!
//! # Recompute
//!
//! A spawned tracker watches the telemetry store and recomputes
//! synchronously:
//!
//! | Change | Effect |
//! |--------|--------|
//! | pointer | [`Tracker::update_lines`] |
//! | scroll, while locked | [`Tracker::update_tracker_position`] |
//! | viewport, once measured | [`Tracker::update_tracker_position`] |
//! | lock toggle | lines, then locked lines |

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::{MessageBus, Subscription};
use crate::dom::ElementHandle;
use crate::geometry::{distance_lines, structural_guides, Anchor, Line, Point, Rect};
use crate::inspect::{ElementInfo, Inspector};
use crate::keys::Modifier;
use crate::protocol::{MessageKind, Payload};
use crate::telemetry::{TelemetryChange, TelemetryStore, TelemetryWatch};

/// Snapshot of one tracked element.
///
/// Never mutated in place: re-sampling or recomputing lines produces a new
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerTargetMetaData {
    pub bounds: Rect,
    pub dom_element: ElementHandle,
    pub properties: ElementInfo,
    /// Inline style positioning the highlight box over the element.
    pub overlay_styles: String,
    pub distance_lines: Vec<Line>,
}

impl TrackerTargetMetaData {
    #[must_use]
    pub fn with_distance_lines(self, distance_lines: Vec<Line>) -> Self {
        Self {
            distance_lines,
            ..self
        }
    }
}

/// Inline style for a highlight box covering `bounds`.
pub fn overlay_styles(bounds: &Rect) -> String {
    format!(
        "width: {}px; height: {}px; transform: translate({}px, {}px);",
        bounds.width, bounds.height, bounds.x, bounds.y
    )
}

/// Shared handles every tracker in a context reads.
#[derive(Clone)]
pub struct TrackerEnv {
    pub inspector: Rc<Inspector>,
    pub telemetry: Rc<TelemetryStore>,
    pub guide_color: String,
    pub alt_target_modifier: Modifier,
}

impl std::fmt::Debug for TrackerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerEnv")
            .field("guide_color", &self.guide_color)
            .field("alt_target_modifier", &self.alt_target_modifier)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a tracker, as read by a renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub id: String,
    pub is_locked: bool,
    pub is_visible: bool,
    pub target: Option<TrackerTargetMetaData>,
    pub parent_of_target: Option<TrackerTargetMetaData>,
    pub hovered_alt_target: Option<TrackerTargetMetaData>,
    pub lines: Vec<Line>,
    pub locked_lines: Vec<Line>,
}

#[derive(Debug)]
pub struct Tracker {
    id: String,
    is_locked: bool,
    is_visible: bool,
    target: Option<TrackerTargetMetaData>,
    parent_of_target: Option<TrackerTargetMetaData>,
    hovered_alt_target: Option<TrackerTargetMetaData>,
    locked_lines: Vec<Line>,
    env: TrackerEnv,
    subscription: Option<Subscription>,
    watch: Option<TelemetryWatch>,
}

/// New tracker id, `tracker-<uuid>`.
pub fn new_tracker_id() -> String {
    format!("tracker-{}", uuid::Uuid::new_v4())
}

impl Tracker {
    /// A detached tracker: unlocked, visible, reacting only to direct calls.
    pub fn new(id: impl Into<String>, env: TrackerEnv) -> Self {
        Self {
            id: id.into(),
            is_locked: false,
            is_visible: true,
            target: None,
            parent_of_target: None,
            hovered_alt_target: None,
            locked_lines: Vec::new(),
            env,
            subscription: None,
            watch: None,
        }
    }

    /// Create a tracker wired to hover messages and telemetry changes.
    ///
    /// The wiring holds only weak references; dropping the last `Rc`
    /// unsubscribes it.
    pub fn spawn(id: impl Into<String>, env: TrackerEnv, bus: &MessageBus) -> Rc<RefCell<Tracker>> {
        let telemetry = env.telemetry.clone();
        let tracker = Rc::new(RefCell::new(Tracker::new(id, env)));

        let weak = Rc::downgrade(&tracker);
        let subscription = bus.subscribe(MessageKind::ElementHover, move |message| {
            if let Payload::ElementHover { element } = message.payload {
                with_tracker(&weak, |t| t.handle_hover(element));
            }
            Ok(())
        });

        let weak = Rc::downgrade(&tracker);
        let watch = telemetry.watch(move |change| {
            with_tracker(&weak, |t| t.on_telemetry(change));
        });

        {
            let mut t = tracker.borrow_mut();
            t.subscription = Some(subscription);
            t.watch = Some(watch);
        }
        tracker
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.is_visible = visible;
    }

    pub fn target(&self) -> Option<&TrackerTargetMetaData> {
        self.target.as_ref()
    }

    pub fn parent_of_target(&self) -> Option<&TrackerTargetMetaData> {
        self.parent_of_target.as_ref()
    }

    pub fn hovered_alt_target(&self) -> Option<&TrackerTargetMetaData> {
        self.hovered_alt_target.as_ref()
    }

    pub fn locked_lines(&self) -> &[Line] {
        &self.locked_lines
    }

    /// Current measurement lines: target to parent, then target to alt target.
    pub fn lines(&self) -> Vec<Line> {
        [&self.parent_of_target, &self.hovered_alt_target]
            .into_iter()
            .flatten()
            .flat_map(|meta| meta.distance_lines.iter().cloned())
            .collect()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            id: self.id.clone(),
            is_locked: self.is_locked,
            is_visible: self.is_visible,
            target: self.target.clone(),
            parent_of_target: self.parent_of_target.clone(),
            hovered_alt_target: self.hovered_alt_target.clone(),
            lines: self.lines(),
            locked_lines: self.locked_lines.clone(),
        }
    }

    /// Flip between locked and unlocked, then recompute.
    pub fn toggle_lock(&mut self) {
        self.is_locked = !self.is_locked;
        if !self.is_locked {
            self.hovered_alt_target = None;
        }
        debug!("Tracker {} {}", self.id, if self.is_locked { "locked" } else { "unlocked" });

        self.update_lines();
        self.update_locked_lines();
    }

    /// Lock or unlock; a no-op when already in that state.
    pub fn set_locked(&mut self, locked: bool) {
        if self.is_locked != locked {
            self.toggle_lock();
        }
    }

    /// React to the pointer entering an element.
    pub fn handle_hover(&mut self, element: ElementHandle) {
        let inspector = self.env.inspector.clone();
        if !inspector.document().is_connected(element) {
            debug!("Ignoring hover on detached {}", element);
            return;
        }
        if inspector.is_extension_element(element) {
            return;
        }

        if !self.is_locked {
            self.target = Some(self.sample(element));
            self.parent_of_target = inspector.find_ancestor(element).map(|parent| self.sample(parent));
            self.update_tracker_position();
            return;
        }

        if !self.alt_target_held() {
            return;
        }
        let is_pinned = |meta: &Option<TrackerTargetMetaData>| {
            meta.as_ref().is_some_and(|m| m.dom_element == element)
        };
        if is_pinned(&self.target) || is_pinned(&self.parent_of_target) {
            return;
        }

        self.hovered_alt_target = Some(self.sample(element));
        self.update_lines();
    }

    /// Re-sample every tracked element from live layout, then recompute.
    pub fn update_tracker_position(&mut self) {
        self.target = self.resample(self.target.as_ref());
        self.parent_of_target = self.resample(self.parent_of_target.as_ref());
        self.hovered_alt_target = self.resample(self.hovered_alt_target.as_ref());

        self.update_lines();
        if self.is_locked {
            self.update_locked_lines();
        }
    }

    /// Recompute the measurement lines for the active pairing.
    ///
    /// Unlocked: target to parent, anchored at the pointer. Locked with the
    /// alt-target modifier held: target to alt target, anchored at the
    /// target's midpoint.
    pub fn update_lines(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let from = target.bounds;

        if !self.is_locked {
            let pointer = self.env.telemetry.pointer();
            let anchor = Anchor::Pointer(Point::new(pointer.x, pointer.y));
            self.parent_of_target = self
                .parent_of_target
                .take()
                .map(|parent| self.measure(&from, parent, anchor));
            return;
        }

        if self.alt_target_held() {
            self.hovered_alt_target = self
                .hovered_alt_target
                .take()
                .map(|alt| self.measure(&from, alt, Anchor::Midpoint));
        }
    }

    /// Recompute the locked-mode lines: target-to-parent distances plus
    /// structural guides across the viewport. Empty unless locked with both.
    pub fn update_locked_lines(&mut self) {
        self.locked_lines = match (self.is_locked, &self.target, &self.parent_of_target) {
            (true, Some(target), Some(parent)) => {
                let color = &self.env.guide_color;
                let viewport = self.env.telemetry.viewport();
                let mut lines = distance_lines(&target.bounds, &parent.bounds, Anchor::Midpoint, color);
                lines.extend(structural_guides(
                    &target.bounds,
                    &parent.bounds,
                    viewport.inner_width,
                    viewport.inner_height,
                    color,
                ));
                lines
            }
            _ => Vec::new(),
        };
    }

    fn on_telemetry(&mut self, change: TelemetryChange) {
        match change {
            TelemetryChange::Pointer(_) => self.update_lines(),
            TelemetryChange::Scroll(_) if self.is_locked => self.update_tracker_position(),
            TelemetryChange::Viewport(viewport) if viewport.is_measured() => {
                self.update_tracker_position()
            }
            _ => {}
        }
    }

    fn alt_target_held(&self) -> bool {
        self.env
            .telemetry
            .modifiers()
            .is_held(self.env.alt_target_modifier)
    }

    fn measure(&self, from: &Rect, to: TrackerTargetMetaData, anchor: Anchor) -> TrackerTargetMetaData {
        let lines = distance_lines(from, &to.bounds, anchor, &self.env.guide_color);
        to.with_distance_lines(lines)
    }

    fn sample(&self, element: ElementHandle) -> TrackerTargetMetaData {
        let inspector = &self.env.inspector;
        let bounds = inspector.bounding_rect(element);

        TrackerTargetMetaData {
            bounds,
            dom_element: element,
            properties: inspector.element_info(element),
            overlay_styles: overlay_styles(&bounds),
            distance_lines: Vec::new(),
        }
    }

    fn resample(&self, meta: Option<&TrackerTargetMetaData>) -> Option<TrackerTargetMetaData> {
        meta.map(|m| self.sample(m.dom_element))
    }
}

fn with_tracker(weak: &Weak<RefCell<Tracker>>, f: impl FnOnce(&mut Tracker)) {
    let Some(tracker) = weak.upgrade() else {
        return;
    };
    let Ok(mut tracker) = tracker.try_borrow_mut() else {
        warn!("Tracker is busy, skipping recompute");
        return;
    };
    f(&mut tracker);
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by tracker and registry tests.

    use super::*;
    use crate::config::InspectorConfig;
    use crate::dom::{StaticDocument, StaticNode};

    pub const BODY: ElementHandle = ElementHandle(1);
    pub const CONTAINER: ElementHandle = ElementHandle(2);
    pub const ITEM: ElementHandle = ElementHandle(3);
    pub const SIDEBAR: ElementHandle = ElementHandle(4);
    pub const OVERLAY: ElementHandle = ElementHandle(5);

    /// body > container(200x150) > item(100x50), plus a sidebar and an overlay node.
    pub fn page() -> Rc<StaticDocument> {
        let doc = StaticDocument::new();
        doc.add(StaticNode::new(1, "body", Rect::new(0.0, 0.0, 1280.0, 720.0)));
        doc.add(StaticNode::new(2, "section", Rect::new(0.0, 0.0, 200.0, 150.0)).child_of(BODY));
        doc.add(StaticNode::new(3, "div", Rect::new(0.0, 0.0, 100.0, 50.0)).child_of(CONTAINER));
        doc.add(StaticNode::new(4, "aside", Rect::new(300.0, 200.0, 100.0, 100.0)).child_of(BODY));
        doc.add(
            StaticNode::new(5, "div", Rect::new(0.0, 0.0, 40.0, 40.0))
                .child_of(BODY)
                .with_attribute("data-plumbline-root", ""),
        );
        Rc::new(doc)
    }

    pub fn env(doc: Rc<StaticDocument>) -> TrackerEnv {
        let config = InspectorConfig::default();
        TrackerEnv {
            inspector: Rc::new(Inspector::new(doc, &config)),
            telemetry: TelemetryStore::new(),
            guide_color: config.guide_color,
            alt_target_modifier: config.alt_target_modifier,
        }
    }
}
