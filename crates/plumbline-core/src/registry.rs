//! Tracker registry: live trackers, the current one, and shortcut dispatch.
//!
//! The registry subscribes to the bus once, at install time:
//!
//! | Message | Effect |
//! |---------|--------|
//! | `KEYDOWN` | clear-all binding clears every tracker; toggle-lock binding toggles the current one |
//! | `ELEMENT_HOVER` | creates the current tracker on first hover and replays the hover into it |
//! | `TRACKER_UPDATE` / `TRACKER_LOCK` / `TRACKER_DELETE` | applied to the tracker with that id |

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::bus::{MessageBus, Subscription};
use crate::dom::ElementHandle;
use crate::keys::KeyBinding;
use crate::protocol::{KeydownPayload, MessageKind, Payload};
use crate::tracker::{new_tracker_id, Tracker, TrackerEnv, TrackerSnapshot};

/// Partial update applied by [`TrackerRegistry::update_tracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerUpdate {
    pub is_locked: Option<bool>,
    pub is_visible: Option<bool>,
}

/// The shortcuts the registry owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryBindings {
    pub clear_all: KeyBinding,
    pub toggle_lock: KeyBinding,
}

pub type SharedTracker = Rc<RefCell<Tracker>>;

pub struct TrackerRegistry {
    bus: Rc<MessageBus>,
    env: TrackerEnv,
    bindings: RegistryBindings,
    /// Insertion order.
    trackers: Vec<SharedTracker>,
    current: Option<SharedTracker>,
    selected: Option<String>,
    hovered: Option<String>,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("trackers", &self.trackers.len())
            .field("current", &self.current_id())
            .field("selected", &self.selected)
            .field("hovered", &self.hovered)
            .finish_non_exhaustive()
    }
}

impl TrackerRegistry {
    /// A registry with no bus subscriptions of its own.
    pub fn new(bus: Rc<MessageBus>, env: TrackerEnv, bindings: RegistryBindings) -> Self {
        Self {
            bus,
            env,
            bindings,
            trackers: Vec::new(),
            current: None,
            selected: None,
            hovered: None,
            subscriptions: Vec::new(),
        }
    }

    /// Create a registry and subscribe it to keyboard, hover, and tracker messages.
    pub fn install(
        bus: Rc<MessageBus>,
        env: TrackerEnv,
        bindings: RegistryBindings,
    ) -> Rc<RefCell<TrackerRegistry>> {
        let registry = Rc::new(RefCell::new(Self::new(bus.clone(), env, bindings)));

        let subscriptions = vec![
            subscribe(&bus, &registry, MessageKind::Keydown, |r, payload| {
                if let Payload::Keydown(keydown) = payload {
                    r.handle_keydown(keydown);
                }
            }),
            subscribe(&bus, &registry, MessageKind::ElementHover, |r, payload| {
                if let Payload::ElementHover { element } = payload {
                    r.handle_first_hover(*element);
                }
            }),
            subscribe(&bus, &registry, MessageKind::TrackerUpdate, |r, payload| {
                if let Payload::TrackerUpdate {
                    id,
                    is_locked,
                    is_visible,
                } = payload
                {
                    r.update_tracker(
                        id,
                        TrackerUpdate {
                            is_locked: *is_locked,
                            is_visible: *is_visible,
                        },
                    );
                }
            }),
            subscribe(&bus, &registry, MessageKind::TrackerLock, |r, payload| {
                if let Payload::TrackerLock { id, locked } = payload {
                    if *locked {
                        r.lock_tracker(id);
                    } else {
                        r.unlock_tracker(id);
                    }
                }
            }),
            subscribe(&bus, &registry, MessageKind::TrackerDelete, |r, payload| {
                if let Payload::TrackerDelete { id } = payload {
                    r.delete_tracker(id);
                }
            }),
        ];

        registry.borrow_mut().subscriptions = subscriptions;
        registry
    }

    /// Create an unlocked, visible tracker and return its id.
    pub fn create_tracker(&mut self) -> String {
        let tracker = self.spawn_tracker();
        let tracker = tracker.borrow();
        tracker.id().to_string()
    }

    /// Create a tracker and make it current.
    pub fn create_current_tracker(&mut self) -> SharedTracker {
        let tracker = self.spawn_tracker();
        self.current = Some(tracker.clone());
        tracker
    }

    fn spawn_tracker(&mut self) -> SharedTracker {
        let tracker = Tracker::spawn(new_tracker_id(), self.env.clone(), &self.bus);
        debug!("Created tracker {}", tracker.borrow().id());
        self.trackers.push(tracker.clone());
        tracker
    }

    pub fn update_tracker(&mut self, id: &str, update: TrackerUpdate) {
        let Some(tracker) = self.get(id) else {
            debug!("No tracker {} to update", id);
            return;
        };
        let mut tracker = tracker.borrow_mut();
        if let Some(locked) = update.is_locked {
            tracker.set_locked(locked);
        }
        if let Some(visible) = update.is_visible {
            tracker.set_visible(visible);
        }
    }

    pub fn lock_tracker(&mut self, id: &str) {
        self.update_tracker(
            id,
            TrackerUpdate {
                is_locked: Some(true),
                ..TrackerUpdate::default()
            },
        );
    }

    pub fn unlock_tracker(&mut self, id: &str) {
        self.update_tracker(
            id,
            TrackerUpdate {
                is_locked: Some(false),
                ..TrackerUpdate::default()
            },
        );
    }

    /// Remove a tracker and any pointer referencing it.
    pub fn delete_tracker(&mut self, id: &str) {
        self.trackers.retain(|t| t.borrow().id() != id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if self.hovered.as_deref() == Some(id) {
            self.hovered = None;
        }
        if self.current_id().as_deref() == Some(id) {
            self.current = None;
        }
    }

    pub fn select_tracker(&mut self, id: Option<&str>) {
        self.selected = id.map(str::to_string);
    }

    pub fn set_hovered_tracker(&mut self, id: Option<&str>) {
        self.hovered = id.map(str::to_string);
    }

    /// Drop every tracker, including the current one.
    pub fn clear_all_trackers(&mut self) {
        let count = self.trackers.len();
        self.trackers.clear();
        self.current = None;
        self.selected = None;
        self.hovered = None;
        info!("Cleared {} tracker(s)", count);
    }

    pub fn get(&self, id: &str) -> Option<SharedTracker> {
        self.trackers.iter().find(|t| t.borrow().id() == id).cloned()
    }

    pub fn current(&self) -> Option<SharedTracker> {
        self.current.clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current.as_ref().map(|t| t.borrow().id().to_string())
    }

    pub fn selected_tracker(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn hovered_tracker(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Visible trackers in creation order.
    pub fn active_trackers(&self) -> Vec<SharedTracker> {
        self.filtered(Tracker::is_visible)
    }

    pub fn locked_trackers(&self) -> Vec<SharedTracker> {
        self.filtered(Tracker::is_locked)
    }

    /// Snapshots of every tracker in creation order.
    pub fn snapshots(&self) -> Vec<TrackerSnapshot> {
        self.trackers.iter().map(|t| t.borrow().snapshot()).collect()
    }

    fn filtered(&self, keep: impl Fn(&Tracker) -> bool) -> Vec<SharedTracker> {
        self.trackers
            .iter()
            .filter(|t| keep(&*t.borrow()))
            .cloned()
            .collect()
    }

    fn handle_keydown(&mut self, keydown: &KeydownPayload) {
        if self.bindings.clear_all.matches(keydown) {
            self.clear_all_trackers();
            return;
        }

        if self.bindings.toggle_lock.matches(keydown) {
            match &self.current {
                Some(current) => current.borrow_mut().toggle_lock(),
                None => debug!("No current tracker to toggle"),
            }
        }
    }

    fn handle_first_hover(&mut self, element: ElementHandle) {
        if self.current.is_some() {
            return;
        }
        // The new tracker subscribed after this dispatch began, so replay
        let current = self.create_current_tracker();
        current.borrow_mut().handle_hover(element);
    }
}

fn subscribe(
    bus: &MessageBus,
    registry: &Rc<RefCell<TrackerRegistry>>,
    kind: MessageKind,
    apply: impl Fn(&mut TrackerRegistry, &Payload) + 'static,
) -> Subscription {
    let weak: Weak<RefCell<TrackerRegistry>> = Rc::downgrade(registry);
    bus.subscribe(kind, move |message| {
        let Some(registry) = weak.upgrade() else {
            return Ok(());
        };
        let Ok(mut registry) = registry.try_borrow_mut() else {
            warn!("Tracker registry is busy, dropping {}", kind);
            return Ok(());
        };
        apply(&mut registry, &message.payload);
        Ok(())
    })
}
