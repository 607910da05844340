//! Shared telemetry: pointer, modifier keys, scroll offset, viewport size.
//!
//! One store per execution context. Raw-event adapters write it; trackers
//! read it and register watchers so they can recompute when a value they
//! depend on changes. Writes that leave a value unchanged notify nobody.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::keys::Modifier;

/// Pointer position in viewport pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerState {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub is_pressed: bool,
}

/// Held modifier keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
}

impl Modifiers {
    pub fn is_held(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Alt => self.alt,
            Modifier::Ctrl => self.ctrl,
            Modifier::Meta => self.meta,
            Modifier::Shift => self.shift,
        }
    }
}

/// Document scroll offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// Inner window size. Zero until the first measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub inner_width: f64,
    pub inner_height: f64,
}

impl ViewportSize {
    /// Both dimensions have been measured.
    pub fn is_measured(&self) -> bool {
        self.inner_width > 0.0 && self.inner_height > 0.0
    }
}

/// Which value changed, with its new state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryChange {
    Pointer(PointerState),
    Modifiers(Modifiers),
    Scroll(ScrollOffset),
    Viewport(ViewportSize),
}

type Watcher = Rc<dyn Fn(TelemetryChange)>;

/// Per-context mutable snapshot of raw input state.
#[derive(Default)]
pub struct TelemetryStore {
    pointer: Cell<PointerState>,
    modifiers: Cell<Modifiers>,
    scroll: Cell<ScrollOffset>,
    viewport: Cell<ViewportSize>,
    watchers: RefCell<Vec<(u64, Watcher)>>,
    next_watch_id: Cell<u64>,
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("pointer", &self.pointer.get())
            .field("modifiers", &self.modifiers.get())
            .field("scroll", &self.scroll.get())
            .field("viewport", &self.viewport.get())
            .field("watchers", &self.watchers.borrow().len())
            .finish()
    }
}

impl TelemetryStore {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer.get()
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers.get()
    }

    pub fn scroll(&self) -> ScrollOffset {
        self.scroll.get()
    }

    pub fn viewport(&self) -> ViewportSize {
        self.viewport.get()
    }

    pub fn update_pointer_position(&self, x: f64, y: f64) {
        let pointer = PointerState {
            x,
            y,
            ..self.pointer.get()
        };
        self.replace(&self.pointer, pointer, TelemetryChange::Pointer);
    }

    pub fn set_pressed(&self, is_pressed: bool) {
        let pointer = PointerState {
            is_pressed,
            ..self.pointer.get()
        };
        self.replace(&self.pointer, pointer, TelemetryChange::Pointer);
    }

    pub fn update_modifiers(&self, modifiers: Modifiers) {
        self.replace(&self.modifiers, modifiers, TelemetryChange::Modifiers);
    }

    pub fn update_scroll(&self, scroll_x: f64, scroll_y: f64) {
        let scroll = ScrollOffset { scroll_x, scroll_y };
        self.replace(&self.scroll, scroll, TelemetryChange::Scroll);
    }

    pub fn update_viewport(&self, inner_width: f64, inner_height: f64) {
        let viewport = ViewportSize {
            inner_width,
            inner_height,
        };
        self.replace(&self.viewport, viewport, TelemetryChange::Viewport);
    }

    /// Register a watcher; it stays registered while the guard lives.
    pub fn watch(self: &Rc<Self>, watcher: impl Fn(TelemetryChange) + 'static) -> TelemetryWatch {
        let id = self.next_watch_id.get();
        self.next_watch_id.set(id + 1);
        self.watchers.borrow_mut().push((id, Rc::new(watcher)));

        TelemetryWatch {
            store: Rc::downgrade(self),
            id,
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().len()
    }

    fn replace<T: Copy + PartialEq>(
        &self,
        cell: &Cell<T>,
        value: T,
        change: impl FnOnce(T) -> TelemetryChange,
    ) {
        if cell.get() == value {
            return;
        }
        cell.set(value);
        self.notify(change(value));
    }

    fn notify(&self, change: TelemetryChange) {
        // Snapshot so watchers may register or drop guards while notified
        let watchers: Vec<Watcher> = self
            .watchers
            .borrow()
            .iter()
            .map(|(_, w)| w.clone())
            .collect();
        for watcher in watchers {
            watcher(change);
        }
    }
}

/// Registration guard returned by [`TelemetryStore::watch`].
#[must_use = "dropping the guard stops the watcher"]
#[derive(Debug)]
pub struct TelemetryWatch {
    store: Weak<TelemetryStore>,
    id: u64,
}

impl Drop for TelemetryWatch {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.watchers.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}
