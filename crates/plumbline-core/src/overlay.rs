//! Composition root for the page-overlay (content) context.
//!
//! Builds every per-context instance once and hands out `Rc` handles:
//! one bus, one inspector, one telemetry store, one tracker registry.
//! Raw-event adapters call the `pointer_*`, `keydown`, `scroll`, and
//! `resize` methods; renderers read [`ContentContext::snapshots`].

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::bus::{MessageBus, Subscription, Transport};
use crate::config::InspectorConfig;
use crate::context::{ContextKind, ContextSet};
use crate::dom::{DocumentAccess, ElementHandle};
use crate::error::ConfigError;
use crate::geometry::Point;
use crate::inspect::Inspector;
use crate::protocol::{KeydownPayload, MessageKind, Payload};
use crate::registry::{RegistryBindings, TrackerRegistry};
use crate::telemetry::{Modifiers, TelemetryStore};
use crate::tracker::{TrackerEnv, TrackerSnapshot};

/// Remote transports for the content context's bus.
#[derive(Default, Clone)]
pub struct Transports {
    pub runtime: Option<Rc<dyn Transport>>,
    pub tab: Option<Rc<dyn Transport>>,
}

pub struct ContentContext {
    config: InspectorConfig,
    bus: Rc<MessageBus>,
    inspector: Rc<Inspector>,
    telemetry: Rc<TelemetryStore>,
    registry: Rc<RefCell<TrackerRegistry>>,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for ContentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentContext")
            .field("bus", &self.bus)
            .field("inspector", &self.inspector)
            .field("telemetry", &self.telemetry)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ContentContext {
    /// Wire a content context over `document`.
    ///
    /// Fails only when the configuration is invalid.
    pub fn new(
        document: Rc<dyn DocumentAccess>,
        config: InspectorConfig,
        transports: Transports,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let bindings = RegistryBindings {
            clear_all: config.bindings.clear_all()?,
            toggle_lock: config.bindings.toggle_lock()?,
        };

        let mut bus = MessageBus::new(ContextKind::Content).with_history_capacity(config.history_capacity);
        if let Some(runtime) = transports.runtime {
            bus = bus.with_runtime_transport(runtime);
        }
        if let Some(tab) = transports.tab {
            bus = bus.with_tab_transport(tab);
        }
        let bus = Rc::new(bus);

        let inspector = Rc::new(Inspector::new(document, &config));
        let telemetry = TelemetryStore::new();
        let env = TrackerEnv {
            inspector: inspector.clone(),
            telemetry: telemetry.clone(),
            guide_color: config.guide_color.clone(),
            alt_target_modifier: config.alt_target_modifier,
        };
        let registry = TrackerRegistry::install(bus.clone(), env, bindings);

        let zoom_target = Rc::downgrade(&inspector);
        let zoom = bus.subscribe(MessageKind::ZoomChange, move |message| {
            if let (Payload::ZoomChange { zoom }, Some(inspector)) = (&message.payload, zoom_target.upgrade()) {
                inspector.set_zoom(*zoom);
                debug!("Zoom set to {}", inspector.zoom());
            }
            Ok(())
        });

        let resize_target = Rc::downgrade(&telemetry);
        let resize = bus.subscribe(MessageKind::ViewportResize, move |message| {
            if let (Payload::ViewportResize { width, height }, Some(telemetry)) =
                (&message.payload, resize_target.upgrade())
            {
                telemetry.update_viewport(*width, *height);
            }
            Ok(())
        });

        Ok(Self {
            config,
            bus,
            inspector,
            telemetry,
            registry,
            _subscriptions: vec![zoom, resize],
        })
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Rc<MessageBus> {
        &self.bus
    }

    pub fn inspector(&self) -> &Rc<Inspector> {
        &self.inspector
    }

    pub fn telemetry(&self) -> &Rc<TelemetryStore> {
        &self.telemetry
    }

    pub fn registry(&self) -> &Rc<RefCell<TrackerRegistry>> {
        &self.registry
    }

    /// Forward a pointer-enter event as an `ELEMENT_HOVER` broadcast.
    pub async fn pointer_enter(&self, element: ElementHandle) {
        self.bus.broadcast(Payload::ElementHover { element }).await;
    }

    /// Hover whatever element is top-most at a viewport point.
    ///
    /// Moves the pointer there first. Returns the hovered element.
    pub async fn pointer_enter_at(&self, x: f64, y: f64) -> Option<ElementHandle> {
        self.pointer_move(x, y);
        let element = self.inspector.element_at_point(Point::new(x, y))?;
        self.pointer_enter(element).await;
        Some(element)
    }

    pub fn pointer_move(&self, x: f64, y: f64) {
        self.telemetry.update_pointer_position(x, y);
    }

    pub fn set_modifiers(&self, modifiers: Modifiers) {
        self.telemetry.update_modifiers(modifiers);
    }

    /// Forward a keydown to this page's registry, and to nobody else.
    pub async fn keydown(&self, keydown: KeydownPayload) {
        self.bus
            .send(Payload::Keydown(keydown), ContextSet::only(ContextKind::Content))
            .await;
    }

    pub fn scroll(&self, scroll_x: f64, scroll_y: f64) {
        self.telemetry.update_scroll(scroll_x, scroll_y);
    }

    pub fn resize(&self, inner_width: f64, inner_height: f64) {
        self.telemetry.update_viewport(inner_width, inner_height);
    }

    /// Every tracker in creation order.
    pub fn snapshots(&self) -> Vec<TrackerSnapshot> {
        self.registry.borrow().snapshots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::test_support::*;

    fn context() -> ContentContext {
        ContentContext::new(page(), InspectorConfig::default(), Transports::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = InspectorConfig {
            history_capacity: 0,
            ..InspectorConfig::default()
        };
        assert!(ContentContext::new(page(), config, Transports::default()).is_err());
    }

    #[tokio::test]
    async fn hover_then_lock_via_keyboard() {
        let ctx = context();
        ctx.resize(1280.0, 720.0);
        ctx.pointer_move(50.0, 25.0);
        ctx.pointer_enter(ITEM).await;

        let snapshots = ctx.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].lines.len(), 4);
        assert!(snapshots[0].locked_lines.is_empty());

        ctx.keydown(KeydownPayload {
            key: "l".into(),
            modifiers: Modifiers {
                alt: true,
                ..Modifiers::default()
            },
        })
        .await;

        let snapshot = &ctx.snapshots()[0];
        assert!(snapshot.is_locked);
        assert_eq!(snapshot.locked_lines.len(), 12);
    }

    #[tokio::test]
    async fn hover_at_point_resolves_element() {
        let ctx = context();
        let hovered = ctx.pointer_enter_at(350.0, 250.0).await;
        assert_eq!(hovered, Some(SIDEBAR));
        assert_eq!(
            ctx.snapshots()[0].target.as_ref().map(|t| t.dom_element),
            Some(SIDEBAR)
        );
    }

    #[tokio::test]
    async fn zoom_and_resize_messages_apply() {
        let ctx = context();
        ctx.bus().broadcast(Payload::ZoomChange { zoom: 2.0 }).await;
        assert_eq!(ctx.inspector().zoom(), 2.0);

        ctx.bus().broadcast(Payload::ZoomChange { zoom: 40.0 }).await;
        assert_eq!(ctx.inspector().zoom(), 5.0);

        ctx.bus()
            .broadcast(Payload::ViewportResize {
                width: 800.0,
                height: 600.0,
            })
            .await;
        assert_eq!(ctx.telemetry().viewport().inner_width, 800.0);
    }

    #[tokio::test]
    async fn escape_clears_trackers() {
        let ctx = context();
        ctx.pointer_enter(ITEM).await;
        ctx.keydown(KeydownPayload {
            key: "Escape".into(),
            modifiers: Modifiers::default(),
        })
        .await;
        assert!(ctx.snapshots().is_empty());
    }
}
