//! Page-overlay host driven by a recorded page and input script.
//!
//! A page fixture lays out an in-memory document; a script plays the raw
//! events a browser would deliver. `snapshot` steps capture every tracker.

use std::fmt::Write as _;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use plumbline_core::config::InspectorConfig;
use plumbline_core::dom::{ElementHandle, StaticDocument, StaticNode};
use plumbline_core::overlay::{ContentContext, Transports};
use plumbline_core::protocol::{KeydownPayload, Payload};
use plumbline_core::telemetry::Modifiers;
use plumbline_core::tracker::{TrackerSnapshot, TrackerTargetMetaData};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FixtureViewport {
    pub width: f64,
    pub height: f64,
}

/// Layout of a page: nodes in document order, later nodes on top.
#[derive(Debug, Clone, Deserialize)]
pub struct PageFixture {
    #[serde(default)]
    pub viewport: Option<FixtureViewport>,
    pub nodes: Vec<StaticNode>,
}

/// One raw event, or a capture point.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Pointer { x: f64, y: f64 },
    Hover { element: ElementHandle },
    HoverAt { x: f64, y: f64 },
    Modifiers(Modifiers),
    /// Absolute scroll offset; layout shifts by the difference.
    Scroll { x: f64, y: f64 },
    Viewport { width: f64, height: f64 },
    Key {
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Zoom { zoom: f64 },
    Snapshot {
        #[serde(default)]
        label: Option<String>,
    },
}

/// Trackers as they stood at one point in the script.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    /// Index of the step that produced this frame.
    pub step: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub trackers: Vec<TrackerSnapshot>,
}

pub fn load_page(path: &Path) -> Result<PageFixture> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read page fixture {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid page fixture {:?}", path))
}

pub fn load_script(path: &Path) -> Result<Vec<Step>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read script {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid script {:?}", path))
}

/// A content context over a fixture document.
pub struct Replay {
    document: Rc<StaticDocument>,
    context: ContentContext,
}

impl Replay {
    pub fn new(page: PageFixture, config: InspectorConfig, transports: Transports) -> Result<Self> {
        let document = StaticDocument::from_nodes(page.nodes)
            .map_err(|e| anyhow::anyhow!("Invalid page fixture: {}. {}", e, e.suggestion()))?;
        let document = Rc::new(document);
        let context =
            ContentContext::new(document.clone(), config, transports).context("Failed to set up page overlay")?;
        if let Some(viewport) = page.viewport {
            context.resize(viewport.width, viewport.height);
        }
        Ok(Self { document, context })
    }

    pub fn context(&self) -> &ContentContext {
        &self.context
    }

    /// Play every step. Without any `snapshot` step, captures once at the end.
    pub async fn run(&self, steps: &[Step]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            match step {
                Step::Snapshot { label } => frames.push(self.frame(index, label.clone())),
                other => self.apply(other).await,
            }
        }

        if frames.is_empty() {
            frames.push(self.frame(steps.len(), None));
        }
        frames
    }

    pub async fn apply(&self, step: &Step) {
        let ctx = &self.context;
        match step {
            Step::Pointer { x, y } => ctx.pointer_move(*x, *y),
            Step::Hover { element } => ctx.pointer_enter(*element).await,
            Step::HoverAt { x, y } => {
                if ctx.pointer_enter_at(*x, *y).await.is_none() {
                    debug!("Nothing to hover at ({}, {})", x, y);
                }
            }
            Step::Modifiers(modifiers) => ctx.set_modifiers(*modifiers),
            Step::Scroll { x, y } => {
                let previous = ctx.telemetry().scroll();
                self.document.scroll_by(x - previous.scroll_x, y - previous.scroll_y);
                ctx.scroll(*x, *y);
            }
            Step::Viewport { width, height } => ctx.resize(*width, *height),
            Step::Key { key, modifiers } => {
                ctx.keydown(KeydownPayload {
                    key: key.clone(),
                    modifiers: *modifiers,
                })
                .await
            }
            Step::Zoom { zoom } => ctx.bus().broadcast(Payload::ZoomChange { zoom: *zoom }).await,
            Step::Snapshot { .. } => {}
        }
    }

    fn frame(&self, step: usize, label: Option<String>) -> Frame {
        Frame {
            step,
            label,
            trackers: self.context.snapshots(),
        }
    }
}

/// Human-readable rendering of frames.
pub fn render_text(frames: &[Frame]) -> String {
    let mut out = String::new();

    for frame in frames {
        let _ = match &frame.label {
            Some(label) => writeln!(out, "# step {}: {}", frame.step, label),
            None => writeln!(out, "# step {}", frame.step),
        };
        if frame.trackers.is_empty() {
            let _ = writeln!(out, "(no trackers)");
        }

        for tracker in &frame.trackers {
            let _ = writeln!(
                out,
                "{} {} {}",
                tracker.id,
                if tracker.is_locked { "locked" } else { "unlocked" },
                if tracker.is_visible { "visible" } else { "hidden" }
            );
            for (role, meta) in [
                ("target", &tracker.target),
                ("parent", &tracker.parent_of_target),
                ("alt", &tracker.hovered_alt_target),
            ] {
                if let Some(meta) = meta {
                    let _ = writeln!(out, "  {:<7}{}", role, describe(meta));
                }
            }
            for line in tracker.lines.iter().chain(&tracker.locked_lines) {
                let _ = match line.edge {
                    Some(edge) if !line.is_structural() => writeln!(
                        out,
                        "  line   {:?} {}px ({}, {}) -> ({}, {})",
                        edge, line.distance, line.x1, line.y1, line.x2, line.y2
                    ),
                    _ => writeln!(out, "  guide  ({}, {}) -> ({}, {})", line.x1, line.y1, line.x2, line.y2),
                };
            }
        }
    }

    out
}

fn describe(meta: &TrackerTargetMetaData) -> String {
    let info = &meta.properties;
    let mut selector = info.tag_name.to_lowercase();
    if !info.id.is_empty() {
        selector.push('#');
        selector.push_str(&info.id);
    }
    for class in &info.classes {
        selector.push('.');
        selector.push_str(class);
    }
    let d = &info.dimensions;
    format!("{} {}x{} at ({}, {})", selector, d.width, d.height, d.x, d.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "viewport": {"width": 1280, "height": 720},
        "nodes": [
            {"id": 1, "tag": "body", "rect": {"x": 0, "y": 0, "width": 1280, "height": 720}},
            {"id": 2, "tag": "section", "parent": 1, "rect": {"x": 0, "y": 0, "width": 200, "height": 150}},
            {"id": 3, "tag": "div", "parent": 2, "rect": {"x": 0, "y": 0, "width": 100, "height": 50},
             "attributes": {"id": "card", "class": "card wide"}},
            {"id": 4, "tag": "aside", "parent": 1, "rect": {"x": 300, "y": 200, "width": 100, "height": 100}}
        ]
    }"#;

    fn replay() -> Replay {
        let page: PageFixture = serde_json::from_str(PAGE).expect("page");
        Replay::new(page, InspectorConfig::default(), Transports::default()).expect("replay")
    }

    fn script(json: &str) -> Vec<Step> {
        serde_json::from_str(json).expect("script")
    }

    #[test]
    fn steps_parse_from_json() {
        let steps = script(
            r#"[
                {"step": "modifiers", "alt": true},
                {"step": "key", "key": "Escape"},
                {"step": "hover_at", "x": 1, "y": 2},
                {"step": "snapshot"}
            ]"#,
        );
        assert_eq!(
            steps[0],
            Step::Modifiers(Modifiers {
                alt: true,
                ..Modifiers::default()
            })
        );
        assert_eq!(
            steps[1],
            Step::Key {
                key: "Escape".into(),
                modifiers: Modifiers::default()
            }
        );
        assert_eq!(steps[2], Step::HoverAt { x: 1.0, y: 2.0 });
        assert_eq!(steps[3], Step::Snapshot { label: None });
    }

    #[tokio::test]
    async fn hover_and_lock_produce_frames() {
        let replay = replay();
        let frames = replay
            .run(&script(
                r#"[
                    {"step": "pointer", "x": 50, "y": 25},
                    {"step": "hover", "element": 3},
                    {"step": "snapshot", "label": "hovered"},
                    {"step": "key", "key": "l", "modifiers": {"alt": true}},
                    {"step": "snapshot", "label": "locked"}
                ]"#,
            ))
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].step, 2);
        assert_eq!(frames[0].label.as_deref(), Some("hovered"));

        let hovered = &frames[0].trackers[0];
        assert!(!hovered.is_locked);
        assert_eq!(hovered.lines.len(), 4);
        assert_eq!(
            hovered.parent_of_target.as_ref().map(|p| p.dom_element),
            Some(ElementHandle(2))
        );

        let locked = &frames[1].trackers[0];
        assert!(locked.is_locked);
        assert_eq!(locked.locked_lines.len(), 12);
    }

    #[tokio::test]
    async fn final_frame_when_script_has_no_snapshot() {
        let replay = replay();
        let frames = replay.run(&script(r#"[{"step": "hover_at", "x": 350, "y": 250}]"#)).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].step, 1);
        let target = frames[0].trackers[0].target.as_ref().expect("target");
        assert_eq!(target.dom_element, ElementHandle(4));
    }

    #[tokio::test]
    async fn scrolling_shifts_locked_measurement() {
        let replay = replay();
        let frames = replay
            .run(&script(
                r#"[
                    {"step": "hover", "element": 3},
                    {"step": "key", "key": "L", "modifiers": {"alt": true}},
                    {"step": "scroll", "x": 0, "y": 10},
                    {"step": "scroll", "x": 0, "y": 30}
                ]"#,
            ))
            .await;

        let target = frames[0].trackers[0].target.as_ref().expect("target");
        assert_eq!(target.bounds.y, -30.0);
        assert_eq!(replay.context().telemetry().scroll().scroll_y, 30.0);
    }

    #[tokio::test]
    async fn zoom_step_reaches_inspector() {
        let replay = replay();
        replay.apply(&Step::Zoom { zoom: 2.0 }).await;
        assert_eq!(replay.context().inspector().zoom(), 2.0);
    }

    #[tokio::test]
    async fn escape_clears_everything() {
        let replay = replay();
        let frames = replay
            .run(&script(
                r#"[
                    {"step": "hover", "element": 3},
                    {"step": "key", "key": "Escape"}
                ]"#,
            ))
            .await;
        assert!(frames[0].trackers.is_empty());
        assert!(render_text(&frames).contains("(no trackers)"));
    }

    #[tokio::test]
    async fn text_rendering_names_elements_and_lines() {
        let replay = replay();
        let frames = replay
            .run(&script(
                r#"[
                    {"step": "pointer", "x": 50, "y": 25},
                    {"step": "hover", "element": 3},
                    {"step": "snapshot", "label": "card"}
                ]"#,
            ))
            .await;

        let text = render_text(&frames);
        assert!(text.starts_with("# step 2: card\n"), "{}", text);
        assert!(text.contains("unlocked visible"));
        assert!(text.contains("target div#card.card.wide 100x50 at (0, 0)"), "{}", text);
        assert!(text.contains("parent section 200x150 at (0, 0)"), "{}", text);
        assert_eq!(text.matches("  line ").count(), 4);
    }

    #[test]
    fn rejects_page_with_looping_parents() {
        let page: PageFixture = serde_json::from_str(
            r#"{"nodes": [
                {"id": 1, "tag": "div", "parent": 2},
                {"id": 2, "tag": "div", "parent": 1}
            ]}"#,
        )
        .expect("page");

        let err = Replay::new(page, InspectorConfig::default(), Transports::default())
            .err()
            .expect("looping fixture must be rejected");
        assert!(err.to_string().contains("own ancestor"), "{}", err);
    }

    #[test]
    fn rejects_page_with_missing_parent() {
        let page: PageFixture =
            serde_json::from_str(r#"{"nodes": [{"id": 1, "tag": "div", "parent": 7}]}"#).expect("page");
        assert!(Replay::new(page, InspectorConfig::default(), Transports::default()).is_err());
    }

    #[test]
    fn rejects_page_without_nodes() {
        assert!(serde_json::from_str::<PageFixture>(r#"{"viewport": {"width": 1, "height": 1}}"#).is_err());
    }
}
