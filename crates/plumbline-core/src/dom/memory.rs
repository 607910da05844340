//! In-memory document with fixed layout boxes.
//!
//! Used for page fixtures and tests. Nodes are kept in document order; later
//! nodes paint over earlier ones for hit testing. Layout can be changed
//! through `&self` so a document shared with trackers can still simulate
//! reflow, scrolling, and detachment.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dom::{ComputedStyle, DocumentAccess, ElementHandle};
use crate::error::DocumentError;
use crate::geometry::{Point, Rect};

/// One element of a [`StaticDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticNode {
    pub id: ElementHandle,
    pub tag: String,
    #[serde(default)]
    pub parent: Option<ElementHandle>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub style: ComputedStyle,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl StaticNode {
    #[must_use]
    pub fn new(id: u64, tag: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: ElementHandle(id),
            tag: tag.into(),
            parent: None,
            rect,
            style: ComputedStyle::default(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn child_of(mut self, parent: ElementHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_style(mut self, property: &str, value: &str) -> Self {
        self.style.set(property, value);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }
}

/// A document whose layout is whatever the nodes say it is.
#[derive(Debug, Default)]
pub struct StaticDocument {
    nodes: RefCell<Vec<StaticNode>>,
}

impl StaticDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from nodes listed in document order.
    ///
    /// Ids must be unique and parent links must name existing nodes without
    /// looping.
    pub fn from_nodes(nodes: Vec<StaticNode>) -> Result<Self, DocumentError> {
        let mut parents: HashMap<ElementHandle, Option<ElementHandle>> = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            if parents.insert(node.id, node.parent).is_some() {
                return Err(DocumentError::DuplicateNode(node.id));
            }
        }

        for node in &nodes {
            if let Some(parent) = node.parent {
                if !parents.contains_key(&parent) {
                    return Err(DocumentError::MissingParent { node: node.id, parent });
                }
            }

            let mut seen = HashSet::from([node.id]);
            let mut current = node.parent;
            while let Some(ancestor) = current {
                if !seen.insert(ancestor) {
                    return Err(DocumentError::ParentCycle(node.id));
                }
                current = parents.get(&ancestor).copied().flatten();
            }
        }

        Ok(Self {
            nodes: RefCell::new(nodes),
        })
    }

    /// Append a node and return its handle.
    pub fn add(&self, node: StaticNode) -> ElementHandle {
        let id = node.id;
        self.nodes.borrow_mut().push(node);
        id
    }

    /// Move or resize an element.
    pub fn set_rect(&self, element: ElementHandle, rect: Rect) {
        if let Some(node) = self.nodes.borrow_mut().iter_mut().find(|n| n.id == element) {
            node.rect = rect;
        }
    }

    /// Shift every box by the given delta, as scrolling the viewport would.
    pub fn scroll_by(&self, dx: f64, dy: f64) {
        for node in self.nodes.borrow_mut().iter_mut() {
            node.rect.x -= dx;
            node.rect.y -= dy;
        }
    }

    /// Remove an element and its subtree from the document.
    pub fn detach(&self, element: ElementHandle) {
        let doomed: Vec<ElementHandle> = self
            .nodes
            .borrow()
            .iter()
            .filter(|n| self.contains(element, n.id))
            .map(|n| n.id)
            .collect();
        self.nodes.borrow_mut().retain(|n| !doomed.contains(&n.id));
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    fn with_node<T>(&self, element: ElementHandle, f: impl FnOnce(&StaticNode) -> T) -> Option<T> {
        self.nodes.borrow().iter().find(|n| n.id == element).map(f)
    }
}

impl DocumentAccess for StaticDocument {
    fn element_at_point(&self, point: Point) -> Option<ElementHandle> {
        self.nodes
            .borrow()
            .iter()
            .rev()
            .find(|n| {
                n.rect.contains_point(point)
                    && n.style.get("display") != "none"
                    && n.style.get("visibility") != "hidden"
            })
            .map(|n| n.id)
    }

    fn bounding_rect(&self, element: ElementHandle) -> Rect {
        self.with_node(element, |n| {
            // display:contents generates no box of its own
            if n.style.is_display_contents() {
                Rect::ZERO
            } else {
                n.rect
            }
        })
        .unwrap_or(Rect::ZERO)
    }

    fn computed_style(&self, element: ElementHandle) -> ComputedStyle {
        self.with_node(element, |n| n.style.clone()).unwrap_or_default()
    }

    fn tag_name(&self, element: ElementHandle) -> Option<String> {
        self.with_node(element, |n| n.tag.clone())
    }

    fn attributes(&self, element: ElementHandle) -> Vec<(String, String)> {
        self.with_node(element, |n| {
            n.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        let parent = self.with_node(element, |n| n.parent).flatten()?;
        // A parent that was detached leaves its children orphaned
        self.is_connected(parent).then_some(parent)
    }

    fn children(&self, element: ElementHandle) -> Vec<ElementHandle> {
        self.nodes
            .borrow()
            .iter()
            .filter(|n| n.parent == Some(element))
            .map(|n| n.id)
            .collect()
    }

    fn is_connected(&self, element: ElementHandle) -> bool {
        self.with_node(element, |_| ()).is_some()
    }

    fn body(&self) -> Option<ElementHandle> {
        self.nodes
            .borrow()
            .iter()
            .find(|n| n.tag.eq_ignore_ascii_case("body"))
            .map(|n| n.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StaticDocument {
        let doc = StaticDocument::new();
        let html = doc.add(StaticNode::new(1, "html", Rect::new(0.0, 0.0, 800.0, 600.0)));
        let body = doc.add(StaticNode::new(2, "body", Rect::new(0.0, 0.0, 800.0, 600.0)).child_of(html));
        doc.add(
            StaticNode::new(3, "div", Rect::new(10.0, 10.0, 100.0, 100.0))
                .child_of(body)
                .with_attribute("id", "card")
                .with_attribute("class", "card  shadow"),
        );
        doc
    }

    #[test]
    fn hit_test_prefers_later_nodes() {
        let doc = sample();
        assert_eq!(doc.element_at_point(Point::new(50.0, 50.0)), Some(ElementHandle(3)));
        assert_eq!(doc.element_at_point(Point::new(500.0, 500.0)), Some(ElementHandle(2)));
        assert_eq!(doc.element_at_point(Point::new(900.0, 50.0)), None);
    }

    #[test]
    fn attribute_helpers() {
        let doc = sample();
        assert_eq!(doc.id(ElementHandle(3)), "card");
        assert_eq!(doc.classes(ElementHandle(3)), vec!["card", "shadow"]);
        assert_eq!(doc.id(ElementHandle(2)), "");
    }

    #[test]
    fn detach_removes_subtree() {
        let doc = sample();
        doc.detach(ElementHandle(2));

        assert!(doc.is_connected(ElementHandle(1)));
        assert!(!doc.is_connected(ElementHandle(2)));
        assert!(!doc.is_connected(ElementHandle(3)));
        assert_eq!(doc.bounding_rect(ElementHandle(3)), Rect::ZERO);
        assert!(doc.computed_style(ElementHandle(3)).is_empty());
    }

    #[test]
    fn contains_walks_parents() {
        let doc = sample();
        assert!(doc.contains(ElementHandle(1), ElementHandle(3)));
        assert!(doc.contains(ElementHandle(3), ElementHandle(3)));
        assert!(!doc.contains(ElementHandle(3), ElementHandle(1)));
    }

    #[test]
    fn scroll_shifts_boxes() {
        let doc = sample();
        doc.scroll_by(0.0, 25.0);
        assert_eq!(doc.bounding_rect(ElementHandle(3)).y, -15.0);
    }

    #[test]
    fn from_nodes_accepts_a_tree() {
        let doc = StaticDocument::from_nodes(vec![
            StaticNode::new(1, "body", Rect::new(0.0, 0.0, 800.0, 600.0)),
            StaticNode::new(2, "div", Rect::new(0.0, 0.0, 10.0, 10.0)).child_of(ElementHandle(1)),
        ])
        .unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.parent(ElementHandle(2)), Some(ElementHandle(1)));
    }

    #[test]
    fn from_nodes_rejects_duplicate_ids() {
        let err = StaticDocument::from_nodes(vec![
            StaticNode::new(1, "div", Rect::ZERO),
            StaticNode::new(1, "span", Rect::ZERO),
        ])
        .unwrap_err();
        assert_eq!(err, DocumentError::DuplicateNode(ElementHandle(1)));
    }

    #[test]
    fn from_nodes_rejects_missing_parent() {
        let err = StaticDocument::from_nodes(vec![StaticNode::new(3, "div", Rect::ZERO).child_of(ElementHandle(9))])
            .unwrap_err();
        assert_eq!(
            err,
            DocumentError::MissingParent {
                node: ElementHandle(3),
                parent: ElementHandle(9),
            }
        );
    }

    #[test]
    fn from_nodes_rejects_parent_cycles() {
        let err = StaticDocument::from_nodes(vec![
            StaticNode::new(1, "div", Rect::ZERO).child_of(ElementHandle(2)),
            StaticNode::new(2, "div", Rect::ZERO).child_of(ElementHandle(1)),
        ])
        .unwrap_err();
        assert_eq!(err, DocumentError::ParentCycle(ElementHandle(1)));

        let err = StaticDocument::from_nodes(vec![StaticNode::new(5, "div", Rect::ZERO).child_of(ElementHandle(5))])
            .unwrap_err();
        assert_eq!(err, DocumentError::ParentCycle(ElementHandle(5)));
    }

    #[test]
    fn walks_end_on_looping_parents() {
        // add() does not validate, so a loop can still be built by hand
        let doc = StaticDocument::new();
        doc.add(StaticNode::new(1, "div", Rect::ZERO).child_of(ElementHandle(2)));
        doc.add(StaticNode::new(2, "div", Rect::ZERO).child_of(ElementHandle(1)));

        assert_eq!(doc.ancestors(ElementHandle(1)), vec![ElementHandle(1), ElementHandle(2)]);
        assert!(doc.contains(ElementHandle(2), ElementHandle(1)));
        assert!(!doc.contains(ElementHandle(7), ElementHandle(1)));
        assert_eq!(doc.closest_with_attribute(ElementHandle(1), "data-root"), None);
    }

    #[test]
    fn broken_parent_chain_stops_walks() {
        let doc = sample();
        let orphan = doc.add(StaticNode::new(9, "span", Rect::ZERO).child_of(ElementHandle(42)));

        assert_eq!(doc.parent(orphan), None);
        assert_eq!(doc.ancestors(orphan), vec![orphan]);
        assert!(!doc.contains(ElementHandle(1), orphan));
    }

    #[test]
    fn node_deserializes_with_defaults() {
        let json = r#"{"id": 7, "tag": "span", "parent": 3}"#;
        let node: StaticNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.id, ElementHandle(7));
        assert_eq!(node.parent, Some(ElementHandle(3)));
        assert_eq!(node.rect, Rect::ZERO);
    }
}
