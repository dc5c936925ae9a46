//! Normalized element trees.
//!
//! An [`ElementTree`] is built breadth-first from a [`RawSnapshot`] and never
//! changes afterwards; a refresh builds a new tree with the next generation
//! number. Element ids are `"<type>:<ordinal>"` with one running ordinal per
//! type across the whole tree, so the same id can name a different element
//! after a rebuild. [`ElementTree::resolve`] catches that by comparing the
//! generation recorded in an [`ElementHandle`].

use std::collections::{HashMap, VecDeque};

use regex::Regex;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::element::{Element, ElementHandle, ParentRef, RawNode, RawSnapshot, Rect};

/// Element type given to the synthetic root of multi-root snapshots.
pub const SYNTHETIC_ROOT_TYPE: &str = "root";

const TYPE_PREFIXES: &[&str] = &["XCUIElementType", "android.widget.", "android.view.", "AX"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("element `{id}` is stale: it belongs to tree generation {handle}, the live tree is generation {live}")]
    StaleElement { id: String, handle: u64, live: u64 },

    #[error("element `{0}` does not exist in the live tree")]
    Unknown(String),
}

/// Build-time options derived from [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    pub sanitize: Option<Regex>,
    pub screen_height: Option<f64>,
}

impl TreeOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let sanitize = match config.sanitize_pattern {
            Some(ref pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(Self {
            sanitize,
            screen_height: config.screen_height,
        })
    }

    fn clean(&self, text: Option<&str>) -> Option<String> {
        let text = text?;
        let cleaned = match self.sanitize {
            Some(ref re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        };
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }
}

/// Maps a backend type name onto the normalized vocabulary.
///
/// Platform prefixes are stripped and the result lowercased. A generic
/// `other` element carrying both a name and a label is static text.
pub fn normalize_type(raw: Option<&str>, has_name: bool, has_label: bool) -> String {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("other");
    let stripped = TYPE_PREFIXES
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix).filter(|rest| !rest.is_empty()))
        .unwrap_or(raw);
    let normalized = stripped.to_lowercase();
    if normalized == "other" && has_name && has_label {
        "statictext".to_string()
    } else {
        normalized
    }
}

/// An immutable, single-rooted element tree.
#[derive(Debug, Clone)]
pub struct ElementTree {
    generation: u64,
    /// Elements in breadth-first order; index 0 is the root.
    elements: Vec<Element>,
    by_id: HashMap<String, usize>,
    synthetic_root: bool,
}

struct Pending<'a> {
    node: &'a RawNode,
    parent: Option<usize>,
    index: usize,
}

impl ElementTree {
    /// A tree holding only a synthetic root; the state before the first refresh.
    pub fn empty(generation: u64) -> Self {
        Self::build(&RawSnapshot::default(), &TreeOptions::default(), generation)
    }

    /// Normalizes `snapshot` into a tree tagged with `generation`.
    pub fn build(snapshot: &RawSnapshot, options: &TreeOptions, generation: u64) -> Self {
        let synthetic;
        let synthetic_root = snapshot.roots.len() != 1;
        let root: &RawNode = match snapshot.roots.as_slice() {
            [single] => single,
            many => {
                synthetic = RawNode {
                    element_type: Some(SYNTHETIC_ROOT_TYPE.to_string()),
                    children: many.to_vec(),
                    ..Default::default()
                };
                &synthetic
            }
        };

        let screen_height = options
            .screen_height
            .or(snapshot.screen.map(|s| s.height))
            .or(root.rect.map(|r| r.height).filter(|h| *h > 0.0));

        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut elements: Vec<Element> = Vec::new();
        let mut by_id = HashMap::new();
        let mut queue = VecDeque::from([Pending {
            node: root,
            parent: None,
            index: 0,
        }]);

        while let Some(Pending { node, parent, index }) = queue.pop_front() {
            let name = options.clean(node.name.as_deref());
            let label = options.clean(node.label.as_deref());
            let value = options.clean(node.value.as_deref());
            let element_type =
                normalize_type(node.element_type.as_deref(), name.is_some(), label.is_some());

            let ordinal = counters.entry(element_type.clone()).or_insert(0);
            let id = format!("{}:{}", element_type, ordinal);
            *ordinal += 1;

            let rect = node.rect.map(Rect::from).unwrap_or_default();
            let visible = rect.origin.y >= 0.0 && screen_height.map_or(true, |h| rect.origin.y < h);
            let parent_ref = parent.map(|p| {
                let parent: &Element = &elements[p];
                ParentRef {
                    id: parent.id.clone(),
                    name: parent.name.clone(),
                    label: parent.label.clone(),
                    value: parent.value.clone(),
                }
            });

            let position = elements.len();
            if let Some(p) = parent {
                elements[p].children.push(id.clone());
            }
            by_id.insert(id.clone(), position);
            elements.push(Element {
                id,
                element_type,
                name,
                label,
                value,
                hitpoint: rect.center(),
                rect,
                enabled: node.enabled.unwrap_or(true),
                visible,
                parent: parent_ref,
                children: Vec::with_capacity(node.children.len()),
                index,
                generation,
            });

            for (child_index, child) in node.children.iter().enumerate() {
                queue.push_back(Pending {
                    node: child,
                    parent: Some(position),
                    index: child_index,
                });
            }
        }

        Self {
            generation,
            elements,
            by_id,
            synthetic_root,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> &Element {
        &self.elements[0]
    }

    /// Number of elements, including the root.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.len() <= 1
    }

    /// Looks up an element by id in this generation.
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.by_id.get(id).map(|&i| &self.elements[i])
    }

    /// Looks up a handle, failing if it was issued by another generation.
    pub fn resolve(&self, handle: &ElementHandle) -> Result<&Element, TreeError> {
        if handle.generation != self.generation {
            return Err(TreeError::StaleElement {
                id: handle.id.clone(),
                handle: handle.generation,
                live: self.generation,
            });
        }
        self.get(&handle.id)
            .ok_or_else(|| TreeError::Unknown(handle.id.clone()))
    }

    pub fn children<'a>(&'a self, element: &'a Element) -> impl Iterator<Item = &'a Element> + 'a {
        element.children.iter().filter_map(move |id| self.get(id))
    }

    /// All elements in breadth-first order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// Elements a query may match: everything except a synthetic root.
    pub fn searchable(&self) -> impl Iterator<Item = &Element> {
        let skip = usize::from(self.synthetic_root);
        self.elements.iter().skip(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementFrame;

    fn node(ty: &str, name: Option<&str>, label: Option<&str>, children: Vec<RawNode>) -> RawNode {
        RawNode {
            element_type: Some(ty.to_string()),
            name: name.map(String::from),
            label: label.map(String::from),
            children,
            ..Default::default()
        }
    }

    fn at_y(mut n: RawNode, y: f64) -> RawNode {
        n.rect = Some(ElementFrame { x: 0.0, y, width: 10.0, height: 10.0 });
        n
    }

    #[test]
    fn ids_count_per_type_breadth_first() {
        let snapshot = RawSnapshot::new(vec![node(
            "Window",
            None,
            None,
            vec![
                node("Button", Some("a"), None, vec![node("Button", Some("c"), None, vec![])]),
                node("Button", Some("b"), None, vec![]),
            ],
        )]);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);

        let ids: Vec<&str> = tree.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["window:0", "button:0", "button:1", "button:2"]);
        assert_eq!(tree.get("button:2").unwrap().name.as_deref(), Some("c"));
        assert_eq!(tree.get("button:1").unwrap().index, 1);
    }

    #[test]
    fn multi_root_gets_synthetic_root() {
        let snapshot = RawSnapshot::new(vec![node("Window", None, None, vec![]), node("Alert", None, None, vec![])]);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);
        assert_eq!(tree.root().id, "root:0");
        assert_eq!(tree.root().children, vec!["window:0", "alert:0"]);
        assert_eq!(tree.get("alert:0").unwrap().parent.as_ref().unwrap().id, "root:0");
        assert_eq!(tree.searchable().count(), 2);
    }

    #[test]
    fn empty_tree_is_just_a_root() {
        let tree = ElementTree::empty(0);
        assert_eq!(tree.len(), 1);
        assert!(tree.is_empty());
        assert_eq!(tree.root().element_type, SYNTHETIC_ROOT_TYPE);
    }

    #[test]
    fn type_normalization() {
        assert_eq!(normalize_type(Some("XCUIElementTypeButton"), false, false), "button");
        assert_eq!(normalize_type(Some("android.widget.EditText"), false, false), "edittext");
        assert_eq!(normalize_type(Some("AXGroup"), false, false), "group");
        assert_eq!(normalize_type(None, false, false), "other");
        assert_eq!(normalize_type(Some("Other"), true, true), "statictext");
        assert_eq!(normalize_type(Some("Other"), true, false), "other");
    }

    #[test]
    fn other_with_name_and_label_becomes_static_text() {
        let snapshot = RawSnapshot::new(vec![node("Other", Some("title"), Some("Welcome"), vec![])]);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);
        assert_eq!(tree.root().id, "statictext:0");
    }

    #[test]
    fn sanitizes_text_fields() {
        let options = TreeOptions::from_config(&EngineConfig::default()).unwrap();
        let snapshot = RawSnapshot::new(vec![node("Button", Some("sa\u{200B}ve"), Some("\u{FEFF}"), vec![])]);
        let tree = ElementTree::build(&snapshot, &options, 1);
        assert_eq!(tree.root().name.as_deref(), Some("save"));
        assert_eq!(tree.root().label, None);
    }

    #[test]
    fn visibility_uses_only_vertical_screen_bounds() {
        let snapshot = RawSnapshot::new(vec![node(
            "Window",
            None,
            None,
            vec![
                at_y(node("Cell", None, None, vec![]), 100.0),
                at_y(node("Cell", None, None, vec![]), 900.0),
                at_y(node("Cell", None, None, vec![]), -5.0),
            ],
        )])
        .with_screen(390.0, 844.0);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);
        assert!(tree.get("cell:0").unwrap().visible);
        assert!(!tree.get("cell:1").unwrap().visible);
        assert!(!tree.get("cell:2").unwrap().visible);
    }

    #[test]
    fn hitpoint_is_center() {
        let snapshot = RawSnapshot::new(vec![at_y(node("Button", None, None, vec![]), 20.0)]);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);
        let root = tree.root();
        assert_eq!(root.hitpoint.x, 5.0);
        assert_eq!(root.hitpoint.y, 25.0);
    }

    #[test]
    fn stale_handles_fail_fast() {
        let first = ElementTree::build(
            &RawSnapshot::new(vec![node("Button", Some("save"), None, vec![])]),
            &TreeOptions::default(),
            1,
        );
        let handle = first.get("button:0").unwrap().handle();
        assert!(first.resolve(&handle).is_ok());

        // Same id, different element, next generation.
        let second = ElementTree::build(
            &RawSnapshot::new(vec![node("Button", Some("delete"), None, vec![])]),
            &TreeOptions::default(),
            2,
        );
        assert_eq!(second.get("button:0").unwrap().name.as_deref(), Some("delete"));
        assert!(matches!(second.resolve(&handle), Err(TreeError::StaleElement { handle: 1, live: 2, .. })));
    }

    #[test]
    fn parent_ref_carries_identity_only() {
        let snapshot = RawSnapshot::new(vec![node("Cell", Some("row"), Some("Row 1"), vec![node("Button", None, None, vec![])])]);
        let tree = ElementTree::build(&snapshot, &TreeOptions::default(), 1);
        let child = tree.get("button:0").unwrap();
        let parent = child.parent.as_ref().unwrap();
        assert_eq!(parent.id, "cell:0");
        assert_eq!(parent.label.as_deref(), Some("Row 1"));
        assert_eq!(tree.children(tree.root()).count(), 1);
    }
}
