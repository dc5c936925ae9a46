//! Raw and normalized UI element types.
//!
//! Backends report their hierarchy as a tree of [`RawNode`]s wrapped in a
//! [`RawSnapshot`]. The field names accepted on the wire cover the common
//! dialects (XCUITest `AXUniqueId`/`AXLabel`, UIAutomator `resource-id`/
//! `content-desc`, DOM-ish `text`), so every backend can hand over its dump
//! without a bespoke conversion step.
//!
//! [`ElementTree::build`](crate::tree::ElementTree::build) turns a snapshot
//! into normalized [`Element`]s, which are the only element type the rest of
//! the engine works with.

use serde::{Deserialize, Serialize};

/// A node in a backend's raw hierarchy dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    /// Backend-specific element type (e.g. "XCUIElementTypeButton", "android.widget.Button").
    #[serde(rename = "type", alias = "elementType", alias = "class", default)]
    pub element_type: Option<String>,

    /// Stable developer-assigned name (accessibility identifier, resource id).
    #[serde(alias = "AXUniqueId", alias = "identifier", alias = "resource-id", default)]
    pub name: Option<String>,

    /// User-visible label.
    #[serde(alias = "AXLabel", alias = "content-desc", alias = "text", default)]
    pub label: Option<String>,

    /// Current value, e.g. text field contents.
    #[serde(alias = "AXValue", default)]
    pub value: Option<String>,

    /// Frame in screen points.
    #[serde(alias = "frame", alias = "bounds", default)]
    pub rect: Option<ElementFrame>,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub children: Vec<RawNode>,
}

/// The flat frame representation backends report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A complete hierarchy dump as returned by
/// [`Driver::source_tree`](crate::driver::Driver::source_tree).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawSnapshot {
    /// Screen dimensions, when the backend reports them.
    pub screen: Option<Size>,
    /// Top-level nodes. More than one root gets a synthetic parent.
    pub roots: Vec<RawNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    Wrapped {
        #[serde(default)]
        screen: Option<Size>,
        #[serde(alias = "elements")]
        roots: Vec<RawNode>,
    },
    List(Vec<RawNode>),
    Single(RawNode),
}

impl<'de> Deserialize<'de> for RawSnapshot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match SnapshotRepr::deserialize(deserializer)? {
            SnapshotRepr::Wrapped { screen, roots } => RawSnapshot { screen, roots },
            SnapshotRepr::List(roots) => RawSnapshot { screen: None, roots },
            SnapshotRepr::Single(root) => RawSnapshot { screen: None, roots: vec![root] },
        })
    }
}

impl RawSnapshot {
    pub fn new(roots: Vec<RawNode>) -> Self {
        Self { screen: None, roots }
    }

    pub fn with_screen(mut self, width: f64, height: f64) -> Self {
        self.screen = Some(Size { width, height });
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Normalized element rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    /// Center of the rectangle, used as the element's hitpoint.
    pub fn center(&self) -> Point {
        Point {
            x: self.origin.x + self.size.width / 2.0,
            y: self.origin.y + self.size.height / 2.0,
        }
    }
}

impl From<ElementFrame> for Rect {
    fn from(frame: ElementFrame) -> Self {
        Rect {
            origin: Point { x: frame.x, y: frame.y },
            size: Size {
                width: frame.width,
                height: frame.height,
            },
        }
    }
}

/// Identifying fields of an element's parent. Never an owning pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub value: Option<String>,
}

/// A normalized element from one [`ElementTree`](crate::tree::ElementTree) build.
///
/// `id` is only meaningful together with `generation`: a later build may hand
/// the same id to a structurally different element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// `"<type>:<ordinal>"`, ordinal counted per type across the whole tree.
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub value: Option<String>,
    pub rect: Rect,
    pub hitpoint: Point,
    pub enabled: bool,
    /// Derived from `rect.origin.y` against the screen height only.
    pub visible: bool,
    pub parent: Option<ParentRef>,
    /// Child ids in document order.
    pub children: Vec<String>,
    /// Position among siblings.
    pub index: usize,
    /// Generation of the tree this element was built in.
    pub generation: u64,
}

/// A reference to an element that can be checked against the live tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
    pub generation: u64,
}

impl Element {
    pub fn handle(&self) -> ElementHandle {
        ElementHandle {
            id: self.id.clone(),
            generation: self.generation,
        }
    }

    /// The best human-readable description of this element.
    pub fn describe(&self) -> String {
        match (&self.name, &self.label) {
            (Some(name), _) => format!("{} '{}'", self.id, name),
            (None, Some(label)) => format!("{} \"{}\"", self.id, label),
            (None, None) => self.id.clone(),
        }
    }
}
