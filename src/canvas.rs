//! Typed view of the canvas state document.
//!
//! The server stores and returns the raw JSON text of a canvas. These types
//! exist for code that wants to work with the diagram. Every struct keeps
//! unknown keys in `extra`, so a typed round trip does not drop fields written
//! by other editors. It does not keep the original text: coordinates and
//! sizes are `f64`, so an integer such as `100` is written back as `100.0`.
//! Save the raw document when the exact text matters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Canvas state stored for a project that has never been saved.
pub fn default_canvas_state() -> Value {
    serde_json::json!({
        "items": [],
        "connections": [],
        "sequence_counter": 0
    })
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasState {
    #[serde(default)]
    pub items: Vec<CanvasItem>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub sequence_counter: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A placed component on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasItem {
    pub id: i64,
    /// Missing on items placed by editors that embed component fields inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentRef>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(rename = "scaleX", default = "one")]
    pub scale_x: f64,
    #[serde(rename = "scaleY", default = "one")]
    pub scale_y: f64,
    #[serde(default)]
    pub sequence: i64,
    /// Grip attachment entries, kept as written by the editor
    #[serde(default)]
    pub connections: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference from a canvas item to its catalog component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: i64,
    pub source_item_id: i64,
    pub source_grip_index: usize,
    pub target_item_id: i64,
    pub target_grip_index: usize,
    #[serde(default)]
    pub waypoints: Vec<Point>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripSide {
    Top,
    Right,
    Bottom,
    Left,
}

/// Attachment point on a component. `x` and `y` are percentages of the
/// component's content box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grip {
    pub x: f64,
    pub y: f64,
    pub side: GripSide,
}

impl Grip {
    /// Grips assumed for components that declare none: mid-left and mid-right.
    pub fn default_pair() -> Vec<Grip> {
        vec![
            Grip {
                x: 0.0,
                y: 50.0,
                side: GripSide::Left,
            },
            Grip {
                x: 100.0,
                y: 50.0,
                side: GripSide::Right,
            },
        ]
    }
}

impl CanvasState {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn item(&self, id: i64) -> Option<&CanvasItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Ids of connections whose source or target item is not on the canvas.
    /// Nothing enforces this invariant; the document is client-trusted.
    pub fn dangling_connections(&self) -> Vec<i64> {
        let ids: HashSet<i64> = self.items.iter().map(|item| item.id).collect();
        self.connections
            .iter()
            .filter(|c| !ids.contains(&c.source_item_id) || !ids.contains(&c.target_item_id))
            .map(|c| c.id)
            .collect()
    }

    /// Advance the sequence counter and return the new value.
    pub fn next_sequence(&mut self) -> i64 {
        self.sequence_counter += 1;
        self.sequence_counter
    }
}
