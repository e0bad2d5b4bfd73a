//! Diagram interchange: the `.pfd` file envelope and the equipment list.
//!
//! A `.pfd` file wraps a canvas with version stamps, the viewport and the
//! owning project. Older desktop saves put a `components` array at the root
//! instead, keyed by `start_id`/`end_id`; [`DiagramExport::from_json`] reads
//! both and always yields the current shape.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::canvas::{CanvasItem, CanvasState, Connection, Point};
use crate::db::models::ProjectSummary;

pub const EXPORT_VERSION: &str = "1.0.0";

/// Description used when an item names no component.
pub const UNKNOWN_COMPONENT: &str = "Unknown Component";

/// Default size of a legacy item that records none.
const LEGACY_ITEM_SIZE: f64 = 100.0;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid diagram JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown diagram format: expected `canvasState` or `components`")]
    UnknownFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramExport {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub displayed_at: String,
    #[serde(default)]
    pub editor_version: String,
    pub canvas_state: ExportedCanvas,
    #[serde(default)]
    pub viewport: Viewport,
    /// Absent in legacy files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ExportedProject>,
}

/// Canvas as written inside an export; the counter is camelCase here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCanvas {
    #[serde(default)]
    pub items: Vec<CanvasItem>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub sequence_counter: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub position: Point,
}

fn unit_scale() -> f64 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: unit_scale(),
            position: Point::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedProject {
    /// Numeric for server projects, a string for desktop exports
    pub id: Value,
    pub name: String,
    #[serde(default)]
    pub created_at: String,
}

impl From<&ProjectSummary> for ExportedProject {
    fn from(project: &ProjectSummary) -> Self {
        Self {
            id: json!(project.id),
            name: project.name.clone(),
            created_at: project.created_at.to_rfc3339(),
        }
    }
}

/// One row of the equipment list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRow {
    #[serde(rename = "Sr. No.")]
    pub sr_no: usize,
    #[serde(rename = "Tag Number")]
    pub tag_number: String,
    #[serde(rename = "Equipment Description")]
    pub description: String,
}

impl CanvasState {
    /// Wrap this canvas in a `.pfd` envelope stamped with the current time.
    pub fn to_export(&self, project: ExportedProject, viewport: Viewport) -> DiagramExport {
        DiagramExport {
            version: EXPORT_VERSION.to_string(),
            displayed_at: Utc::now().to_rfc3339(),
            editor_version: EXPORT_VERSION.to_string(),
            canvas_state: ExportedCanvas {
                items: self.items.clone(),
                connections: self.connections.clone(),
                sequence_counter: self.sequence_counter,
                extra: self.extra.clone(),
            },
            viewport,
            project: Some(project),
        }
    }

    /// Tag and description of every item, sorted by tag and numbered from 1.
    pub fn equipment_list(&self) -> Vec<EquipmentRow> {
        let mut rows: Vec<(String, String)> = self
            .items
            .iter()
            .map(|item| (item_tag(item), item_description(item)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        rows.into_iter()
            .enumerate()
            .map(|(idx, (tag_number, description))| EquipmentRow {
                sr_no: idx + 1,
                tag_number,
                description,
            })
            .collect()
    }
}

impl DiagramExport {
    /// Read a `.pfd` document in either the current or the legacy layout.
    /// Connections whose source item is not on the canvas are dropped.
    pub fn from_json(text: &str) -> Result<Self, ExportError> {
        let value: Value = serde_json::from_str(text)?;

        let mut export = if value.get("canvasState").is_some() {
            serde_json::from_value::<DiagramExport>(value)?
        } else if value.get("components").is_some() {
            Self::from_legacy(&value)?
        } else {
            return Err(ExportError::UnknownFormat);
        };

        let ids: HashSet<i64> = export.canvas_state.items.iter().map(|i| i.id).collect();
        let before = export.canvas_state.connections.len();
        export
            .canvas_state
            .connections
            .retain(|c| ids.contains(&c.source_item_id));
        let dropped = before - export.canvas_state.connections.len();
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped connections with no source item");
        }

        Ok(export)
    }

    fn from_legacy(value: &Value) -> Result<Self, ExportError> {
        let items = as_slice(value.get("components"))
            .iter()
            .enumerate()
            .map(|(idx, raw)| legacy_item(idx, raw))
            .collect::<Vec<_>>();
        let connections = as_slice(value.get("connections"))
            .iter()
            .enumerate()
            .filter_map(|(idx, raw)| legacy_connection(idx, raw))
            .collect::<Vec<_>>();

        let canvas = ExportedCanvas {
            sequence_counter: items.len() as i64,
            items: serde_json::from_value(Value::Array(items))?,
            connections: serde_json::from_value(Value::Array(connections))?,
            extra: Map::new(),
        };

        Ok(Self {
            canvas_state: canvas,
            ..Self::default()
        })
    }

    pub fn into_canvas_state(self) -> CanvasState {
        CanvasState {
            items: self.canvas_state.items,
            connections: self.canvas_state.connections,
            sequence_counter: self.canvas_state.sequence_counter,
            extra: self.canvas_state.extra,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn as_slice(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn legacy_item(idx: usize, raw: &Value) -> Value {
    let mut item = raw.as_object().cloned().unwrap_or_default();
    item.entry("id").or_insert_with(|| json!(idx));
    item.entry("width").or_insert_with(|| json!(LEGACY_ITEM_SIZE));
    item.entry("height").or_insert_with(|| json!(LEGACY_ITEM_SIZE));
    if !item.contains_key("label") {
        if let Some(label) = raw.pointer("/config/default_label").filter(|v| v.is_string()) {
            item.insert("label".to_string(), label.clone());
        }
    }
    Value::Object(item)
}

/// Rename `start_id`/`end_id`/`start_grip`/`end_grip` to the current keys.
/// Returns `None` when either endpoint is missing.
fn legacy_connection(idx: usize, raw: &Value) -> Option<Value> {
    let mut conn = raw.as_object()?.clone();
    let mut take = |current: &str, legacy: &str| {
        let legacy_value = conn.remove(legacy);
        conn.remove(current)
            .or(legacy_value)
            .filter(|v| !v.is_null())
    };

    let source = take("sourceItemId", "start_id")?;
    let target = take("targetItemId", "end_id")?;
    let source_grip = take("sourceGripIndex", "start_grip").unwrap_or_else(|| json!(0));
    let target_grip = take("targetGripIndex", "end_grip").unwrap_or_else(|| json!(0));

    conn.insert("sourceItemId".to_string(), source);
    conn.insert("targetItemId".to_string(), target);
    conn.insert("sourceGripIndex".to_string(), source_grip);
    conn.insert("targetGripIndex".to_string(), target_grip);
    conn.entry("id").or_insert_with(|| json!(idx));
    conn.entry("start_side").or_insert_with(|| json!("right"));
    conn.entry("end_side").or_insert_with(|| json!("left"));
    for key in ["path_offset", "start_adjust", "end_adjust"] {
        conn.entry(key).or_insert_with(|| json!(0.0));
    }
    Some(Value::Object(conn))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn item_tag(item: &CanvasItem) -> String {
    if !item.label.is_empty() {
        return item.label.clone();
    }
    non_empty_str(item.extra.get("config").and_then(|c| c.get("default_label")))
        .unwrap_or_default()
        .to_string()
}

/// Component name from the item's config, its inline fields or its catalog
/// reference. Unnamed items fall back to their SVG file name.
fn item_description(item: &CanvasItem) -> String {
    let component = item.component.as_ref().map(|c| &c.extra);
    let named = non_empty_str(item.extra.get("config").and_then(|c| c.get("name")))
        .or_else(|| non_empty_str(item.extra.get("name")))
        .or_else(|| non_empty_str(component.and_then(|c| c.get("name"))))
        .filter(|name| *name != UNKNOWN_COMPONENT);
    if let Some(name) = named {
        return name.to_string();
    }

    let svg = non_empty_str(item.extra.get("svg_path"))
        .or_else(|| non_empty_str(item.extra.get("svg")))
        .or_else(|| non_empty_str(component.and_then(|c| c.get("svg"))));
    svg.and_then(name_from_svg_path)
        .unwrap_or_else(|| UNKNOWN_COMPONENT.to_string())
}

/// `assets/907_Gate_Valve.svg` becomes `Gate Valve`.
fn name_from_svg_path(path: &str) -> Option<String> {
    let stem = Path::new(path).file_stem()?.to_str()?;
    let stem = stem
        .strip_prefix("905")
        .or_else(|| stem.strip_prefix("907"))
        .unwrap_or(stem);
    let name = stem.replace('_', " ").trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(value: Value) -> CanvasState {
        CanvasState::from_value(value).unwrap()
    }

    fn desktop_project() -> ExportedProject {
        ExportedProject {
            id: json!("desktop-export"),
            name: "Crude Unit".to_string(),
            created_at: "2024-05-01T10:00:00".to_string(),
        }
    }

    #[test]
    fn test_export_envelope_shape() {
        let state = canvas(json!({
            "items": [{"id": 1, "label": "P-101", "x": 10, "y": 20}],
            "connections": [],
            "sequence_counter": 4,
            "grid": true
        }));
        let export = state.to_export(desktop_project(), Viewport::default());
        let value = serde_json::to_value(&export).unwrap();

        assert_eq!(value["version"], EXPORT_VERSION);
        assert_eq!(value["editorVersion"], EXPORT_VERSION);
        assert!(value["displayedAt"].is_string());
        assert_eq!(value["canvasState"]["sequenceCounter"], 4);
        assert_eq!(value["canvasState"]["grid"], true);
        assert_eq!(value["canvasState"]["items"][0]["label"], "P-101");
        assert_eq!(value["viewport"], json!({"scale": 1.0, "position": {"x": 0.0, "y": 0.0}}));
        assert_eq!(value["project"]["id"], "desktop-export");
        assert_eq!(value["project"]["createdAt"], "2024-05-01T10:00:00");
    }

    #[test]
    fn test_export_reloads_to_same_canvas() {
        let state = canvas(json!({
            "items": [
                {"id": 1, "component": {"id": 3}, "label": "T-1"},
                {"id": 2, "component": {"id": 4}, "label": "T-2"}
            ],
            "connections": [{
                "id": 1, "sourceItemId": 1, "sourceGripIndex": 0,
                "targetItemId": 2, "targetGripIndex": 1
            }],
            "sequence_counter": 2
        }));
        let text = state
            .to_export(desktop_project(), Viewport { scale: 1.5, position: Point::default() })
            .to_json_pretty()
            .unwrap();

        let loaded = DiagramExport::from_json(&text).unwrap();
        assert_eq!(loaded.viewport.scale, 1.5);
        assert_eq!(loaded.project.as_ref().map(|p| p.name.as_str()), Some("Crude Unit"));
        assert_eq!(loaded.into_canvas_state(), state);
    }

    #[test]
    fn test_loads_legacy_components_layout() {
        let text = r#"{
            "components": [
                {"id": 0, "x": 5, "y": 6, "svg_path": "assets/905_Pump.svg",
                 "config": {"name": "Pump", "default_label": "P-01"}},
                {"x": 50, "y": 60, "width": 40, "config": {"default_label": "V-01"}}
            ],
            "connections": [
                {"start_id": 0, "end_id": 1, "start_grip": 1, "end_grip": 0},
                {"start_id": 9, "end_id": 1},
                {"start_id": 0}
            ]
        }"#;
        let export = DiagramExport::from_json(text).unwrap();
        assert!(export.project.is_none());
        assert_eq!(export.canvas_state.sequence_counter, 2);

        let state = export.into_canvas_state();
        assert_eq!(state.items[0].label, "P-01");
        assert_eq!(state.items[0].height, 100.0);
        assert_eq!(state.items[1].id, 1);
        assert_eq!(state.items[1].width, 40.0);
        assert_eq!(state.items[0].extra["svg_path"], "assets/905_Pump.svg");

        assert_eq!(state.connections.len(), 1);
        let conn = &state.connections[0];
        assert_eq!((conn.source_item_id, conn.source_grip_index), (0, 1));
        assert_eq!((conn.target_item_id, conn.target_grip_index), (1, 0));
        assert_eq!(conn.extra["start_side"], "right");
        assert_eq!(conn.extra["end_side"], "left");
        assert_eq!(conn.extra["path_offset"], 0.0);
        assert!(!conn.extra.contains_key("start_id"));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(matches!(
            DiagramExport::from_json(r#"{"items": []}"#),
            Err(ExportError::UnknownFormat)
        ));
        assert!(matches!(
            DiagramExport::from_json("not json"),
            Err(ExportError::Json(_))
        ));
    }

    #[test]
    fn test_equipment_list_sorted_by_tag_and_renumbered() {
        let state = canvas(json!({
            "items": [
                {"id": 1, "label": "V-02", "config": {"name": "Gate Valve"}},
                {"id": 2, "label": "P-01", "component": {"id": 7, "name": "Centrifugal Pump"}},
                {"id": 3, "label": "T-01", "name": "Unknown Component",
                 "svg": "/media/components/907_Storage_Tank.svg"},
                {"id": 4, "label": "V-01"}
            ]
        }));

        let rows = state.equipment_list();
        let flat: Vec<(usize, &str, &str)> = rows
            .iter()
            .map(|r| (r.sr_no, r.tag_number.as_str(), r.description.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![
                (1, "P-01", "Centrifugal Pump"),
                (2, "T-01", "Storage Tank"),
                (3, "V-01", UNKNOWN_COMPONENT),
                (4, "V-02", "Gate Valve"),
            ]
        );
    }

    #[test]
    fn test_equipment_row_uses_sheet_headers() {
        let row = EquipmentRow {
            sr_no: 1,
            tag_number: "P-01".to_string(),
            description: "Pump".to_string(),
        };
        assert_eq!(
            serde_json::to_value(row).unwrap(),
            json!({"Sr. No.": 1, "Tag Number": "P-01", "Equipment Description": "Pump"})
        );
    }
}
