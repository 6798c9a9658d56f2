//! 导出行：把组件质心转换到逻辑坐标，供调用方格式化为 CSV 或 JSON。

use serde::Serialize;
use zmeas_core::frame::{AbsoluteCad, CoordinateFrame};

use crate::group::{Component, ComponentModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Seed,
    Match,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub id: u64,
    pub name: String,
    /// 导出列名为 `type`。
    #[serde(rename = "type")]
    pub kind: ExportKind,
    pub x: f64,
    pub y: f64,
    pub angle_deg: f64,
    pub angle_rad: f64,
}

impl ExportRow {
    pub fn from_component(component: &Component, frame: &CoordinateFrame) -> Self {
        let logic = frame.absolute_to_logic(AbsoluteCad(component.centroid()));
        Self {
            id: component.id().get(),
            name: component.name().to_owned(),
            kind: if component.is_match() {
                ExportKind::Match
            } else {
                ExportKind::Seed
            },
            x: logic.x(),
            y: logic.y(),
            angle_deg: component.rotation_deg(),
            angle_rad: component.rotation(),
        }
    }
}

/// 按组件 ID 顺序导出全部组件。
pub fn export_rows(model: &ComponentModel, frame: &CoordinateFrame) -> Vec<ExportRow> {
    model
        .components()
        .map(|component| ExportRow::from_component(component, frame))
        .collect()
}
