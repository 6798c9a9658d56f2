//! 图元签名：与位置、旋转无关的几何描述，用于判断两个图元是否可比。

use std::collections::BTreeMap;

use zmeas_core::entity::{Entity, EntityId, EntityKind, EntityStore, Shape};

/// 未显式配置时圆弧扫掠角的比较容差（弧度）。
pub const DEFAULT_SWEEP_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signature {
    Circle { radius: f64 },
    Arc { radius: f64, sweep: f64 },
    Line { length: f64 },
    Polyline { vertex_count: usize, length: f64 },
    Unknown,
}

impl Signature {
    pub fn of(entity: &Entity) -> Self {
        match entity.shape() {
            Shape::Circle { radius, .. } => Signature::Circle { radius: *radius },
            Shape::Arc { radius, .. } => Signature::Arc {
                radius: *radius,
                sweep: entity.sweep_angle().unwrap_or_default(),
            },
            Shape::Line { .. } => Signature::Line {
                length: entity.characteristic_size(),
            },
            // 无顶点的多段线没有位置也没有长度，不参与比较
            Shape::Polyline { vertices, .. } if vertices.is_empty() => Signature::Unknown,
            Shape::Polyline { vertices, .. } => Signature::Polyline {
                vertex_count: vertices.len(),
                length: entity.characteristic_size(),
            },
            Shape::Unknown => Signature::Unknown,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Signature::Circle { .. } => EntityKind::Circle,
            Signature::Arc { .. } => EntityKind::Arc,
            Signature::Line { .. } => EntityKind::Line,
            Signature::Polyline { .. } => EntityKind::Polyline,
            Signature::Unknown => EntityKind::Unknown,
        }
    }

    /// 圆类图元的直径。
    pub fn diameter(&self) -> Option<f64> {
        match self {
            Signature::Circle { radius } | Signature::Arc { radius, .. } => Some(radius * 2.0),
            _ => None,
        }
    }
}

/// 同类且标量差严格小于容差时视为相同。圆/圆弧比较半径，
/// 圆弧额外用 [`DEFAULT_SWEEP_TOLERANCE`] 比较扫掠角。
pub fn signatures_match(a: &Signature, b: &Signature, geometry_tolerance: f64) -> bool {
    signatures_match_with_sweep(a, b, geometry_tolerance, DEFAULT_SWEEP_TOLERANCE)
}

pub fn signatures_match_with_sweep(
    a: &Signature,
    b: &Signature,
    geometry_tolerance: f64,
    sweep_tolerance: f64,
) -> bool {
    let within = |x: f64, y: f64, tolerance: f64| (x - y).abs() < tolerance;
    match (a, b) {
        (Signature::Circle { radius: ra }, Signature::Circle { radius: rb }) => {
            within(*ra, *rb, geometry_tolerance)
        }
        (
            Signature::Arc {
                radius: ra,
                sweep: sa,
            },
            Signature::Arc {
                radius: rb,
                sweep: sb,
            },
        ) => within(*ra, *rb, geometry_tolerance) && within(*sa, *sb, sweep_tolerance),
        (Signature::Line { length: la }, Signature::Line { length: lb }) => {
            within(*la, *lb, geometry_tolerance)
        }
        (
            Signature::Polyline {
                vertex_count: ca,
                length: la,
            },
            Signature::Polyline {
                vertex_count: cb,
                length: lb,
            },
        ) => ca == cb && within(*la, *lb, geometry_tolerance),
        _ => false,
    }
}

/// 快速分组键：多段线按顶点数分组，其余按尺寸取整分桶。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuickGroupKey {
    Circle { size_bucket: i64 },
    Arc { size_bucket: i64 },
    Line { size_bucket: i64 },
    Polyline { vertex_count: usize },
}

pub fn quick_group_key(entity: &Entity, bucket_size: f64) -> Option<QuickGroupKey> {
    let bucket = |value: f64| (value / bucket_size.max(f64::EPSILON)).round() as i64;
    match Signature::of(entity) {
        Signature::Circle { radius } => Some(QuickGroupKey::Circle {
            size_bucket: bucket(radius * 2.0),
        }),
        Signature::Arc { radius, .. } => Some(QuickGroupKey::Arc {
            size_bucket: bucket(radius * 2.0),
        }),
        Signature::Line { length } => Some(QuickGroupKey::Line {
            size_bucket: bucket(length),
        }),
        Signature::Polyline { vertex_count, .. } => {
            Some(QuickGroupKey::Polyline { vertex_count })
        }
        Signature::Unknown => None,
    }
}

/// 将语料库中相似的图元粗略归组，只保留至少两个成员的组。
pub fn quick_groups(
    store: &EntityStore,
    bucket_size: f64,
) -> BTreeMap<QuickGroupKey, Vec<EntityId>> {
    let mut groups: BTreeMap<QuickGroupKey, Vec<EntityId>> = BTreeMap::new();
    for entity in store.entities() {
        if let Some(key) = quick_group_key(entity, bucket_size) {
            groups.entry(key).or_default().push(entity.id());
        }
    }
    groups.retain(|_, members| members.len() > 1);
    groups
}
