pub mod frame;

pub mod geometry {
    use std::f64::consts::TAU;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，坐标单位为 CAD 绝对单位。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn origin() -> Self {
            Self(DVec2::ZERO)
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn distance_to(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        /// 与 X 轴正方向的夹角（弧度，范围 `(-π, π]`）。
        #[inline]
        pub fn angle(self) -> f64 {
            self.0.y.atan2(self.0.x)
        }

        /// 绕原点逆时针旋转 `angle` 弧度。
        #[inline]
        pub fn rotated(self, angle: f64) -> Self {
            Self(DVec2::from_angle(angle).rotate(self.0))
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框。空框以 `min > max` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意两个角点构造，自动整理为 min/max。
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            let mut bounds = Self::empty();
            bounds.include_point(a);
            bounds.include_point(b);
            bounds
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.x() - self.min.x()
            }
        }

        #[inline]
        pub fn height(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.max.y() - self.min.y()
            }
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// `other` 是否完整落在当前范围内（含边界）。
        pub fn contains_bounds(&self, other: &Bounds2D) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            other.min.x() >= self.min.x()
                && other.min.y() >= self.min.y()
                && other.max.x() <= self.max.x()
                && other.max.y() <= self.max.y()
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let min_vec = self.min.as_vec2();
            let max_vec = self.max.as_vec2();
            let center = (min_vec + max_vec) * 0.5;
            Point2::from_vec(center)
        }
    }

    impl Default for Bounds2D {
        fn default() -> Self {
            Self::empty()
        }
    }

    /// 将弧度归一化到 `[0, 2π)`。
    pub fn normalize_radians(angle: f64) -> f64 {
        let result = angle.rem_euclid(TAU);
        // rem_euclid 对极小负数可能返回恰好 TAU
        if result >= TAU { 0.0 } else { result }
    }

    /// 将角度归一化到 `[0, 360)`。
    pub fn normalize_degrees(angle: f64) -> f64 {
        let result = angle.rem_euclid(360.0);
        if result >= 360.0 { 0.0 } else { result }
    }

}

pub mod entity {
    use std::collections::HashMap;
    use std::f64::consts::{FRAC_PI_2, PI, TAU};
    use std::fmt;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, Point2, Vector2, normalize_radians};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    impl fmt::Display for EntityId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum EntityKind {
        Circle,
        Arc,
        Line,
        Polyline,
        Unknown,
    }

    /// 图元的几何数据。角度以弧度储存，遵循数学正方向。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum Shape {
        Circle {
            center: Point2,
            radius: f64,
        },
        Arc {
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        },
        Line {
            start: Point2,
            end: Point2,
        },
        Polyline {
            vertices: Vec<Point2>,
            #[serde(default)]
            is_closed: bool,
        },
        /// 提取器无法归类的图元，只保留包围盒。
        Unknown,
    }

    /// 从 CAD 数据提取出的不可变图元。块参照变换已由提取器预先展开。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Entity {
        id: EntityId,
        bounds: Bounds2D,
        shape: Shape,
    }

    impl Entity {
        pub fn circle(id: EntityId, center: Point2, radius: f64) -> Self {
            let radius = radius.abs();
            let bounds = Bounds2D::from_corners(
                Point2::new(center.x() - radius, center.y() - radius),
                Point2::new(center.x() + radius, center.y() + radius),
            );
            Self {
                id,
                bounds,
                shape: Shape::Circle { center, radius },
            }
        }

        pub fn arc(
            id: EntityId,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> Self {
            let radius = radius.abs();
            let mut bounds = Bounds2D::empty();
            arc_bounds(center, radius, start_angle, end_angle, &mut bounds);
            Self {
                id,
                bounds,
                shape: Shape::Arc {
                    center,
                    radius,
                    start_angle,
                    end_angle,
                },
            }
        }

        pub fn line(id: EntityId, start: Point2, end: Point2) -> Self {
            Self {
                id,
                bounds: Bounds2D::from_corners(start, end),
                shape: Shape::Line { start, end },
            }
        }

        pub fn polyline<I>(id: EntityId, vertices: I, is_closed: bool) -> Self
        where
            I: IntoIterator<Item = Point2>,
        {
            let vertices: Vec<Point2> = vertices.into_iter().collect();
            let mut bounds = Bounds2D::empty();
            for vertex in &vertices {
                bounds.include_point(*vertex);
            }
            Self {
                id,
                bounds,
                shape: Shape::Polyline {
                    vertices,
                    is_closed,
                },
            }
        }

        /// 无法识别的图元，仅凭提取器给出的包围盒参与区域选择。
        pub fn unknown(id: EntityId, bounds: Bounds2D) -> Self {
            Self {
                id,
                bounds,
                shape: Shape::Unknown,
            }
        }

        #[inline]
        pub fn id(&self) -> EntityId {
            self.id
        }

        #[inline]
        pub fn bounds(&self) -> Bounds2D {
            self.bounds
        }

        #[inline]
        pub fn shape(&self) -> &Shape {
            &self.shape
        }

        pub fn kind(&self) -> EntityKind {
            match self.shape {
                Shape::Circle { .. } => EntityKind::Circle,
                Shape::Arc { .. } => EntityKind::Arc,
                Shape::Line { .. } => EntityKind::Line,
                Shape::Polyline { .. } => EntityKind::Polyline,
                Shape::Unknown => EntityKind::Unknown,
            }
        }

        /// 匹配时使用的参考点：圆/圆弧取圆心，线段取中点，多段线取顶点均值。
        /// 这些点随图元做刚体变换，因此旋转后的副本仍可按偏移量重建。
        pub fn center(&self) -> Point2 {
            match &self.shape {
                Shape::Circle { center, .. } | Shape::Arc { center, .. } => *center,
                Shape::Line { start, end } => {
                    Point2::from_vec((start.as_vec2() + end.as_vec2()) * 0.5)
                }
                Shape::Polyline { vertices, .. } if !vertices.is_empty() => {
                    let sum = vertices
                        .iter()
                        .fold(glam::DVec2::ZERO, |acc, vertex| acc + vertex.as_vec2());
                    Point2::from_vec(sum / vertices.len() as f64)
                }
                _ => {
                    if self.bounds.is_empty() {
                        Point2::origin()
                    } else {
                        self.bounds.center()
                    }
                }
            }
        }

        /// 特征尺寸：圆类取直径，其余取长度。用于挑选主锚点。
        pub fn characteristic_size(&self) -> f64 {
            match &self.shape {
                Shape::Circle { radius, .. } | Shape::Arc { radius, .. } => radius * 2.0,
                Shape::Line { start, end } => start.distance_to(*end),
                Shape::Polyline {
                    vertices,
                    is_closed,
                } => polyline_length(vertices, *is_closed),
                Shape::Unknown => self.bounds.width().max(self.bounds.height()),
            }
        }

        /// 圆弧扫掠角，范围 `(0, 2π]`；非圆弧返回 None。
        pub fn sweep_angle(&self) -> Option<f64> {
            match self.shape {
                Shape::Arc {
                    start_angle,
                    end_angle,
                    ..
                } => {
                    let (start, end) = canonical_interval(start_angle, end_angle);
                    Some(end - start)
                }
                _ => None,
            }
        }
    }

    pub fn polyline_length(vertices: &[Point2], is_closed: bool) -> f64 {
        let open: f64 = vertices
            .windows(2)
            .map(|pair| pair[0].distance_to(pair[1]))
            .sum();
        match (is_closed, vertices.first(), vertices.last()) {
            (true, Some(first), Some(last)) if vertices.len() > 2 => {
                open + last.distance_to(*first)
            }
            _ => open,
        }
    }

    /// 图元语料库：按导入顺序保存实体，并维护 ID 索引。
    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    #[serde(from = "Vec<Entity>", into = "Vec<Entity>")]
    pub struct EntityStore {
        entities: Vec<Entity>,
        index: HashMap<EntityId, usize>,
        next_entity_id: u64,
    }

    impl From<Vec<Entity>> for EntityStore {
        fn from(entities: Vec<Entity>) -> Self {
            let mut store = Self::new();
            for entity in entities {
                store.insert(entity);
            }
            store
        }
    }

    impl From<EntityStore> for Vec<Entity> {
        fn from(store: EntityStore) -> Self {
            store.entities
        }
    }

    impl EntityStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_circle(&mut self, center: Point2, radius: f64) -> EntityId {
            let id = self.next_id();
            self.push(Entity::circle(id, center, radius))
        }

        pub fn add_arc(
            &mut self,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> EntityId {
            let id = self.next_id();
            self.push(Entity::arc(id, center, radius, start_angle, end_angle))
        }

        pub fn add_line(&mut self, start: Point2, end: Point2) -> EntityId {
            let id = self.next_id();
            self.push(Entity::line(id, start, end))
        }

        pub fn add_polyline<I>(&mut self, vertices: I, is_closed: bool) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            let id = self.next_id();
            self.push(Entity::polyline(id, vertices, is_closed))
        }

        pub fn add_unknown(&mut self, bounds: Bounds2D) -> EntityId {
            let id = self.next_id();
            self.push(Entity::unknown(id, bounds))
        }

        /// 插入外部构造的实体。若 ID 已存在则替换旧实体。
        pub fn insert(&mut self, entity: Entity) -> EntityId {
            let id = entity.id();
            self.next_entity_id = self.next_entity_id.max(id.get() + 1);
            if let Some(slot) = self.index.get(&id).copied() {
                self.entities[slot] = entity;
                id
            } else {
                self.push(entity)
            }
        }

        #[inline]
        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.index.get(&id).map(|slot| &self.entities[*slot])
        }

        #[inline]
        pub fn contains(&self, id: EntityId) -> bool {
            self.index.contains_key(&id)
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &Entity> {
            self.entities.iter()
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.entities.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entities.is_empty()
        }

        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            for entity in &self.entities {
                bounds.include_bounds(&entity.bounds());
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        /// 返回包围盒完整落在 `region` 内的实体 ID，用于框选种子。
        pub fn entities_within(&self, region: &Bounds2D) -> Vec<EntityId> {
            self.entities
                .iter()
                .filter(|entity| region.contains_bounds(&entity.bounds()))
                .map(Entity::id)
                .collect()
        }

        fn push(&mut self, entity: Entity) -> EntityId {
            let id = entity.id();
            self.index.insert(id, self.entities.len());
            self.entities.push(entity);
            id
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
        let start = normalize_radians(start);
        let mut end = normalize_radians(end);
        if (end - start).abs() < 1e-9 {
            end = start + TAU;
        } else if end < start {
            end += TAU;
        }
        (start, end)
    }

    fn arc_point(center: Point2, radius: f64, angle: f64) -> Point2 {
        let offset = Vector2::new(radius * angle.cos(), radius * angle.sin());
        center.translate(offset)
    }

    fn arc_bounds(center: Point2, radius: f64, start: f64, end: f64, bounds: &mut Bounds2D) {
        if radius <= f64::EPSILON {
            bounds.include_point(center);
            return;
        }

        let (start, end) = canonical_interval(start, end);
        bounds.include_point(arc_point(center, radius, start));
        bounds.include_point(arc_point(center, radius, end));

        const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
        for base in QUADRANTS {
            let mut candidate = base;
            while candidate < start {
                candidate += TAU;
            }
            if candidate <= end {
                bounds.include_point(arc_point(center, radius, candidate));
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn store_allocates_sequential_ids() {
            let mut store = EntityStore::new();
            let circle = store.add_circle(Point2::new(0.0, 0.0), 5.0);
            let line = store.add_line(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0));
            let arc = store.add_arc(Point2::new(10.0, 0.0), 2.0, 0.0, FRAC_PI_2);

            assert_eq!(circle.get(), 0);
            assert_eq!(line.get(), 1);
            assert_eq!(arc.get(), 2);
            assert_eq!(store.len(), 3);

            let line_entity = store.entity(line).expect("line stored");
            assert_eq!(line_entity.kind(), EntityKind::Line);
            assert!((line_entity.characteristic_size() - 5.0).abs() < 1e-12);
            assert!((line_entity.center().x() - 1.5).abs() < 1e-12);

            let circle_entity = store.entity(circle).expect("circle stored");
            assert!((circle_entity.characteristic_size() - 10.0).abs() < 1e-12);
            assert!((circle_entity.bounds().width() - 10.0).abs() < 1e-12);
        }

        #[test]
        fn arc_bounds_cover_quadrant_extremes() {
            let arc = Entity::arc(EntityId::new(0), Point2::new(0.0, 0.0), 2.0, 0.0, PI);
            let bounds = arc.bounds();
            assert!((bounds.min().x() + 2.0).abs() < 1e-9);
            assert!((bounds.max().x() - 2.0).abs() < 1e-9);
            assert!((bounds.max().y() - 2.0).abs() < 1e-9);
            assert!(bounds.min().y().abs() < 1e-9);
            assert!((arc.sweep_angle().unwrap() - PI).abs() < 1e-9);

            // 起止角相同视为整圆
            let full = Entity::arc(EntityId::new(1), Point2::new(0.0, 0.0), 1.0, 1.0, 1.0);
            assert!((full.sweep_angle().unwrap() - TAU).abs() < 1e-9);
        }

        #[test]
        fn degenerate_geometry_is_tolerated() {
            let dot = Entity::arc(EntityId::new(0), Point2::new(3.0, 3.0), 0.0, 0.0, 1.0);
            assert_eq!(dot.bounds().width(), 0.0);
            assert_eq!(dot.characteristic_size(), 0.0);

            let zero_line = Entity::line(
                EntityId::new(1),
                Point2::new(1.0, 1.0),
                Point2::new(1.0, 1.0),
            );
            assert_eq!(zero_line.characteristic_size(), 0.0);

            let empty = Entity::polyline(EntityId::new(2), Vec::new(), true);
            assert_eq!(empty.characteristic_size(), 0.0);
            assert_eq!(empty.center(), Point2::origin());
        }

        #[test]
        fn closed_polyline_includes_closing_segment() {
            let square = [
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 4.0),
                Point2::new(0.0, 4.0),
            ];
            assert!((polyline_length(&square, false) - 12.0).abs() < 1e-12);
            assert!((polyline_length(&square, true) - 16.0).abs() < 1e-12);

            let entity = Entity::polyline(EntityId::new(7), square, true);
            assert!((entity.center().x() - 2.0).abs() < 1e-12);
            assert!((entity.center().y() - 2.0).abs() < 1e-12);
        }

        #[test]
        fn region_selection_requires_full_containment() {
            let mut store = EntityStore::new();
            let inside = store.add_circle(Point2::new(0.0, 0.0), 1.0);
            let _straddling = store.add_circle(Point2::new(5.0, 0.0), 2.0);
            let region = Bounds2D::from_corners(Point2::new(-2.0, -2.0), Point2::new(5.0, 2.0));
            assert_eq!(store.entities_within(&region), vec![inside]);
        }

        #[test]
        fn store_deserializes_from_plain_entity_list() {
            let json = r#"[
                {"id": 4, "bounds": {"min": [-1.0, -1.0], "max": [1.0, 1.0]},
                 "shape": {"kind": "circle", "center": [0.0, 0.0], "radius": 1.0}},
                {"id": 9, "bounds": {"min": [0.0, 0.0], "max": [2.0, 0.0]},
                 "shape": {"kind": "line", "start": [0.0, 0.0], "end": [2.0, 0.0]}}
            ]"#;
            let mut store: EntityStore = serde_json::from_str(json).expect("parse corpus");
            assert_eq!(store.len(), 2);
            assert!(store.contains(EntityId::new(9)));
            assert_eq!(
                store.entity(EntityId::new(4)).map(Entity::kind),
                Some(EntityKind::Circle)
            );

            // 新分配的 ID 必须越过已导入的最大值
            let next = store.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0));
            assert_eq!(next.get(), 10);
        }
    }
}
