//! 均匀网格空间索引。
//!
//! 以图元参考点 `floor(center / cell_size)` 作为网格键，每次匹配调用重建一次。

use std::collections::HashMap;

use zmeas_core::geometry::Point2;

/// 网格最小单元尺寸（图纸单位）。
pub const MIN_CELL_SIZE: f64 = 100.0;
/// 单元尺寸相对动态容差的倍数。
pub const CELL_TOLERANCE_FACTOR: f64 = 20.0;

pub type CellKey = (i64, i64);

/// 根据动态容差推导单元尺寸：`max(tolerance * 20, 100)`。
pub fn cell_size_for(dynamic_tolerance: f64) -> f64 {
    (dynamic_tolerance * CELL_TOLERANCE_FACTOR).max(MIN_CELL_SIZE)
}

/// 以参考点为键的网格，条目为调用方提供的索引（通常是候选列表下标）。
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<usize>>,
    len: usize,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size.is_finite() && cell_size > 0.0 {
                cell_size
            } else {
                MIN_CELL_SIZE
            },
            cells: HashMap::new(),
            len: 0,
        }
    }

    /// 由 `(条目, 参考点)` 序列一次性构建网格。
    pub fn build<I>(cell_size: f64, items: I) -> Self
    where
        I: IntoIterator<Item = (usize, Point2)>,
    {
        let mut grid = Self::new(cell_size);
        for (item, point) in items {
            grid.insert(item, point);
        }
        grid
    }

    pub fn insert(&mut self, item: usize, point: Point2) {
        let key = self.cell_of(point);
        self.cells.entry(key).or_default().push(item);
        self.len += 1;
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn cell_of(&self, point: Point2) -> CellKey {
        (
            (point.x() / self.cell_size).floor() as i64,
            (point.y() / self.cell_size).floor() as i64,
        )
    }

    /// 以 `point` 所在单元为中心、半径为 `ring` 个单元的方形邻域内的全部条目。
    pub fn neighborhood(&self, point: Point2, ring: i64) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy) = self.cell_of(point);
        let ring = ring.max(0);
        (cx - ring..=cx + ring)
            .flat_map(move |gx| (cy - ring..=cy + ring).map(move |gy| (gx, gy)))
            .filter_map(move |key| self.cells.get(&key))
            .flat_map(|items| items.iter().copied())
    }

    /// 3×3 邻域。单元尺寸不小于动态容差的 20 倍，容差范围内的点必在其中。
    pub fn adjacent(&self, point: Point2) -> impl Iterator<Item = usize> + '_ {
        self.neighborhood(point, 1)
    }

    /// 覆盖以 `point` 为圆心、`radius` 为半径圆的邻域条目（未做精确距离过滤）。
    pub fn within_radius(&self, point: Point2, radius: f64) -> impl Iterator<Item = usize> + '_ {
        let ring = (radius.max(0.0) / self.cell_size).ceil() as i64;
        self.neighborhood(point, ring)
    }
}
