//! 坐标系转换。
//!
//! 三个坐标系：
//! - 归一化坐标：`[0,1]²`，对应渲染后的栅格图像，y 轴向下；
//! - CAD 绝对坐标：图纸物理单位，y 轴向上，与原点选择无关；
//! - 逻辑坐标：绝对坐标减去锚点（手动原点 > 图纸默认中心 > `(0,0)`）。
//!
//! [`CoordinateFrame`] 是一次调用期间不可变的快照。修改原点或图像尺寸时
//! 通过 `with_*` 方法生成新快照，旧快照算出的逻辑坐标不再有效。

use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Point2};

/// 归一化坐标（UI/栅格空间）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalized(pub Point2);

/// CAD 绝对坐标。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteCad(pub Point2);

/// 相对锚点的逻辑坐标，即最终展示给用户的坐标。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Logic(pub Point2);

macro_rules! frame_point {
    ($name:ident) => {
        impl $name {
            #[inline]
            pub fn new(x: f64, y: f64) -> Self {
                Self(Point2::new(x, y))
            }

            #[inline]
            pub fn x(self) -> f64 {
                self.0.x()
            }

            #[inline]
            pub fn y(self) -> f64 {
                self.0.y()
            }

            #[inline]
            pub fn point(self) -> Point2 {
                self.0
            }
        }
    };
}

frame_point!(Normalized);
frame_point!(AbsoluteCad);
frame_point!(Logic);

/// DXF 图纸的范围元数据，`total_w`/`total_h` 已包含两侧留白。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DxfExtents {
    pub min_x: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub padding: f64,
    pub total_w: f64,
    pub total_h: f64,
    pub default_center: Point2,
}

impl DxfExtents {
    /// 根据图纸包围盒生成范围元数据，留白为长边乘以 `padding_ratio`。
    pub fn from_bounds(bounds: &Bounds2D, padding_ratio: f64) -> Option<Self> {
        if bounds.is_empty() {
            return None;
        }
        let width = bounds.width();
        let height = bounds.height();
        let padding = width.max(height) * padding_ratio.max(0.0);
        Some(Self {
            min_x: bounds.min().x(),
            max_x: bounds.max().x(),
            max_y: bounds.max().y(),
            padding,
            total_w: width + padding * 2.0,
            total_h: height + padding * 2.0,
            default_center: bounds.center(),
        })
    }
}

/// 栅格图像像素尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 高宽比（高 / 宽），尺寸退化时返回 None。
    pub fn aspect(&self) -> Option<f64> {
        if self.is_degenerate() {
            None
        } else {
            Some(self.height as f64 / self.width as f64)
        }
    }
}

/// 普通图片的标定比例：整幅图像对应的物理宽高。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationScale {
    pub total_width_units: f64,
    pub total_height_units: f64,
}

impl CalibrationScale {
    /// 由用户绘制的参考线段（归一化坐标）及其实际长度推导比例。
    pub fn from_reference(
        start: Normalized,
        end: Normalized,
        real_length: f64,
        image: ImageSize,
    ) -> Option<Self> {
        if image.is_degenerate() || !real_length.is_finite() || real_length <= 0.0 {
            return None;
        }
        let width = image.width as f64;
        let height = image.height as f64;
        let dx = (end.x() - start.x()) * width;
        let dy = (end.y() - start.y()) * height;
        let pixel_length = dx.hypot(dy);
        if pixel_length <= f64::EPSILON {
            return None;
        }
        let units_per_pixel = real_length / pixel_length;
        Some(Self {
            total_width_units: width * units_per_pixel,
            total_height_units: height * units_per_pixel,
        })
    }
}

/// 比例来源：DXF 范围或图片标定，二者择一。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameScale {
    Dxf(DxfExtents),
    Calibrated(CalibrationScale),
}

/// 坐标转换快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    #[serde(default)]
    scale: Option<FrameScale>,
    #[serde(default)]
    manual_origin: Option<Point2>,
    #[serde(default)]
    image_size: Option<ImageSize>,
}

/// 单轴线性映射 `abs = offset + n * span`，span 为负表示轴向翻转。
#[derive(Debug, Clone, Copy)]
struct AxisMap {
    offset: f64,
    span: f64,
}

impl AxisMap {
    #[inline]
    fn forward(self, n: f64) -> f64 {
        self.offset + n * self.span
    }

    #[inline]
    fn inverse(self, abs: f64) -> f64 {
        (abs - self.offset) / self.span
    }
}

impl CoordinateFrame {
    /// 未标定的空快照，所有比例相关转换都返回 None。
    pub fn uncalibrated() -> Self {
        Self::default()
    }

    pub fn dxf(extents: DxfExtents) -> Self {
        Self {
            scale: Some(FrameScale::Dxf(extents)),
            ..Self::default()
        }
    }

    pub fn calibrated(scale: CalibrationScale) -> Self {
        Self {
            scale: Some(FrameScale::Calibrated(scale)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_manual_origin(self, origin: Option<Point2>) -> Self {
        Self {
            manual_origin: origin,
            ..self
        }
    }

    #[must_use]
    pub fn with_image_size(self, image_size: Option<ImageSize>) -> Self {
        Self { image_size, ..self }
    }

    #[inline]
    pub fn scale(&self) -> Option<&FrameScale> {
        self.scale.as_ref()
    }

    #[inline]
    pub fn manual_origin(&self) -> Option<Point2> {
        self.manual_origin
    }

    #[inline]
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    /// 逻辑坐标锚点：手动原点优先，其次 DXF 默认中心，否则 `(0,0)`。
    pub fn anchor(&self) -> Point2 {
        if let Some(origin) = self.manual_origin {
            return origin;
        }
        match self.scale {
            Some(FrameScale::Dxf(extents)) => extents.default_center,
            _ => Point2::origin(),
        }
    }

    /// DXF 模式的有效高度：图像尺寸已知时按实际渲染宽高比推算，
    /// 避免 DXF 声明宽高比与栅格取整后的宽高比不一致。
    pub fn effective_height(&self) -> Option<f64> {
        match self.scale? {
            FrameScale::Dxf(extents) => Some(
                self.image_size
                    .and_then(|size| size.aspect())
                    .map(|aspect| extents.total_w * aspect)
                    .unwrap_or(extents.total_h),
            ),
            FrameScale::Calibrated(scale) => Some(scale.total_height_units),
        }
    }

    fn axes(&self) -> Option<(AxisMap, AxisMap)> {
        let (x_axis, y_axis) = match self.scale? {
            FrameScale::Dxf(extents) => {
                let height = self.effective_height()?;
                (
                    AxisMap {
                        offset: extents.min_x - extents.padding,
                        span: extents.total_w,
                    },
                    AxisMap {
                        offset: extents.max_y + extents.padding,
                        span: -height,
                    },
                )
            }
            FrameScale::Calibrated(scale) => (
                AxisMap {
                    offset: 0.0,
                    span: scale.total_width_units,
                },
                AxisMap {
                    offset: scale.total_height_units,
                    span: -scale.total_height_units,
                },
            ),
        };
        let usable = |axis: AxisMap| {
            axis.offset.is_finite() && axis.span.is_finite() && axis.span.abs() > f64::EPSILON
        };
        if usable(x_axis) && usable(y_axis) {
            Some((x_axis, y_axis))
        } else {
            None
        }
    }

    pub fn to_absolute_cad(&self, normalized: Normalized) -> Option<AbsoluteCad> {
        let (x_axis, y_axis) = self.axes()?;
        Some(AbsoluteCad::new(
            x_axis.forward(normalized.x()),
            y_axis.forward(normalized.y()),
        ))
    }

    pub fn to_normalized_from_absolute(&self, absolute: AbsoluteCad) -> Option<Normalized> {
        let (x_axis, y_axis) = self.axes()?;
        Some(Normalized::new(
            x_axis.inverse(absolute.x()),
            y_axis.inverse(absolute.y()),
        ))
    }

    /// 纯平移，不涉及比例或旋转。
    pub fn absolute_to_logic(&self, absolute: AbsoluteCad) -> Logic {
        let anchor = self.anchor();
        Logic::new(absolute.x() - anchor.x(), absolute.y() - anchor.y())
    }

    pub fn logic_to_absolute(&self, logic: Logic) -> AbsoluteCad {
        let anchor = self.anchor();
        AbsoluteCad::new(logic.x() + anchor.x(), logic.y() + anchor.y())
    }

    pub fn to_logic(&self, normalized: Normalized) -> Option<Logic> {
        self.to_absolute_cad(normalized)
            .map(|absolute| self.absolute_to_logic(absolute))
    }

    pub fn to_normalized(&self, logic: Logic) -> Option<Normalized> {
        self.to_normalized_from_absolute(self.logic_to_absolute(logic))
    }

    /// 将 UI 框选矩形（两个归一化角点）转换为 CAD 绝对范围。
    pub fn normalized_rect_to_absolute(&self, a: Normalized, b: Normalized) -> Option<Bounds2D> {
        let a = self.to_absolute_cad(a)?;
        let b = self.to_absolute_cad(b)?;
        Some(Bounds2D::from_corners(a.point(), b.point()))
    }
}
