pub mod export;
pub mod group;
pub mod matcher;
pub mod signature;
pub mod spatial;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum EngineError {
        #[error("component with id {0} not found")]
        ComponentNotFound(u64),
        #[error("entity with id {0} not found")]
        EntityNotFound(u64),
        #[error("component {0} cannot contain itself")]
        SelfReference(u64),
        #[error("adding component {child} under {parent} would create a cycle")]
        CycleDetected { parent: u64, child: u64 },
        #[error("component {child} is already nested under {parent}")]
        AlreadyNested { parent: u64, child: u64 },
        #[error("component {0} is a match and cannot be used as a seed")]
        MatchCannotBeSeed(u64),
        #[error("pattern matching was cancelled")]
        Cancelled,
    }
}

pub mod settings {
    use serde::{Deserialize, Serialize};

    /// 匹配调参。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct MatchSettings {
        /// 半径/长度比较允许的绝对差值（图纸单位）。
        pub geometry_tolerance: f64,
        /// 动态位置容差的倍率。
        pub position_fuzziness: f64,
        /// 圆弧扫掠角比较容差，单位为度。
        pub angle_tolerance: f64,
        /// 任意两个匹配（含种子）质心之间的最小间距，`0` 表示不限制。
        pub min_match_distance: f64,
    }

    impl MatchSettings {
        pub const DEFAULT_GEOMETRY_TOLERANCE: f64 = 0.5;
        pub const DEFAULT_POSITION_FUZZINESS: f64 = 1.0;
        pub const DEFAULT_ANGLE_TOLERANCE: f64 = 3.0;

        #[inline]
        pub fn sweep_tolerance_radians(&self) -> f64 {
            self.angle_tolerance.abs().to_radians()
        }
    }

    impl Default for MatchSettings {
        fn default() -> Self {
            Self {
                geometry_tolerance: Self::DEFAULT_GEOMETRY_TOLERANCE,
                position_fuzziness: Self::DEFAULT_POSITION_FUZZINESS,
                angle_tolerance: Self::DEFAULT_ANGLE_TOLERANCE,
                min_match_distance: 0.0,
            }
        }
    }
}
