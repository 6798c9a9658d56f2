use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use zmeas_engine::matcher::ANCHOR_BATCH_SIZE;
use zmeas_engine::settings::MatchSettings;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV_VAR: &str = "ZMEAS_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub frame: FrameConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `ZMEAS_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 模式匹配参数。`angle_tolerance` 以度为单位，用于圆弧扫掠角比较。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub geometry_tolerance: f64,
    pub position_fuzziness: f64,
    pub angle_tolerance: f64,
    pub min_match_distance: f64,
    pub anchor_batch_size: usize,
}

impl MatchingConfig {
    pub fn settings(&self) -> MatchSettings {
        MatchSettings {
            geometry_tolerance: self.geometry_tolerance,
            position_fuzziness: self.position_fuzziness,
            angle_tolerance: self.angle_tolerance,
            min_match_distance: self.min_match_distance,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let settings = MatchSettings::default();
        Self {
            geometry_tolerance: settings.geometry_tolerance,
            position_fuzziness: settings.position_fuzziness,
            angle_tolerance: settings.angle_tolerance,
            min_match_distance: settings.min_match_distance,
            anchor_batch_size: ANCHOR_BATCH_SIZE,
        }
    }
}

/// 坐标系参数：图纸留白比例与渲染图像尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub padding_ratio: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            padding_ratio: 0.05,
            image_width: 1600,
            image_height: 1200,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
