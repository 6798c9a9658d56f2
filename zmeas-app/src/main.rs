use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use zmeas_config::{AppConfig, ConfigError, FrameConfig};
use zmeas_core::frame::{CoordinateFrame, DxfExtents, ImageSize};
use zmeas_core::geometry::Point2;
use zmeas_engine::errors::EngineError;
use zmeas_engine::export::export_rows;
use zmeas_engine::group::ComponentModel;
use zmeas_engine::matcher::PatternMatcher;

mod corpus;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Corpus(#[from] corpus::CorpusError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to serialize export row: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    corpus: Option<PathBuf>,
    origin: Option<Point2>,
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut options = Options::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    eprintln!("`--config` 需要提供配置文件路径");
                    std::process::exit(1);
                };
                options.config = Some(PathBuf::from(path));
            }
            "--corpus" => {
                let Some(path) = args.next() else {
                    eprintln!("`--corpus` 需要提供语料库 JSON 路径");
                    std::process::exit(1);
                };
                options.corpus = Some(PathBuf::from(path));
            }
            "--origin" => {
                let Some(origin) = args.next().as_deref().and_then(parse_origin) else {
                    eprintln!("`--origin` 需要形如 `x,y` 的坐标");
                    std::process::exit(1);
                };
                options.origin = Some(origin);
            }
            other => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
        }
    }

    let (config, fallback) = load_configuration(options.config.take());
    init_logging(&config);
    if let Some(err) = fallback {
        report_config_fallback(&err);
    }
    info!("启动 ZMeas 模式匹配");

    if let Err(err) = run(&config, &options) {
        error!(error = %err, "模式匹配失败");
        std::process::exit(1);
    }
}

fn run(config: &AppConfig, options: &Options) -> Result<(), AppError> {
    let corpus = match &options.corpus {
        Some(path) => corpus::load(path)?,
        None => {
            info!("未指定语料库，使用内建演示数据");
            corpus::demo()
        }
    };

    let mut model = ComponentModel::new();
    let seed = corpus.seed.register(&mut model, &corpus.entities)?;
    let frame = build_frame(&corpus.entities, &config.frame, options.origin);
    info!(
        entities = corpus.entities.len(),
        anchor_x = frame.anchor().x(),
        anchor_y = frame.anchor().y(),
        "坐标系已就绪"
    );

    let matcher = PatternMatcher::new(&corpus.entities, config.matching.settings())
        .with_batch_size(config.matching.anchor_batch_size);
    let results = matcher.find_for_seed(&model, seed, None)?;
    let committed = model.commit_matches(seed, results, &corpus.entities)?;
    info!(seed = seed.get(), matches = committed.len(), "匹配结果已写入");

    for row in export_rows(&model, &frame) {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

/// 以语料包围盒生成 DXF 范围；语料为空时退化为未标定坐标系。
fn build_frame(
    entities: &zmeas_core::entity::EntityStore,
    config: &FrameConfig,
    origin: Option<Point2>,
) -> CoordinateFrame {
    let frame = match entities
        .bounds()
        .and_then(|bounds| DxfExtents::from_bounds(&bounds, config.padding_ratio))
    {
        Some(extents) => CoordinateFrame::dxf(extents),
        None => {
            warn!("语料库没有有效范围，坐标系未标定");
            CoordinateFrame::uncalibrated()
        }
    };
    frame
        .with_image_size(Some(ImageSize::new(config.image_width, config.image_height)))
        .with_manual_origin(origin)
}

fn parse_origin(text: &str) -> Option<Point2> {
    let (x, y) = text.split_once(',')?;
    let x: f64 = x.trim().parse().ok()?;
    let y: f64 = y.trim().parse().ok()?;
    (x.is_finite() && y.is_finite()).then(|| Point2::new(x, y))
}

/// 加载失败时回退到默认配置，并把错误交给调用方在日志就绪后报告。
fn load_configuration(override_path: Option<PathBuf>) -> (AppConfig, Option<ConfigError>) {
    let loaded = match override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    match loaded {
        Ok(cfg) => (cfg, None),
        Err(err) => (AppConfig::default(), Some(err)),
    }
}

fn report_config_fallback(err: &ConfigError) {
    match err {
        ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
            warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值");
        }
        ConfigError::Context { .. } => {
            warn!(error = %err, "加载配置失败，使用内建默认值");
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
