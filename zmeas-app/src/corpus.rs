use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use zmeas_core::entity::{EntityId, EntityStore};
use zmeas_core::geometry::Point2;
use zmeas_engine::errors::EngineError;
use zmeas_engine::group::{ComponentId, ComponentModel};

/// 待匹配的语料库与种子定义。
#[derive(Debug, Clone, Deserialize)]
pub struct Corpus {
    pub entities: EntityStore,
    pub seed: SeedSpec,
}

/// 种子组件描述，`children` 中的子组件会先于父组件创建。
#[derive(Debug, Clone, Deserialize)]
pub struct SeedSpec {
    pub name: String,
    #[serde(default)]
    pub entity_ids: Vec<EntityId>,
    #[serde(default)]
    pub children: Vec<SeedSpec>,
}

impl SeedSpec {
    /// 递归写入组件模型，返回顶层种子 ID。
    pub fn register(
        &self,
        model: &mut ComponentModel,
        corpus: &EntityStore,
    ) -> Result<ComponentId, EngineError> {
        let children = self
            .children
            .iter()
            .map(|child| child.register(model, corpus))
            .collect::<Result<Vec<_>, _>>()?;
        model.add_seed(
            self.name.clone(),
            self.entity_ids.iter().copied(),
            children,
            corpus,
        )
    }
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse corpus {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 从 JSON 文件加载语料库。
pub fn load(path: impl AsRef<Path>) -> Result<Corpus, CorpusError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let corpus: Corpus = serde_json::from_str(&content).map_err(|source| CorpusError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        entities = corpus.entities.len(),
        seed = %corpus.seed.name,
        "已加载语料库"
    );
    Ok(corpus)
}

/// 演示用零件：两个安装孔、一条加强筋和一段圆角，绕原点旋转后平移到 `(tx, ty)`。
fn place_bracket(store: &mut EntityStore, degrees: f64, tx: f64, ty: f64) -> Vec<EntityId> {
    use std::f64::consts::{FRAC_PI_2, PI};

    let turn = degrees.to_radians();
    let (sin, cos) = turn.sin_cos();
    let place = |x: f64, y: f64| Point2::new(x * cos - y * sin + tx, x * sin + y * cos + ty);
    vec![
        store.add_circle(place(0.0, 0.0), 6.0),
        store.add_circle(place(40.0, 0.0), 3.0),
        store.add_line(place(10.0, 15.0), place(30.0, 15.0)),
        store.add_arc(place(20.0, -12.0), 5.0, turn + PI, turn + PI + FRAC_PI_2),
    ]
}

/// 内建演示语料：种子支架外加四个旋转副本与若干干扰图元。
pub fn demo() -> Corpus {
    let mut entities = EntityStore::new();
    let seed = place_bracket(&mut entities, 0.0, 0.0, 0.0);
    for (degrees, tx, ty) in [
        (30.0, 250.0, 40.0),
        (90.0, -180.0, 210.0),
        (180.0, 320.0, 360.0),
        (247.5, -260.0, -220.0),
    ] {
        place_bracket(&mut entities, degrees, tx, ty);
    }
    // 干扰项：尺寸不同的孔和孤立的筋
    entities.add_circle(Point2::new(120.0, -150.0), 9.0);
    entities.add_line(Point2::new(-60.0, -40.0), Point2::new(-40.0, -40.0));

    let (holes, rest) = seed.split_at(2);
    Corpus {
        entities,
        seed: SeedSpec {
            name: "Bracket".to_string(),
            entity_ids: rest.to_vec(),
            children: vec![SeedSpec {
                name: "Bracket Holes".to_string(),
                entity_ids: holes.to_vec(),
                children: Vec::new(),
            }],
        },
    }
}
