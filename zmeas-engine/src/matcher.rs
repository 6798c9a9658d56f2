//! 几何模式匹配。
//!
//! 给定种子组件，在语料库中寻找经任意旋转、平移后几何相同的其他实例：
//!
//! 1. 递归展开种子（含嵌套子组件）得到成员图元；
//! 2. 以特征尺寸最大的成员为主锚点，以距其最远的成员为方向参考；
//! 3. 在未被占用的语料上建立均匀网格；
//! 4. 对每个签名与主锚点相符的候选 A，用附近与参考成员相符的候选 R 生成
//!    旋转假设 `Δθ = atan2(R − A) − ref_angle`（单成员种子只有 `Δθ = 0`）；
//! 5. 按假设重建其余成员的期望位置并在 3×3 邻域内查找，任何一个缺失即放弃；
//! 6. 每个锚点采纳第一个通过间距检查的假设（贪心，非全局最优），其成员在本次
//!    调用中不再参与其他簇。
//!
//! 假设按 `(距离误差, 旋转角)` 排序后逐一尝试，对称零件上的选择因此是确定的。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace};
use zmeas_core::entity::{Entity, EntityId, EntityStore};
use zmeas_core::geometry::{Bounds2D, Point2, Vector2, normalize_degrees, normalize_radians};

use crate::errors::EngineError;
use crate::group::{Component, ComponentId, ComponentModel};
use crate::settings::MatchSettings;
use crate::signature::{Signature, signatures_match_with_sweep};
use crate::spatial::{SpatialGrid, cell_size_for};

/// 动态位置容差占种子包围盒长边的比例。
pub const DYNAMIC_TOLERANCE_RATIO: f64 = 0.02;
/// 参考成员搜索半径在 `ref_distance` 之外追加的动态容差倍数。
pub const REFERENCE_SEARCH_MARGIN: f64 = 5.0;
/// 参考成员距离允许偏离 `ref_distance` 的动态容差倍数。
pub const REFERENCE_DISTANCE_BAND: f64 = 4.0;
/// 可取消版本每批处理的锚点数。
pub const ANCHOR_BATCH_SIZE: usize = 64;

/// 一次匹配产生的新簇，由调用方通过 [`ComponentModel::commit_matches`] 写入模型。
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub id: ComponentId,
    pub name: String,
    pub entity_ids: BTreeSet<EntityId>,
    pub centroid: Point2,
    pub bounds: Bounds2D,
    pub rotation: f64,
    pub rotation_deg: f64,
}

/// 协作式取消标记，可在线程间克隆共享。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 种子的形状描述：主锚点签名、方向参考与其余成员相对主锚点的偏移。
#[derive(Debug)]
struct SeedLayout {
    primary: Signature,
    reference: Option<ReferenceEdge>,
    members: Vec<SeedMember>,
    dynamic_tolerance: f64,
    /// 签名为 Unknown 的成员数；非零时不可能产生匹配。
    incomparable: usize,
}

#[derive(Debug, Clone, Copy)]
struct ReferenceEdge {
    signature: Signature,
    distance: f64,
    angle: f64,
}

#[derive(Debug, Clone, Copy)]
struct SeedMember {
    signature: Signature,
    offset: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hypothesis {
    rotation: f64,
    distance_error: f64,
}

struct Candidate<'a> {
    entity: &'a Entity,
    signature: Signature,
    center: Point2,
}

/// 按设置的容差计算动态位置容差：`max(w, h, 1) * 0.02 * fuzziness`。
pub fn dynamic_tolerance(seed_bounds: &Bounds2D, position_fuzziness: f64) -> f64 {
    seed_bounds.width().max(seed_bounds.height()).max(1.0)
        * DYNAMIC_TOLERANCE_RATIO
        * position_fuzziness
}

impl SeedLayout {
    fn analyze(members: &[&Entity], settings: &MatchSettings) -> Option<Self> {
        let primary = members.iter().copied().reduce(|best, entity| {
            if entity.characteristic_size() > best.characteristic_size() {
                entity
            } else {
                best
            }
        })?;
        let anchor_center = primary.center();

        let mut bounds = Bounds2D::empty();
        for entity in members {
            bounds.include_bounds(&entity.bounds());
        }

        let others: Vec<&Entity> = members
            .iter()
            .copied()
            .filter(|entity| entity.id() != primary.id())
            .collect();

        let reference = others
            .iter()
            .copied()
            .reduce(|best, entity| {
                if entity.center().distance_to(anchor_center)
                    > best.center().distance_to(anchor_center)
                {
                    entity
                } else {
                    best
                }
            })
            .map(|entity| {
                let offset = anchor_center.vector_to(entity.center());
                ReferenceEdge {
                    signature: Signature::of(entity),
                    distance: offset.length(),
                    angle: offset.angle(),
                }
            });

        Some(Self {
            primary: Signature::of(primary),
            reference,
            members: others
                .iter()
                .map(|entity| SeedMember {
                    signature: Signature::of(entity),
                    offset: anchor_center.vector_to(entity.center()),
                })
                .collect(),
            dynamic_tolerance: dynamic_tolerance(&bounds, settings.position_fuzziness)
                .max(f64::EPSILON),
            incomparable: members
                .iter()
                .filter(|entity| Signature::of(entity) == Signature::Unknown)
                .count(),
        })
    }
}

/// 匹配器：持有语料库与设置，可多次针对不同种子调用。
pub struct PatternMatcher<'a> {
    corpus: &'a EntityStore,
    settings: MatchSettings,
    batch_size: usize,
}

impl<'a> PatternMatcher<'a> {
    pub fn new(corpus: &'a EntityStore, settings: MatchSettings) -> Self {
        Self {
            corpus,
            settings,
            batch_size: ANCHOR_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn find_matches(
        &self,
        seed_entities: &BTreeSet<EntityId>,
        seed_component: &Component,
        existing_matches: &[&Component],
        first_id: ComponentId,
    ) -> Vec<MatchResult> {
        // 未提供取消标记时 run 不会返回错误
        self.run(seed_entities, seed_component, existing_matches, first_id, None)
            .unwrap_or_default()
    }

    /// 分批处理锚点，每批开始前检查取消标记。取消时丢弃已找到的部分结果。
    pub fn find_matches_cancellable(
        &self,
        seed_entities: &BTreeSet<EntityId>,
        seed_component: &Component,
        existing_matches: &[&Component],
        first_id: ComponentId,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchResult>, EngineError> {
        self.run(
            seed_entities,
            seed_component,
            existing_matches,
            first_id,
            Some(cancel),
        )
    }

    /// 从组件模型准备一次匹配：校验种子、展开成员、收集已有匹配并预留 ID。
    pub fn find_for_seed(
        &self,
        model: &ComponentModel,
        seed: ComponentId,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<MatchResult>, EngineError> {
        let seed_component = model
            .component(seed)
            .ok_or(EngineError::ComponentNotFound(seed.get()))?;
        if seed_component.is_match() {
            return Err(EngineError::MatchCannotBeSeed(seed.get()));
        }
        let seed_entities = model.flatten_entities(seed)?;
        let existing: Vec<&Component> = model.matches_of(seed).collect();
        self.run(
            &seed_entities,
            seed_component,
            &existing,
            model.next_component_id(),
            cancel,
        )
    }

    fn run(
        &self,
        seed_entities: &BTreeSet<EntityId>,
        seed_component: &Component,
        existing_matches: &[&Component],
        first_id: ComponentId,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<MatchResult>, EngineError> {
        let members: Vec<&Entity> = seed_entities
            .iter()
            .filter_map(|id| self.corpus.entity(*id))
            .collect();
        let Some(layout) = SeedLayout::analyze(&members, &self.settings) else {
            debug!(seed = seed_component.id().get(), "种子没有可用图元，跳过匹配");
            return Ok(Vec::new());
        };

        if layout.incomparable > 0 {
            debug!(
                seed = seed_component.id().get(),
                incomparable = layout.incomparable,
                primary_incomparable = layout.primary == Signature::Unknown,
                "种子包含无法比较的图元，含这些成员的簇不会被匹配"
            );
        }

        let mut claimed: HashSet<EntityId> = seed_entities.iter().copied().collect();
        for existing in existing_matches {
            claimed.extend(existing.entity_ids().iter().copied());
        }

        let candidates: Vec<Candidate<'_>> = self
            .corpus
            .entities()
            .filter(|entity| !claimed.contains(&entity.id()))
            .map(|entity| Candidate {
                entity,
                signature: Signature::of(entity),
                center: entity.center(),
            })
            .collect();
        let grid = SpatialGrid::build(
            cell_size_for(layout.dynamic_tolerance),
            candidates
                .iter()
                .enumerate()
                .map(|(index, candidate)| (index, candidate.center)),
        );

        let anchors: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| self.same_shape(&layout.primary, &candidate.signature))
            .map(|(index, _)| index)
            .collect();

        debug!(
            seed = seed_component.id().get(),
            members = members.len(),
            candidates = candidates.len(),
            anchors = anchors.len(),
            dynamic_tolerance = layout.dynamic_tolerance,
            cell_size = grid.cell_size(),
            "开始模式匹配"
        );

        let mut spacing: Vec<Point2> = Vec::new();
        if self.settings.min_match_distance > 0.0 {
            spacing.push(seed_component.centroid());
            spacing.extend(existing_matches.iter().map(|c| c.centroid()));
        }

        let mut used = vec![false; candidates.len()];
        let mut results: Vec<MatchResult> = Vec::new();

        for batch in anchors.chunks(self.batch_size) {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                debug!(seed = seed_component.id().get(), "模式匹配已取消");
                return Err(EngineError::Cancelled);
            }
            for &anchor in batch {
                if used[anchor] {
                    continue;
                }
                let hypotheses = self.hypotheses(&layout, &candidates, &grid, &used, anchor);
                for hypothesis in hypotheses {
                    let Some(cluster) =
                        self.reconstruct(&layout, &candidates, &grid, &used, anchor, hypothesis)
                    else {
                        continue;
                    };

                    let mut bounds = Bounds2D::empty();
                    for &index in &cluster {
                        bounds.include_bounds(&candidates[index].entity.bounds());
                    }
                    if bounds.is_empty() {
                        trace!(
                            anchor = candidates[anchor].entity.id().get(),
                            "簇没有有效范围，跳过"
                        );
                        continue;
                    }
                    let centroid = bounds.center();

                    if self.settings.min_match_distance > 0.0
                        && spacing
                            .iter()
                            .any(|p| p.distance_to(centroid) < self.settings.min_match_distance)
                    {
                        trace!(
                            anchor = candidates[anchor].entity.id().get(),
                            x = centroid.x(),
                            y = centroid.y(),
                            "簇距离已有匹配过近，尝试下一个假设"
                        );
                        continue;
                    }

                    for &index in &cluster {
                        used[index] = true;
                    }
                    spacing.push(centroid);

                    let ordinal = existing_matches.len() + results.len() + 1;
                    let result = MatchResult {
                        id: ComponentId::new(first_id.get() + results.len() as u64),
                        name: format!("{} Match {}", seed_component.name(), ordinal),
                        entity_ids: cluster
                            .iter()
                            .map(|index| candidates[*index].entity.id())
                            .collect(),
                        centroid,
                        bounds,
                        rotation: normalize_radians(hypothesis.rotation),
                        rotation_deg: normalize_degrees(hypothesis.rotation.to_degrees()),
                    };
                    debug!(
                        id = result.id.get(),
                        x = centroid.x(),
                        y = centroid.y(),
                        rotation_deg = result.rotation_deg,
                        "找到匹配"
                    );
                    results.push(result);
                    break;
                }
            }
        }

        info!(
            seed = seed_component.id().get(),
            found = results.len(),
            "模式匹配完成"
        );
        Ok(results)
    }

    #[inline]
    fn same_shape(&self, a: &Signature, b: &Signature) -> bool {
        signatures_match_with_sweep(
            a,
            b,
            self.settings.geometry_tolerance,
            self.settings.sweep_tolerance_radians(),
        )
    }

    /// 为锚点生成有序的旋转假设列表。
    fn hypotheses(
        &self,
        layout: &SeedLayout,
        candidates: &[Candidate<'_>],
        grid: &SpatialGrid,
        used: &[bool],
        anchor: usize,
    ) -> Vec<Hypothesis> {
        let reference = match layout.reference {
            // 参考成员与锚点重合时方向无法确定，偏移全为零，旋转无关紧要
            Some(reference) if reference.distance > f64::EPSILON => reference,
            _ => {
                return vec![Hypothesis {
                    rotation: 0.0,
                    distance_error: 0.0,
                }];
            }
        };

        let tolerance = layout.dynamic_tolerance;
        let origin = candidates[anchor].center;
        let radius = reference.distance + REFERENCE_SEARCH_MARGIN * tolerance;
        let band = REFERENCE_DISTANCE_BAND * tolerance;

        let mut hypotheses: Vec<Hypothesis> = grid
            .within_radius(origin, radius)
            .filter(|&index| index != anchor && !used[index])
            .filter(|&index| self.same_shape(&reference.signature, &candidates[index].signature))
            .filter_map(|index| {
                let offset = origin.vector_to(candidates[index].center);
                let distance_error = (offset.length() - reference.distance).abs();
                (distance_error <= band).then(|| Hypothesis {
                    rotation: normalize_radians(offset.angle() - reference.angle),
                    distance_error,
                })
            })
            .collect();
        hypotheses.sort_by(|a, b| {
            a.distance_error
                .total_cmp(&b.distance_error)
                .then(a.rotation.total_cmp(&b.rotation))
        });
        hypotheses
    }

    /// 按假设重建整簇，返回成员候选下标（主锚点在首位）。任一成员缺失即返回 None。
    fn reconstruct(
        &self,
        layout: &SeedLayout,
        candidates: &[Candidate<'_>],
        grid: &SpatialGrid,
        used: &[bool],
        anchor: usize,
        hypothesis: Hypothesis,
    ) -> Option<Vec<usize>> {
        let origin = candidates[anchor].center;
        let tolerance = layout.dynamic_tolerance;
        let mut cluster = vec![anchor];

        for member in &layout.members {
            let expected = origin.translate(member.offset.rotated(hypothesis.rotation));
            let found = grid
                .adjacent(expected)
                .filter(|&index| !used[index] && !cluster.contains(&index))
                .filter(|&index| self.same_shape(&member.signature, &candidates[index].signature))
                .map(|index| (index, candidates[index].center.distance_to(expected)))
                .filter(|(_, distance)| *distance <= tolerance)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            match found {
                Some((index, _)) => cluster.push(index),
                None => {
                    trace!(
                        anchor = candidates[anchor].entity.id().get(),
                        rotation = hypothesis.rotation,
                        "成员缺失，放弃该假设"
                    );
                    return None;
                }
            }
        }
        Some(cluster)
    }
}

/// 单次匹配调用：`seed_entities` 为种子递归展开后的图元集合。
/// 结果 ID 从 `first_id` 起连续分配。
pub fn find_matches(
    seed_entities: &BTreeSet<EntityId>,
    corpus: &EntityStore,
    seed_component: &Component,
    existing_matches: &[&Component],
    settings: &MatchSettings,
    first_id: ComponentId,
) -> Vec<MatchResult> {
    PatternMatcher::new(corpus, *settings).find_matches(
        seed_entities,
        seed_component,
        existing_matches,
        first_id,
    )
}
