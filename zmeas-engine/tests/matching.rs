use std::collections::{BTreeSet, HashSet};
use std::f64::consts::FRAC_PI_2;

use zmeas_core::entity::{EntityId, EntityStore};
use zmeas_core::geometry::Point2;
use zmeas_engine::errors::EngineError;
use zmeas_engine::group::{ComponentId, ComponentModel};
use zmeas_engine::matcher::{CancelToken, MatchResult, PatternMatcher, find_matches};
use zmeas_engine::settings::MatchSettings;

/// 刚体变换：先绕原点旋转 `degrees`，再平移到 `(tx, ty)`。
#[derive(Debug, Clone, Copy)]
struct Placement {
    degrees: f64,
    tx: f64,
    ty: f64,
}

impl Placement {
    fn new(degrees: f64, tx: f64, ty: f64) -> Self {
        Self { degrees, tx, ty }
    }

    fn apply(&self, x: f64, y: f64) -> Point2 {
        let (sin, cos) = self.degrees.to_radians().sin_cos();
        Point2::new(x * cos - y * sin + self.tx, x * sin + y * cos + self.ty)
    }
}

/// 两个圆：半径 5 位于原点，半径 3 位于 (20, 0)。返回大圆 ID 在首位。
fn place_pair(store: &mut EntityStore, placement: Placement) -> Vec<EntityId> {
    vec![
        store.add_circle(placement.apply(0.0, 0.0), 5.0),
        store.add_circle(placement.apply(20.0, 0.0), 3.0),
    ]
}

/// 两圆 + 一条线段 + 一段圆弧，用于验证多成员重建。
fn place_fixture(store: &mut EntityStore, placement: Placement) -> Vec<EntityId> {
    let mut ids = place_pair(store, placement);
    ids.push(store.add_line(placement.apply(5.0, 12.0), placement.apply(5.0, 18.0)));
    let turn = placement.degrees.to_radians();
    ids.push(store.add_arc(
        placement.apply(0.0, -15.0),
        4.0,
        turn,
        turn + FRAC_PI_2,
    ));
    ids
}

fn angle_gap(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

fn assert_disjoint(results: &[MatchResult], seed: &[EntityId]) {
    let mut seen: HashSet<EntityId> = seed.iter().copied().collect();
    for result in results {
        for id in &result.entity_ids {
            assert!(seen.insert(*id), "entity {id} claimed twice");
        }
    }
}

fn settings() -> MatchSettings {
    MatchSettings {
        min_match_distance: 50.0,
        ..MatchSettings::default()
    }
}

#[test]
fn recovers_every_rotated_copy_of_a_pair() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    let placements = [
        Placement::new(0.0, 300.0, 0.0),
        Placement::new(37.0, 600.0, 100.0),
        Placement::new(90.0, 0.0, 500.0),
        Placement::new(180.0, -400.0, -300.0),
        Placement::new(271.5, 800.0, -600.0),
        // 成员跨越网格单元边界
        Placement::new(135.0, 199.9, 399.95),
    ];
    let mut expected = Vec::new();
    for placement in placements {
        let ids = place_pair(&mut store, placement);
        expected.push((ids[0], placement.degrees));
    }

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Bracket", seed_ids.clone(), [], &store).unwrap();
    let results = PatternMatcher::new(&store, settings())
        .find_for_seed(&model, seed, None)
        .unwrap();

    assert_eq!(results.len(), placements.len());
    assert_disjoint(&results, &seed_ids);
    for (anchor, degrees) in expected {
        let result = results
            .iter()
            .find(|r| r.entity_ids.contains(&anchor))
            .unwrap_or_else(|| panic!("copy anchored at {anchor} was not found"));
        assert_eq!(result.entity_ids.len(), 2);
        assert!(
            angle_gap(result.rotation_deg, degrees) < 1.0,
            "rotation {} != {degrees}",
            result.rotation_deg
        );
        assert!((0.0..360.0).contains(&result.rotation_deg));
        assert!((0.0..std::f64::consts::TAU).contains(&result.rotation));
    }
}

#[test]
fn reconstructs_mixed_members_and_tight_bounds() {
    let mut store = EntityStore::new();
    let seed_ids = place_fixture(&mut store, Placement::new(0.0, 0.0, 0.0));
    let copy = place_fixture(&mut store, Placement::new(90.0, 500.0, 500.0));
    // 只差一个成员的残缺副本不能算匹配
    let partial = place_pair(&mut store, Placement::new(45.0, -500.0, 500.0));

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Fixture", seed_ids.clone(), [], &store).unwrap();
    let results = PatternMatcher::new(&store, settings())
        .find_for_seed(&model, seed, None)
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.entity_ids, copy.iter().copied().collect::<BTreeSet<_>>());
    assert!(partial.iter().all(|id| !result.entity_ids.contains(id)));
    assert!(angle_gap(result.rotation_deg, 90.0) < 1.0);

    // 包围盒取实际找到的成员并集
    let mut bounds = zmeas_core::geometry::Bounds2D::empty();
    for id in &copy {
        bounds.include_bounds(&store.entity(*id).unwrap().bounds());
    }
    assert_eq!(result.bounds, bounds);
    assert_eq!(result.centroid, bounds.center());
}

#[test]
fn near_duplicates_collapse_under_spacing_limit() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    place_pair(&mut store, Placement::new(0.0, 200.0, 0.0));
    place_pair(&mut store, Placement::new(0.0, 203.0, 1.0));

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Seed", seed_ids, [], &store).unwrap();

    let spaced = PatternMatcher::new(&store, settings())
        .find_for_seed(&model, seed, None)
        .unwrap();
    assert_eq!(spaced.len(), 1);

    let unlimited = MatchSettings {
        min_match_distance: 0.0,
        ..MatchSettings::default()
    };
    let all = PatternMatcher::new(&store, unlimited)
        .find_for_seed(&model, seed, None)
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn copies_too_close_to_the_seed_are_rejected() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    place_pair(&mut store, Placement::new(0.0, 10.0, 30.0));

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Seed", seed_ids, [], &store).unwrap();
    let results = PatternMatcher::new(&store, settings())
        .find_for_seed(&model, seed, None)
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn tolerance_boundary_is_strict() {
    let tolerance = MatchSettings::DEFAULT_GEOMETRY_TOLERANCE;
    let epsilon = 1e-3;
    let mut store = EntityStore::new();
    let seed_id = store.add_circle(Point2::new(0.0, 0.0), 5.0);
    let too_big = store.add_circle(Point2::new(300.0, 0.0), 5.0 + tolerance + epsilon);
    let just_inside = store.add_circle(Point2::new(600.0, 0.0), 5.0 + tolerance - epsilon);

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Hole", [seed_id], [], &store).unwrap();
    let results = PatternMatcher::new(&store, MatchSettings::default())
        .find_for_seed(&model, seed, None)
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].entity_ids.contains(&just_inside));
    assert!(!results[0].entity_ids.contains(&too_big));
    // 单成员种子不搜索旋转
    assert_eq!(results[0].rotation, 0.0);
    assert_eq!(results[0].rotation_deg, 0.0);
}

#[test]
fn nested_seed_is_flattened_and_rerun_adds_nothing() {
    let mut store = EntityStore::new();
    let seed_ids = place_fixture(&mut store, Placement::new(0.0, 0.0, 0.0));
    place_fixture(&mut store, Placement::new(200.0, 400.0, -250.0));
    place_fixture(&mut store, Placement::new(-30.0, -350.0, 250.0));

    let mut model = ComponentModel::new();
    let inner = model
        .add_seed("Holes", [seed_ids[0], seed_ids[1]], [], &store)
        .unwrap();
    let outer = model
        .add_seed("Plate", [seed_ids[2], seed_ids[3]], [inner], &store)
        .unwrap();

    let matcher = PatternMatcher::new(&store, settings());
    let results = matcher.find_for_seed(&model, outer, None).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.entity_ids.len() == 4));
    assert_eq!(results[0].id, model.next_component_id());
    assert_eq!(results[0].name, "Plate Match 1");
    assert_eq!(results[1].name, "Plate Match 2");
    assert_eq!(results[1].id.get(), results[0].id.get() + 1);

    let committed = model.commit_matches(outer, results, &store).unwrap();
    assert_eq!(model.matches_of(outer).count(), 2);
    for id in &committed {
        assert_eq!(model.component(*id).unwrap().parent_group_id(), Some(outer));
    }

    let again = matcher.find_for_seed(&model, outer, None).unwrap();
    assert!(again.is_empty());

    let err = matcher.find_for_seed(&model, committed[0], None).unwrap_err();
    assert_eq!(err, EngineError::MatchCannotBeSeed(committed[0].get()));
}

#[test]
fn symmetric_seed_yields_one_match_per_copy_deterministically() {
    let mut store = EntityStore::new();
    let seed_ids = vec![
        store.add_circle(Point2::new(0.0, 0.0), 3.0),
        store.add_circle(Point2::new(20.0, 0.0), 3.0),
    ];
    for (index, degrees) in [15.0, 110.0, 250.0].into_iter().enumerate() {
        let placement = Placement::new(degrees, 300.0 * (index as f64 + 1.0), 0.0);
        store.add_circle(placement.apply(0.0, 0.0), 3.0);
        store.add_circle(placement.apply(20.0, 0.0), 3.0);
    }

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Twin", seed_ids.clone(), [], &store).unwrap();
    let matcher = PatternMatcher::new(&store, settings());
    let first = matcher.find_for_seed(&model, seed, None).unwrap();
    let second = matcher.find_for_seed(&model, seed, None).unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_disjoint(&first, &seed_ids);
}

#[test]
fn empty_seed_and_empty_corpus_produce_nothing() {
    let store = EntityStore::new();
    let mut model = ComponentModel::new();
    let seed = model
        .add_seed("Empty", Vec::<EntityId>::new(), [], &store)
        .unwrap();
    let seed_component = model.component(seed).unwrap();

    let results = find_matches(
        &BTreeSet::new(),
        &store,
        seed_component,
        &[],
        &MatchSettings::default(),
        ComponentId::new(10),
    );
    assert!(results.is_empty());
}

#[test]
fn cancellation_discards_partial_work() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    for step in 1..=10 {
        place_pair(&mut store, Placement::new(step as f64 * 20.0, step as f64 * 150.0, 0.0));
    }

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Seed", seed_ids.clone(), [], &store).unwrap();
    let seed_entities = model.flatten_entities(seed).unwrap();
    let seed_component = model.component(seed).unwrap();
    let matcher = PatternMatcher::new(&store, settings()).with_batch_size(2);

    let token = CancelToken::new();
    let results = matcher
        .find_matches_cancellable(
            &seed_entities,
            seed_component,
            &[],
            model.next_component_id(),
            &token,
        )
        .unwrap();
    assert_eq!(results.len(), 10);

    token.cancel();
    let err = matcher
        .find_matches_cancellable(
            &seed_entities,
            seed_component,
            &[],
            model.next_component_id(),
            &token,
        )
        .unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
}

#[test]
fn existing_matches_are_excluded_up_front() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    let first_copy = place_pair(&mut store, Placement::new(60.0, 300.0, 0.0));
    let second_copy = place_pair(&mut store, Placement::new(120.0, 600.0, 0.0));

    let mut model = ComponentModel::new();
    let seed = model.add_seed("Seed", seed_ids, [], &store).unwrap();
    let matcher = PatternMatcher::new(&store, settings());
    let results = matcher.find_for_seed(&model, seed, None).unwrap();
    let (kept, _) = results
        .into_iter()
        .partition::<Vec<_>, _>(|r| r.entity_ids.contains(&first_copy[0]));
    model.commit_matches(seed, kept, &store).unwrap();

    let fresh = matcher.find_for_seed(&model, seed, None).unwrap();
    assert_eq!(fresh.len(), 1);
    assert!(fresh[0].entity_ids.contains(&second_copy[0]));
    assert_eq!(fresh[0].name, "Seed Match 2");
}

/// 三个圆：大圆为主锚点，(20, 0) 处为方向参考，`(10, 5 + lift)` 处的小圆
/// 只能靠重建找到。`lift` 为该成员相对种子的位移。
fn place_triplet(store: &mut EntityStore, placement: Placement, lift: f64) -> Vec<EntityId> {
    let mut ids = place_pair(store, placement);
    ids.push(store.add_circle(placement.apply(10.0, 5.0 + lift), 2.0));
    ids
}

fn run_with(
    store: &EntityStore,
    seed_ids: &[EntityId],
    settings: MatchSettings,
) -> Vec<MatchResult> {
    let mut model = ComponentModel::new();
    let seed = model
        .add_seed("Triplet", seed_ids.iter().copied(), [], store)
        .unwrap();
    PatternMatcher::new(store, settings)
        .find_for_seed(&model, seed, None)
        .unwrap()
}

#[test]
fn reconstruction_respects_dynamic_tolerance() {
    // 种子包围盒 (-5,-5)-(23,7)，长边 28，动态容差 0.56
    let mut store = EntityStore::new();
    let seed_ids = place_triplet(&mut store, Placement::new(0.0, 0.0, 0.0), 0.0);
    let near = place_triplet(&mut store, Placement::new(0.0, 300.0, 0.0), 0.4);
    let rotated_near = place_triplet(&mut store, Placement::new(30.0, 0.0, 300.0), -0.4);
    let far = place_triplet(&mut store, Placement::new(0.0, 600.0, 0.0), 0.7);

    let results = run_with(&store, &seed_ids, MatchSettings::default());
    assert_eq!(results.len(), 2);
    let found: Vec<EntityId> = results
        .iter()
        .flat_map(|r| r.entity_ids.iter().copied())
        .collect();
    assert!(near.iter().all(|id| found.contains(id)));
    assert!(rotated_near.iter().all(|id| found.contains(id)));
    assert!(far.iter().all(|id| !found.contains(id)));

    let rotated = results
        .iter()
        .find(|r| r.entity_ids.contains(&rotated_near[0]))
        .unwrap();
    assert!(angle_gap(rotated.rotation_deg, 30.0) < 1e-6);
}

#[test]
fn fuzziness_widens_positional_tolerance() {
    let mut store = EntityStore::new();
    let seed_ids = place_triplet(&mut store, Placement::new(0.0, 0.0, 0.0), 0.0);
    let shifted = place_triplet(&mut store, Placement::new(0.0, 300.0, 0.0), 0.7);
    let wild = place_triplet(&mut store, Placement::new(0.0, 600.0, 0.0), 1.0);

    assert!(run_with(&store, &seed_ids, MatchSettings::default()).is_empty());

    // 倍率 1.5：容差 0.84，位移 0.7 可接受，位移 1.0 仍然不行
    let loose = MatchSettings {
        position_fuzziness: 1.5,
        ..MatchSettings::default()
    };
    let results = run_with(&store, &seed_ids, loose);
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].entity_ids,
        shifted.iter().copied().collect::<BTreeSet<_>>()
    );
    assert!(wild.iter().all(|id| !results[0].entity_ids.contains(id)));
}

#[test]
fn perturbed_reference_still_recovers_rotation() {
    let mut store = EntityStore::new();
    let seed_ids = place_pair(&mut store, Placement::new(0.0, 0.0, 0.0));
    let placement = Placement::new(0.0, 300.0, 0.0);
    let anchor = store.add_circle(placement.apply(0.0, 0.0), 5.0);
    store.add_circle(placement.apply(20.0, 0.3), 3.0);

    let results = run_with(&store, &seed_ids, MatchSettings::default());
    assert_eq!(results.len(), 1);
    assert!(results[0].entity_ids.contains(&anchor));
    let expected = 0.3_f64.atan2(20.0).to_degrees();
    assert!((results[0].rotation_deg - expected).abs() < 1e-9);
}

#[test]
fn arc_sweep_is_decided_by_angle_tolerance() {
    let quarter = std::f64::consts::FRAC_PI_2;
    let mut store = EntityStore::new();
    let seed = store.add_arc(Point2::new(0.0, 0.0), 4.0, 0.0, quarter);
    let slightly_wider = store.add_arc(Point2::new(300.0, 0.0), 4.0, 0.0, 92f64.to_radians());
    let wider = store.add_arc(Point2::new(600.0, 0.0), 4.0, 0.0, 95f64.to_radians());

    let matched_with = |angle_tolerance: f64| -> BTreeSet<EntityId> {
        let settings = MatchSettings {
            angle_tolerance,
            ..MatchSettings::default()
        };
        run_with(&store, &[seed], settings)
            .into_iter()
            .flat_map(|r| r.entity_ids)
            .collect()
    };

    // 默认 3°：2° 的差异可接受，5° 不行
    assert_eq!(matched_with(3.0), BTreeSet::from([slightly_wider]));
    assert!(matched_with(1.0).is_empty());
    assert_eq!(matched_with(6.0), BTreeSet::from([slightly_wider, wider]));
}

#[test]
fn empty_polylines_are_never_matched() {
    let mut store = EntityStore::new();
    let seed = store.add_polyline(Vec::<Point2>::new(), false);
    store.add_polyline(Vec::<Point2>::new(), false);
    store.add_polyline(Vec::<Point2>::new(), true);

    let results = run_with(&store, &[seed], MatchSettings::default());
    assert!(results.is_empty());
}
