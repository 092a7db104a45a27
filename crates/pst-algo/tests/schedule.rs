//! End-to-end scheduling behavior on concrete dependence graphs.

use pst_algo::schedule::graph::ScheduleConstraints;
use pst_algo::{compute_schedule, Schedule};
use pst_core::map::{BasicMap, Map, Set};
use pst_core::space::{Space, Tuple};
use pst_core::{Context, FuseStrategy, Options, ScheduleAlgorithm};

/// { name[i] : 0 <= i < n }, no parameters.
fn domain_1d(name: &str, n: i64) -> Set {
    let space = Space::set(0, Tuple::named(name, 1));
    Map::from_basic_map(BasicMap::from_constraints(
        space,
        vec![],
        vec![vec![0, 1], vec![n - 1, -1]],
    ))
}

/// { name[i, j] : 0 <= i, j < n }.
fn domain_2d(name: &str, n: i64) -> Set {
    let space = Space::set(0, Tuple::named(name, 2));
    Map::from_basic_map(BasicMap::from_constraints(
        space,
        vec![],
        vec![
            vec![0, 1, 0],
            vec![n - 1, -1, 0],
            vec![0, 0, 1],
            vec![n - 1, 0, -1],
        ],
    ))
}

/// { src[i] -> dst[i + shift] : 0 <= i < n }.
fn shift_relation(src: &str, dst: &str, shift: i64, n: i64) -> Map {
    let space = Space::map(0, Tuple::named(src, 1), Tuple::named(dst, 1));
    let mut bmap = BasicMap::universe(space);
    bmap.add_eq(vec![shift, 1, -1]);
    bmap.add_ineq(vec![0, 1, 0]);
    bmap.add_ineq(vec![n - 1 - shift, -1, 0]);
    Map::from_basic_map(bmap)
}

fn node<'a>(sched: &'a Schedule, name: &str) -> &'a pst_algo::ScheduleNodeResult {
    sched
        .nodes
        .iter()
        .find(|n| n.space.output.name.as_deref() == Some(name))
        .expect("statement not scheduled")
}

/// Evaluate the schedule vector of a statement instance.
fn time(node: &pst_algo::ScheduleNodeResult, point: &[i64], n_rows: usize) -> Vec<i64> {
    (0..n_rows)
        .map(|r| {
            let mut v = node.sched.get(r, 0);
            for (k, &x) in point.iter().enumerate() {
                v += node.sched.get(r, 1 + node.nparam + k) * x;
            }
            v
        })
        .collect()
}

#[test]
fn single_statement_chain_gets_identity_row() {
    // Validity S[i] -> S[i+1] forces a row equivalent to i.
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![shift_relation("S", "S", 1, 10)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();

    assert_eq!(sched.n_total_row, 1);
    let s = node(&sched, "S");
    for i in 0..9 {
        let a = time(s, &[i], 1);
        let b = time(s, &[i + 1], 1);
        assert!(b > a, "dependence {} -> {} not respected", i, i + 1);
    }
    // One band covering the single row, marked coincident in the absence
    // of coincidence constraints.
    assert_eq!(s.band_end, vec![1]);
    assert_eq!(s.coincident, vec![true]);
}

#[test]
fn two_statement_fusion_shares_first_row() {
    // S1[i] -> S2[i]: both statements share the row i and are ordered by
    // a trailing constant row.
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 8), domain_1d("S2", 8)])
        .set_validity(vec![shift_relation("S1", "S2", 0, 8)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();

    assert_eq!(sched.n_total_row, 2);
    let s1 = node(&sched, "S1");
    let s2 = node(&sched, "S2");
    for i in 0..8 {
        let a = time(s1, &[i], 2);
        let b = time(s2, &[i], 2);
        assert!(b > a, "S1[{0}] must run before S2[{0}]", i);
        assert_eq!(a[0], b[0], "fused statements should share the first row");
    }
    // The ordering row is the constant component index.
    assert_eq!(s1.sched.get(1, 0), 0);
    assert_eq!(s2.sched.get(1, 0), 1);
}

#[test]
fn validity_holds_lexicographically() {
    // A two-edge cycle through both statements.
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("A", 10), domain_1d("B", 10)])
        .set_validity(vec![
            shift_relation("A", "B", 0, 10),
            shift_relation("B", "A", 1, 10),
        ]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let a = node(&sched, "A");
    let b = node(&sched, "B");
    let rows = sched.n_total_row;
    for i in 0..10 {
        assert!(time(b, &[i], rows) > time(a, &[i], rows));
        if i < 9 {
            assert!(time(a, &[i + 1], rows) > time(b, &[i], rows));
        }
    }
}

#[test]
fn coincidence_marks_parallel_row() {
    // Dependences move along i only; a row in j has distance zero.
    let space = Space::map(0, Tuple::named("S", 2), Tuple::named("S", 2));
    let mut bmap = BasicMap::universe(space);
    bmap.add_eq(vec![1, 1, 0, -1, 0]); // i' = i + 1
    bmap.add_eq(vec![0, 0, 1, 0, -1]); // j' = j
    bmap.add_ineq(vec![0, 1, 0, 0, 0]);
    bmap.add_ineq(vec![8, -1, 0, 0, 0]);
    let dep = Map::from_basic_map(bmap);

    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_2d("S", 10)])
        .set_validity(vec![dep.clone()])
        .set_coincidence(vec![dep]);
    let sched = compute_schedule(&ctx, &sc).unwrap();

    let s = node(&sched, "S");
    // Some row must be coincident, and every coincident row must have
    // zero dependence distance.
    assert!(s.coincident.iter().any(|&c| c));
    for (r, &c) in s.coincident.iter().enumerate() {
        if !c {
            continue;
        }
        let ci = s.sched.get(r, 1);
        assert_eq!(ci, 0, "coincident row {} moves with the dependence", r);
    }
}

#[test]
fn unsatisfiable_coincidence_is_dropped() {
    // The only dependence direction conflicts with coincidence; the row
    // is still found but marked non-coincident.
    let ctx = Context::new();
    let dep = shift_relation("S", "S", 1, 10);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![dep.clone()])
        .set_coincidence(vec![dep]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s = node(&sched, "S");
    assert_eq!(sched.n_total_row, 1);
    assert_eq!(s.coincident, vec![false]);
}

#[test]
fn proximity_pulls_distance_to_zero() {
    // Proximity along S1[i] -> S2[i] without validity still aligns the
    // two statements' rows so the distance bound stays zero.
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 6), domain_1d("S2", 6)])
        .set_validity(vec![shift_relation("S1", "S2", 0, 6)])
        .set_proximity(vec![shift_relation("S1", "S2", 0, 6)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s1 = node(&sched, "S1");
    let s2 = node(&sched, "S2");
    for i in 0..6 {
        assert_eq!(
            time(s1, &[i], 1)[0],
            time(s2, &[i], 1)[0],
            "proximity should keep the first rows aligned"
        );
    }
}

#[test]
fn feautrier_carries_the_chain() {
    let mut options = Options::default();
    options.schedule_algorithm = ScheduleAlgorithm::Feautrier;
    let ctx = Context::with_options(options);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![shift_relation("S", "S", 1, 10)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s = node(&sched, "S");
    let rows = sched.n_total_row;
    for i in 0..9 {
        assert!(time(s, &[i + 1], rows) > time(s, &[i], rows));
    }
}

#[test]
fn instance_level_cycle_cannot_be_carried() {
    // S[i] -> S[9 - i] contains both (0 -> 9) and (9 -> 0); no affine
    // schedule can order it and carrying must fail.
    let space = Space::map(0, Tuple::named("S", 1), Tuple::named("S", 1));
    let mut bmap = BasicMap::universe(space);
    bmap.add_eq(vec![-9, 1, 1]); // y = 9 - i
    bmap.add_ineq(vec![0, 1, 0]);
    bmap.add_ineq(vec![9, -1, 0]);
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![Map::from_basic_map(bmap)]);
    let err = compute_schedule(&ctx, &sc).unwrap_err();
    assert!(err.to_string().contains("unable to carry dependences"));
}

#[test]
fn independent_statements_schedule_separately() {
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("A", 5), domain_1d("B", 5)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    assert_eq!(sched.nodes.len(), 2);
    assert_eq!(sched.n_total_row, 1);
}

#[test]
fn separate_components_prepend_component_row() {
    let mut options = Options::default();
    options.schedule_separate_components = true;
    let ctx = Context::with_options(options);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("A", 5), domain_1d("B", 5)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    assert_eq!(sched.n_total_row, 2);
    let a = node(&sched, "A");
    let b = node(&sched, "B");
    assert_ne!(a.sched.get(0, 0), b.sched.get(0, 0));
}

#[test]
fn min_fuse_splits_sccs() {
    let mut options = Options::default();
    options.schedule_fuse = FuseStrategy::Min;
    let ctx = Context::with_options(options);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 8), domain_1d("S2", 8)])
        .set_validity(vec![shift_relation("S1", "S2", 0, 8)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s1 = node(&sched, "S1");
    let s2 = node(&sched, "S2");
    // The leading row orders the two components.
    assert!(s2.sched.get(0, 0) > s1.sched.get(0, 0));
}

#[test]
fn max_coefficient_cap_still_schedules() {
    let mut options = Options::default();
    options.schedule_max_coefficient = Some(1);
    options.schedule_max_constant_term = Some(4);
    let ctx = Context::with_options(options);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![shift_relation("S", "S", 1, 10)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s = node(&sched, "S");
    assert!(s.sched.get(0, 1).abs() <= 1);
}

#[test]
fn parametric_domains_schedule() {
    // { S[i] : 0 <= i < N } with S[i] -> S[i+1].
    let space = Space::set(1, Tuple::named("S", 1));
    let dom = Map::from_basic_map(BasicMap::from_constraints(
        space,
        vec![],
        vec![vec![0, 0, 1], vec![-1, 1, -1]],
    ));
    let rel_space = Space::map(1, Tuple::named("S", 1), Tuple::named("S", 1));
    let mut bmap = BasicMap::universe(rel_space);
    bmap.add_eq(vec![1, 0, 1, -1]);
    bmap.add_ineq(vec![0, 0, 1, 0]);
    bmap.add_ineq(vec![-2, 1, -1, 0]);
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![dom])
        .set_validity(vec![Map::from_basic_map(bmap)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s = node(&sched, "S");
    assert_eq!(sched.n_total_row, 1);
    // The row must move forward along i with no parametric part.
    assert!(s.sched.get(0, 1 + s.nparam) > 0);
}

#[test]
fn conditional_validity_orders_components() {
    // Conditional validity participates in component ordering even when
    // no condition edge makes it checkable.
    let ctx = Context::new();
    let tagged_space = Space::map(
        0,
        Tuple::named("S2", 1).with_tag("w"),
        Tuple::named("S1", 1).with_tag("r"),
    );
    let mut bmap = BasicMap::universe(tagged_space);
    bmap.add_eq(vec![0, 1, -1]);
    bmap.add_ineq(vec![0, 1, 0]);
    bmap.add_ineq(vec![7, -1, 0]);
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 8), domain_1d("S2", 8)])
        .set_conditional_validity(vec![], vec![Map::from_basic_map(bmap)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let s1 = node(&sched, "S1");
    let s2 = node(&sched, "S2");
    let rows = sched.n_total_row;
    for i in 0..8 {
        assert!(time(s1, &[i], rows) > time(s2, &[i], rows));
    }
}

#[test]
fn condition_and_conditional_validity_terminate() {
    // A condition edge adjacent to a conditional validity constraint;
    // scheduling must settle on a schedule without violated constraints.
    let cond_space = Space::map(
        0,
        Tuple::named("S", 2).with_tag("a"),
        Tuple::named("S", 2).with_tag("b"),
    );
    let mut cond = BasicMap::universe(cond_space);
    cond.add_eq(vec![0, 1, 0, -1, 0]);
    cond.add_eq(vec![1, 0, 1, 0, -1]); // (i, j) -> (i, j + 1)
    cond.add_ineq(vec![0, 0, 1, 0, 0]);
    cond.add_ineq(vec![8, 0, -1, 0, 0]);

    let val_space = Space::map(
        0,
        Tuple::named("S", 2).with_tag("b"),
        Tuple::named("S", 2).with_tag("a"),
    );
    let mut val = BasicMap::universe(val_space);
    val.add_eq(vec![-1, 1, 0, -1, 0]); // (i, j) -> (i - 1, j)
    val.add_eq(vec![0, 0, 1, 0, -1]);
    val.add_ineq(vec![-1, 1, 0, 0, 0]);
    val.add_ineq(vec![9, -1, 0, 0, 0]);

    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_2d("S", 10)])
        .set_conditional_validity(vec![Map::from_basic_map(cond)], vec![Map::from_basic_map(val)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    assert!(sched.n_total_row >= 1);
}

#[test]
fn band_forest_covers_all_rows() {
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 8), domain_1d("S2", 8)])
        .set_validity(vec![shift_relation("S1", "S2", 0, 8)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();

    let mut seen_rows = 0;
    sched.foreach_band(&mut |band| {
        seen_rows += band.end - band.start;
        assert_eq!(band.coincident.len(), band.end - band.start);
        for &m in &band.members {
            assert!(m < sched.nodes.len());
        }
    });
    assert!(seen_rows >= sched.n_total_row);
}

#[test]
fn schedule_roundtrips_through_serde() {
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S", 10)])
        .set_validity(vec![shift_relation("S", "S", 1, 10)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    let json = serde_json::to_string(&sched).unwrap();
    let back: Schedule = serde_json::from_str(&json).unwrap();
    assert_eq!(back.n_total_row, sched.n_total_row);
    assert_eq!(back.nodes.len(), sched.nodes.len());
    assert_eq!(back.nodes[0].sched, sched.nodes[0].sched);
}

#[test]
fn schedule_maps_have_common_range() {
    let ctx = Context::new();
    let sc = ScheduleConstraints::on_domain(vec![domain_1d("S1", 8), domain_1d("S2", 8)])
        .set_validity(vec![shift_relation("S1", "S2", 0, 8)]);
    let sched = compute_schedule(&ctx, &sc).unwrap();
    for map in sched.maps() {
        assert_eq!(map.space.n_out(), sched.n_total_row);
        assert_eq!(map.parts[0].eqs.len(), sched.n_total_row);
    }
}
