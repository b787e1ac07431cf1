//! Touch / keep / restore behaviour across multi-layer graphs.

use probgraph_core::library::{Exponential, Normal, Sum};
use probgraph_core::{ModelError, ModelGraph, NodeKind};
use probgraph_tests::{diamond, exponential_ln_pdf, FirstOf};

#[test]
fn diamond_recomputes_each_node_once_per_change() {
    let mut dm = diamond().expect("diamond");
    assert_eq!(*dm.graph.value(dm.d).expect("d"), 3.0);
    assert_eq!(dm.b_evaluations.get(), 1);
    assert_eq!(dm.c_evaluations.get(), 1);
    assert_eq!(dm.d_evaluations.get(), 1);

    dm.graph.set_value(dm.a, 2.0).expect("set a");
    dm.graph.touch(dm.a.id()).expect("touch again");
    assert_eq!(*dm.graph.value(dm.d).expect("d"), 6.0);
    assert_eq!(*dm.graph.value(dm.d).expect("d, cached"), 6.0);
    assert_eq!(dm.b_evaluations.get(), 2);
    assert_eq!(dm.c_evaluations.get(), 2);
    assert_eq!(dm.d_evaluations.get(), 2);

    dm.graph.keep(dm.a.id()).expect("keep");
    assert_eq!(*dm.graph.value(dm.d).expect("d after keep"), 6.0);
    assert_eq!(dm.d_evaluations.get(), 2);
}

#[test]
fn diamond_restore_recomputes_from_restored_root() {
    let mut dm = diamond().expect("diamond");
    assert_eq!(*dm.graph.value(dm.d).expect("d"), 3.0);

    dm.graph.set_value(dm.a, 5.0).expect("set a");
    assert_eq!(*dm.graph.value(dm.d).expect("d"), 15.0);
    dm.graph.restore(dm.a.id()).expect("restore");

    assert_eq!(*dm.graph.value(dm.b).expect("b"), 1.0);
    assert_eq!(*dm.graph.value(dm.c).expect("c"), 2.0);
    assert_eq!(*dm.graph.value(dm.d).expect("d"), 3.0);
    assert_eq!(dm.d_evaluations.get(), 3);
    assert!(dm.graph.touched_nodes().is_empty());
}

#[test]
fn exponential_scenario_ratio_and_reject() {
    let mut g = ModelGraph::new();
    let a = g.add_constant("a", 2.0_f64).expect("a");
    let m = g.add_stochastic("m", Exponential::new(a), 1.0).expect("m");

    g.set_value(m, 3.0).expect("set");
    let ratio = g.ln_probability_ratio(m.id()).expect("ratio");
    let expected = exponential_ln_pdf(2.0, 3.0) - exponential_ln_pdf(2.0, 1.0);
    assert!((ratio - expected).abs() < 1e-12);

    g.restore(m.id()).expect("restore");
    assert_eq!(*g.value(m).expect("m"), 1.0);
    assert_eq!(g.ln_probability_ratio(m.id()).expect("ratio"), 0.0);
}

#[test]
fn insensitive_parameter_does_not_propagate() {
    let mut g = ModelGraph::new();
    let rate = g.add_constant("rate", 1.0_f64).expect("rate");
    let x = g.add_stochastic("x", Exponential::new(rate), 1.0).expect("x");
    let z = g.add_stochastic("z", Exponential::new(rate), 2.0).expect("z");
    let pick = g
        .add_deterministic("pick", FirstOf { first: x, ignored: z })
        .expect("pick");
    let y = g.add_stochastic("y", Exponential::new(pick), 0.5).expect("y");
    assert_eq!(*g.value(pick).expect("pick"), 1.0);

    g.set_value(z, 7.0).expect("set z");
    assert!(!g.is_touched(pick.id()).expect("pick"));
    assert!(!g.is_touched(y.id()).expect("y"));
    assert!(g.affected_nodes(z.id()).expect("affected").is_empty());
    g.keep(z.id()).expect("keep z");

    g.set_value(x, 4.0).expect("set x");
    assert!(g.is_touched(pick.id()).expect("pick"));
    assert!(g.is_touched(y.id()).expect("y"));
    assert_eq!(g.affected_nodes(x.id()).expect("affected"), vec![y.id()]);
    assert_eq!(*g.value(pick).expect("pick"), 4.0);
}

#[test]
fn clamped_root_propagates_to_descendants() {
    let mut g = ModelGraph::new();
    let zero = g.add_constant("zero", 0.0_f64).expect("zero");
    let one = g.add_constant("one", 1.0_f64).expect("one");
    let obs = g.add_stochastic("obs", Normal::new(zero, one), 0.0).expect("obs");
    let shifted = g.add_deterministic("shifted", Sum::new(vec![obs, one])).expect("shifted");
    let child = g.add_stochastic("child", Normal::new(shifted, one), 0.0).expect("child");
    assert_eq!(*g.value(shifted).expect("shifted"), 1.0);

    g.clamp(obs, &2.5).expect("clamp");
    assert!(g.is_touched(child.id()).expect("child touched"));
    assert_eq!(*g.value(shifted).expect("shifted"), 3.5);
    g.keep(obs.id()).expect("keep");

    g.set_constant(one, 2.0).expect("rebind parent");
    assert_eq!(*g.value(obs).expect("obs"), 2.5);
    assert!(matches!(
        g.set_value(obs, 0.0),
        Err(ModelError::Misuse(_))
    ));
}

#[test]
fn deep_chain_reject_is_bit_exact() {
    let mut g = ModelGraph::new();
    let zero = g.add_constant("zero", 0.0_f64).expect("zero");
    let sd = g.add_constant("sd", 0.7_f64).expect("sd");
    let root = g.add_stochastic("root", Normal::new(zero, sd), 0.123).expect("root");

    let mut layer = root;
    let mut observed = Vec::new();
    for depth in 0..12 {
        layer = g
            .add_deterministic("", Sum::new(vec![layer, sd]))
            .expect("layer");
        let y = g
            .add_stochastic("", Normal::new(layer, sd), depth as f64)
            .expect("observation");
        g.clamp(y, &(depth as f64)).expect("clamp");
        g.keep(y.id()).expect("keep");
        observed.push(y);
    }

    let before_top = *g.value(layer).expect("top");
    let before: Vec<f64> = observed
        .iter()
        .map(|y| g.ln_probability(y.id()).expect("lnp"))
        .collect();

    g.set_value(root, -4.2).expect("set root");
    for y in &observed {
        assert!(g.ln_probability_ratio(y.id()).expect("ratio") != 0.0);
    }
    g.restore(root.id()).expect("restore");

    assert_eq!(g.value(layer).expect("top").to_bits(), before_top.to_bits());
    for (y, lnp) in observed.iter().zip(before) {
        assert_eq!(g.ln_probability(y.id()).expect("lnp").to_bits(), lnp.to_bits());
        assert_eq!(g.ln_probability_ratio(y.id()).expect("ratio"), 0.0);
    }
}

#[test]
fn block_change_restores_every_member() {
    let mut g = ModelGraph::new();
    let rate = g.add_constant("rate", 1.0_f64).expect("rate");
    let a = g.add_stochastic("a", Exponential::new(rate), 1.0).expect("a");
    let b = g.add_stochastic("b", Exponential::new(a), 2.0).expect("b");

    g.set_value(a, 3.0).expect("set a");
    g.set_value(b, 5.0).expect("set b");
    g.restore(a.id()).expect("restore a");
    g.restore(b.id()).expect("restore b");

    assert_eq!(*g.value(a).expect("a"), 1.0);
    assert_eq!(*g.value(b).expect("b"), 2.0);
    assert!(g.touched_nodes().is_empty());
}

#[test]
fn changing_an_already_touched_node_reaches_its_children() {
    let mut g = ModelGraph::new();
    let rate = g.add_constant("rate", 1.0_f64).expect("rate");
    let a = g.add_stochastic("a", Exponential::new(rate), 1.0).expect("a");
    let b = g.add_stochastic("b", Exponential::new(a), 2.0).expect("b");
    let c = g.add_stochastic("c", Exponential::new(b), 0.5).expect("c");
    let c_before = g.ln_probability(c.id()).expect("c");

    g.set_value(a, 3.0).expect("set a");
    assert!(!g.is_touched(c.id()).expect("c untouched"));
    g.set_value(b, 4.0).expect("set b");
    assert!(g.is_touched(c.id()).expect("c touched"));

    let ratio = g.ln_probability_ratio(c.id()).expect("ratio");
    let expected = exponential_ln_pdf(4.0, 0.5) - exponential_ln_pdf(2.0, 0.5);
    assert!((ratio - expected).abs() < 1e-12);

    g.restore(a.id()).expect("restore a");
    g.restore(b.id()).expect("restore b");
    assert_eq!(*g.value(b).expect("b"), 2.0);
    assert_eq!(g.ln_probability(c.id()).expect("c"), c_before);
    assert!(g.touched_nodes().is_empty());
}

#[test]
fn keep_and_restore_without_touch_are_noops() {
    let mut g = ModelGraph::new();
    let a = g.add_constant("a", 1.0_f64).expect("a");
    let s = g.add_deterministic("s", Sum::new(vec![a])).expect("s");
    g.keep(s.id()).expect("keep");
    g.restore(s.id()).expect("restore");
    assert_eq!(*g.value(s).expect("s"), 1.0);
    assert_eq!(g.kind(s.id()).expect("kind"), NodeKind::Deterministic);
}
