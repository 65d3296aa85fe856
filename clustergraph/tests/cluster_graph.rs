use approx::assert_relative_eq;
use clustergraph::{Categorical, CgError, ClusterGraph, Config, Evidence, DEFAULT_MAX_ITER, DEFAULT_TOL};
use indexmap::IndexSet;
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256StarStar;

const TOL: f64 = 1e-10;

fn gen_factor(rng: &mut Xoshiro256StarStar, vars: &[&str], cards: &[usize]) -> Categorical {
    let probs = ArrayD::<f64>::random_using(IxDyn(cards), Uniform::new(0.05, 1.0), rng);
    Categorical::from_probs(vars, probs).unwrap()
}

/// Random factors over the given scopes, every variable having cardinality `2 + (index % 3)`.
fn gen_problem(scopes: &[&[&str]]) -> Vec<Categorical> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(42);
    let mut vars: IndexSet<&str> = IndexSet::new();
    scopes
        .iter()
        .map(|scope| {
            let cards: Vec<usize> = scope
                .iter()
                .map(|v| 2 + vars.insert_full(*v).0 % 3)
                .collect();
            gen_factor(&mut rng, scope, &cards)
        })
        .collect()
}

fn exact_joint(factors: &[Categorical]) -> Categorical {
    factors[1..]
        .iter()
        .fold(factors[0].clone(), |acc, f| acc.multiply(f).unwrap())
}

fn assert_close(a: &Categorical, b: &Categorical, epsilon: f64) {
    let a = a.normalize();
    let b = b.normalize().reorder(a.var_names()).unwrap();
    assert_eq!(a.cardinalities(), b.cardinalities());
    for (x, y) in a.log_probs().iter().zip(b.log_probs().iter()) {
        assert_relative_eq!(x.exp(), y.exp(), epsilon = epsilon);
    }
}

fn evidence(pairs: &[(&str, usize)]) -> Evidence {
    pairs.iter().map(|(v, x)| (v.to_string(), *x)).collect()
}

/// For every variable, the edges whose sepset contains it form a spanning tree of the clusters
/// containing it.
fn assert_running_intersection(cg: &ClusterGraph) {
    let vars: IndexSet<&String> = cg.clusters().iter().flat_map(|c| c.var_names()).collect();
    for var in vars {
        let holders: Vec<usize> = (0..cg.clusters().len())
            .filter(|i| cg.clusters()[*i].var_names().contains(var))
            .collect();
        let edges: Vec<(usize, usize)> = cg
            .sepsets()
            .filter(|(_, s)| s.contains(var))
            .map(|(e, _)| e)
            .collect();
        assert_eq!(edges.len() + 1, holders.len(), "variable {var}");
        let mut reached = vec![holders[0]];
        let mut changed = true;
        while changed {
            changed = false;
            for (i, j) in edges.iter() {
                if reached.contains(i) != reached.contains(j) {
                    reached.push(if reached.contains(i) { *j } else { *i });
                    changed = true;
                }
            }
        }
        assert_eq!(reached.len(), holders.len(), "variable {var}");
    }
}

#[test]
fn two_clusters_exact() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    assert_eq!(cg.clusters().len(), 2);
    assert_eq!(cg.clusters()[0].name(), "c0#[a, b]");
    assert_eq!(cg.clusters()[1].name(), "c1#[b, c]");
    let edges: Vec<_> = cg.edges().collect();
    assert_eq!(edges, vec![("c0#[a, b]", "c1#[b, c]", &["b".to_owned()][..])]);
    assert_eq!(cg.message_paths().len(), 2);

    cg.process_graph(TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    assert!(cg.num_messages_passed() >= 2);
    assert_eq!(cg.passed_messages().len(), cg.num_messages_passed());
    assert!(*cg.max_information_gains().last().unwrap() <= TOL);

    let joint = exact_joint(&factors);
    for var in ["a", "b", "c"] {
        let marginal = cg.get_marginal(&[var]).unwrap();
        assert_close(&marginal, &joint.marginalize(&[var], true).unwrap(), 1e-6);
    }
    assert_close(&cg.get_posterior_joint().unwrap(), &joint, 1e-6);
}

#[test]
fn rain_slip_hand_computed() {
    let rain_wet = Categorical::from_probs_table(
        &["rain", "wet"],
        &[2, 2],
        [
            (vec![0, 0], 0.72),
            (vec![0, 1], 0.08),
            (vec![1, 0], 0.02),
            (vec![1, 1], 0.18),
        ],
    )
    .unwrap();
    let wet_slip = Categorical::from_probs_table(
        &["wet", "slip"],
        &[2, 2],
        [
            (vec![0, 0], 0.9),
            (vec![0, 1], 0.1),
            (vec![1, 0], 0.3),
            (vec![1, 1], 0.7),
        ],
    )
    .unwrap();
    let factors = vec![rain_wet, wet_slip];
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    cg.process_graph(TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();

    // P(wet = 1) = 0.08 + 0.18
    let wet = cg.get_marginal(&["wet"]).unwrap().normalize();
    assert_relative_eq!(wet.log_probs()[[1]].exp(), 0.26, epsilon = 1e-6);
    // P(slip = 1) = 0.74 * 0.1 + 0.26 * 0.7
    let slip = cg.get_marginal(&["slip"]).unwrap().normalize();
    assert_relative_eq!(slip.log_probs()[[1]].exp(), 0.256, epsilon = 1e-6);

    let joint = cg.get_posterior_joint().unwrap().normalize();
    let p = joint.potential(&["rain", "wet", "slip"], &[1, 1, 0]).unwrap();
    assert_relative_eq!(p.exp(), 0.18 * 0.3, epsilon = 1e-6);
}

#[test]
fn chain_converges_to_exact_marginals() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "d"], &["d", "e"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    assert_eq!(cg.sepsets().count(), 3);
    cg.process_graph(TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    let joint = exact_joint(&factors);
    for var in ["a", "c", "e"] {
        let marginal = cg.get_marginal(&[var]).unwrap();
        assert_close(&marginal, &joint.marginalize(&[var], true).unwrap(), 1e-6);
    }
    let pair = cg.get_marginal(&["d", "c"]).unwrap();
    assert_close(&pair, &joint.marginalize(&["c", "d"], true).unwrap(), 1e-6);
}

#[test]
fn loopy_graph_keeps_joint() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "a"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    assert_eq!(cg.sepsets().count(), 3);
    assert_running_intersection(&cg);
    cg.process_graph(DEFAULT_TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    assert!(cg.num_messages_passed() <= DEFAULT_MAX_ITER * cg.message_paths().len());
    for path in cg.message_paths() {
        assert!(path.information_gains_with_iters().iter().all(|g| *g >= 0.0));
    }
    // beliefs divided by the messages on the edges always give back the factor product
    assert_close(&cg.get_posterior_joint().unwrap(), &exact_joint(&factors), 1e-6);
}

#[test]
fn gain_trace_ends_at_convergence() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "d"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    cg.process_graph(DEFAULT_TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    let gains = cg.max_information_gains();
    assert_eq!(gains.len(), cg.passed_messages().len());
    assert!(*gains.last().unwrap() <= DEFAULT_TOL);
    assert!(gains[..gains.len() - 1].iter().all(|g| *g > DEFAULT_TOL));
}

#[test]
fn message_budget() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "a"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    cg.process_graph(-1.0, 1, &Config::no_progress()).unwrap();
    assert_eq!(cg.num_messages_passed(), cg.message_paths().len());
    cg.process_graph(-1.0, 0, &Config::no_progress()).unwrap();
    assert!(cg.passed_messages().is_empty());
}

#[test]
fn single_cluster() {
    let factors = gen_problem(&[&["a", "b"], &["b"], &["a"]]);
    let mut cg = ClusterGraph::new(&factors, None, &evidence(&[("b", 1)])).unwrap();
    assert_eq!(cg.clusters().len(), 1);
    assert_eq!(cg.sepsets().count(), 0);
    cg.process_graph(DEFAULT_TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    assert_eq!(cg.num_messages_passed(), 0);
    let expected = exact_joint(&factors).reduce(&["b"], &[1]).unwrap();
    assert_close(&cg.get_marginal(&["a"]).unwrap(), &expected, 1e-9);
    assert!(cg.get_posterior_joint().unwrap().equals(&expected));
}

#[test]
fn joint_without_messages_is_factor_product() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "a"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    cg.process_graph(DEFAULT_TOL, 0, &Config::no_progress()).unwrap();
    assert_eq!(cg.num_messages_passed(), 0);
    assert!(cg.get_posterior_joint().unwrap().equals(&exact_joint(&factors)));
}

#[test]
fn huge_iteration_budget() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "d"]]);
    let mut cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    cg.process_graph(DEFAULT_TOL, usize::MAX, &Config::no_progress())
        .unwrap();
    assert!(*cg.max_information_gains().last().unwrap() <= DEFAULT_TOL);
}

#[test]
fn evidence_reduces_factors() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"]]);
    let mut cg = ClusterGraph::new(&factors, Some(&evidence(&[("a", 1)])), &Evidence::new())
        .unwrap();
    // [a, b] reduced to [b] is absorbed into [b, c]
    assert_eq!(cg.clusters().len(), 1);
    cg.process_graph(TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    let expected = exact_joint(&factors)
        .reduce(&["a"], &[1])
        .unwrap()
        .marginalize(&["c"], true)
        .unwrap();
    assert_close(&cg.get_marginal(&["c"]).unwrap(), &expected, 1e-9);
}

#[test]
fn special_evidence_is_observed_in_messages() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"]]);
    let special = evidence(&[("a", 1)]);
    let mut cg = ClusterGraph::new(&factors, None, &special).unwrap();
    assert_eq!(cg.clusters().len(), 2);
    assert_eq!(cg.clusters()[0].special_evidence(), &special);
    assert!(cg.clusters()[1].special_evidence().is_empty());
    cg.process_graph(TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    let observed = exact_joint(&factors).reduce(&["a"], &[1]).unwrap();
    for var in ["b", "c"] {
        let expected = observed.marginalize(&[var], true).unwrap();
        assert_close(&cg.get_marginal(&[var]).unwrap(), &expected, 1e-6);
    }
}

#[test]
fn evidence_vars_not_in_sepsets() {
    let factors = gen_problem(&[&["a", "b", "c"], &["b", "c", "d"]]);
    let cg = ClusterGraph::new(&factors, None, &evidence(&[("c", 0)])).unwrap();
    let sepsets: Vec<_> = cg.sepsets().collect();
    assert_eq!(sepsets, vec![((0, 1), &["b".to_owned()][..])]);
}

#[test]
fn subset_factors_are_absorbed() {
    let factors = gen_problem(&[&["a", "b", "c"], &["c", "d"], &["d", "e", "a"], &["b", "e"], &["a", "b"]]);
    let cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    let names: Vec<&str> = cg.clusters().iter().map(|c| c.name()).collect();
    assert_eq!(
        names,
        vec!["c0#[a, b, c]", "c1#[c, d]", "c2#[d, e, a]", "c3#[b, e]"]
    );
    let absorbed = factors[0].multiply(&factors[4]).unwrap();
    assert!(cg.clusters()[0].belief().equals(&absorbed));
    assert_running_intersection(&cg);
}

#[test]
fn running_intersection_on_dense_scopes() {
    let factors = gen_problem(&[
        &["a", "b", "c"],
        &["b", "c", "d"],
        &["c", "d", "e"],
        &["a", "c", "e"],
        &["b", "e", "f"],
        &["a", "f"],
    ]);
    let cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    assert_eq!(cg.clusters().len(), 6);
    assert_running_intersection(&cg);
    for cluster in cg.clusters() {
        for (neighbour, sepset) in cluster.neighbours() {
            assert!(!sepset.is_empty());
            assert_eq!(cg.clusters()[neighbour].sepset(cg_index(&cg, cluster.name())), Some(sepset));
        }
        assert_eq!(
            cluster.outward_message_paths().len(),
            cluster.neighbours().count()
        );
    }
}

fn cg_index(cg: &ClusterGraph, name: &str) -> usize {
    cg.clusters().iter().position(|c| c.name() == name).unwrap()
}

#[test]
fn disconnected_factors_have_no_edge() {
    let factors = gen_problem(&[&["a", "b"], &["c", "d"]]);
    let cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    // no shared variable: the clusters are simply not connected
    assert_eq!(cg.sepsets().count(), 0);
    assert_eq!(cg.message_paths().len(), 0);
}

#[test]
fn marginal_without_covering_cluster() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"]]);
    let cg = ClusterGraph::new(&factors, None, &Evidence::new()).unwrap();
    assert_eq!(
        cg.get_marginal(&["a", "c"]),
        Err(CgError::NoCoveringCluster(vec!["a".to_owned(), "c".to_owned()]))
    );
}

#[test]
fn construction_errors() {
    assert_eq!(
        ClusterGraph::<Categorical>::new(&[], None, &Evidence::new()).err(),
        Some(CgError::NoFactors)
    );
    let mut rng = Xoshiro256StarStar::seed_from_u64(42);
    let factors = vec![
        gen_factor(&mut rng, &["a", "b"], &[2, 3]),
        gen_factor(&mut rng, &["b", "c"], &[2, 2]),
    ];
    assert_eq!(
        ClusterGraph::new(&factors, None, &Evidence::new()).err(),
        Some(CgError::CardinalityMismatch {
            var: "b".to_owned(),
            left: 3,
            right: 2
        })
    );
}

#[test]
fn input_factors_are_not_modified() {
    let factors = gen_problem(&[&["a", "b"], &["b", "c"], &["c", "a"]]);
    let copy = factors.clone();
    let mut cg = ClusterGraph::new(&factors, Some(&evidence(&[("a", 0)])), &Evidence::new())
        .unwrap();
    cg.process_graph(DEFAULT_TOL, DEFAULT_MAX_ITER, &Config::no_progress())
        .unwrap();
    assert_eq!(factors, copy);
}
