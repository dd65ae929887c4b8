//! Property-based tests using proptest
//!
//! Random problems (sizes, label counts, both connectivities, both pairwise
//! modes, metric and non-metric interactions) run through both engines.

use proptest::prelude::*;

use gridexpansion::rng::Rng;
use gridexpansion::{
    Connectivity, CostModel, EdgeWeights, Expansion, ExpansionConfig, Grid, GridTopology, InitialLabeling,
    PairwiseMode,
};

#[derive(Clone, Debug)]
struct Case {
    width: usize,
    height: usize,
    n_labels: usize,
    eight: bool,
    scaled: bool,
    metric: bool,
    seed: u64,
}

fn case_strategy() -> impl Strategy<Value = Case> {
    (1usize..7, 1usize..7, 1usize..5, any::<bool>(), any::<bool>(), any::<bool>(), any::<u64>()).prop_map(
        |(width, height, n_labels, eight, scaled, metric, seed)| Case {
            width,
            height,
            n_labels,
            eight,
            scaled,
            metric,
            seed,
        },
    )
}

fn build(case: &Case) -> CostModel {
    let mut rng = Rng::new(case.seed);
    let (w, h, n) = (case.width, case.height, case.n_labels);
    let conn = if case.eight {
        Connectivity::EightConnected
    } else {
        Connectivity::FourConnected
    };
    let t = GridTopology::new(w, h, conn).unwrap();

    let unary: Vec<f32> = (0..w * h * n).map(|_| rng.range_f32(0.0, 10.0)).collect();
    let mut interaction = vec![0.0f32; n * n];
    for a in 0..n {
        for b in 0..n {
            if a != b {
                // Truncated linear is a metric; squared distance is not.
                let d = (a as f32 - b as f32).abs();
                interaction[a * n + b] = if case.metric { d.min(2.0) } else { d * d };
            }
        }
    }
    let mut grid = || Grid::from_vec(w, h, (0..w * h).map(|_| rng.range_f32(0.0, 3.0)).collect()).unwrap();
    let weights = EdgeWeights::new(grid(), grid()).with_diagonals(grid(), grid());
    let mode = if case.scaled {
        PairwiseMode::Scaled
    } else {
        PairwiseMode::Additive
    };
    CostModel::new(t, n, unary, interaction, weights).unwrap().with_mode(mode)
}

fn configs() -> [ExpansionConfig; 3] {
    [
        ExpansionConfig::default(),
        ExpansionConfig {
            workers: 2,
            block_size: 2,
            ..Default::default()
        },
        ExpansionConfig {
            initial: InitialLabeling::BestUnary,
            workers: 3,
            block_size: 3,
            ..Default::default()
        },
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // Property: a run never ends above the energy it started from
    #[test]
    fn energy_never_increases(case in case_strategy()) {
        let model = build(&case);
        for cfg in configs() {
            let mut engine = Expansion::new(model.clone(), cfg.clone()).unwrap();
            let out = engine.perform().unwrap();
            prop_assert!(out.energy <= out.initial_energy + 1e-6,
                "{:?}: {} > {}", cfg, out.energy, out.initial_energy);
            let recomputed = model.energy(engine.current_assignment());
            prop_assert!((recomputed - out.energy).abs() < 1e-6);
        }
    }

    // Property: labels stay in range and the grid keeps its shape
    #[test]
    fn labeling_stays_valid(case in case_strategy()) {
        let model = build(&case);
        let mut engine = Expansion::new(model.clone(), ExpansionConfig { workers: 2, block_size: 2, ..Default::default() }).unwrap();
        engine.perform().unwrap();
        let labels = engine.into_labeling();
        prop_assert!(model.check_labeling(&labels).is_ok());
    }

    // Property: on tiny problems with a metric pairwise term (truncated linear
    // scaled by non-negative edge weights) the sequential result is within 2c
    // of the brute-force optimum, c = max / min off-diagonal interaction = 2
    #[test]
    fn metric_result_within_approximation_bound(seed in any::<u64>(), width in 1usize..4, height in 1usize..3, n_labels in 2usize..4) {
        let case = Case { width, height, n_labels, eight: false, scaled: true, metric: true, seed };
        let model = build(&case);
        let sites = width * height;
        let mut best = f64::INFINITY;
        let mut labels = Grid::<u32>::new(width, height);
        for code in 0..n_labels.pow(sites as u32) {
            let mut c = code;
            for s in 0..sites {
                labels.data[s] = (c % n_labels) as u32;
                c /= n_labels;
            }
            best = best.min(model.energy(&labels));
        }
        let mut engine = Expansion::new(model, ExpansionConfig::default()).unwrap();
        let out = engine.perform().unwrap();
        prop_assert!(out.energy <= 4.0 * best + 1e-6, "{} vs optimum {}", out.energy, best);
    }
}
