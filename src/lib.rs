pub mod block;
pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod grid;
pub mod maxflow;
pub mod network;
pub mod problem;
pub mod render;
pub mod rng;
pub mod synth;

use std::time::Instant;

pub use config::{ExpansionConfig, InitialLabeling};
pub use cost::{CostModel, EdgeWeights, PairwiseMode};
pub use engine::{EngineState, Expansion, Outcome, Status};
pub use error::{ErrorKind, ExpansionError, Result};
pub use grid::{Connectivity, Direction, Grid, GridTopology};
pub use problem::Problem;

pub struct Solution {
    pub labels: Grid<u32>,
    pub outcome: Outcome,
    pub n_labels: usize,
    /// Per-site energy share of the final labeling.
    pub site_energy: Grid<f32>,
}

impl Solution {
    /// Labels in the `[x][y]` layout of the input.
    pub fn label_columns(&self) -> Vec<Vec<u32>> {
        self.labels.to_columns()
    }
}

pub struct Timing {
    pub name: &'static str,
    pub ms: f64,
}

pub fn solve(problem: &Problem) -> Result<(Solution, Vec<Timing>)> {
    let mut timings = Vec::new();
    let total_start = Instant::now();

    // 1. Validate and flatten the cost tables
    let t = Instant::now();
    let model = problem.cost_model()?;
    let config = problem.config()?;
    let n_labels = model.n_labels();
    timings.push(Timing {
        name: "cost_model",
        ms: t.elapsed().as_secs_f64() * 1000.0,
    });

    // 2. Expansion passes
    let t = Instant::now();
    let mut engine = Expansion::new(model, config)?;
    let outcome = engine.perform()?;
    timings.push(Timing {
        name: "expansion",
        ms: t.elapsed().as_secs_f64() * 1000.0,
    });

    // 3. Per-site energy for diagnostics
    let t = Instant::now();
    let site_energy = engine.model().site_energy(engine.current_assignment());
    timings.push(Timing {
        name: "site_energy",
        ms: t.elapsed().as_secs_f64() * 1000.0,
    });

    let total_ms = total_start.elapsed().as_secs_f64() * 1000.0;
    timings.push(Timing {
        name: "TOTAL",
        ms: total_ms,
    });

    let solution = Solution {
        labels: engine.into_labeling(),
        outcome,
        n_labels,
        site_energy,
    };

    Ok((solution, timings))
}
