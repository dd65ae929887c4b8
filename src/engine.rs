//! The alpha-expansion engine.
//!
//! One engine type covers both strategies. With a single worker the whole
//! grid is one block and every cut runs on the calling thread. With more
//! workers the grid is split into blocks whose cuts run on a rayon pool;
//! sites outside a block stay frozen for that block's cut. After all blocks
//! of a round have been solved, their moves are checked and applied in block
//! order.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::block::{Block, default_block_size, partition};
use crate::config::{ExpansionConfig, InitialLabeling};
use crate::cost::CostModel;
use crate::error::Result;
use crate::grid::Grid;
use crate::maxflow::MinCutSolver;
use crate::network;

/// Relative tolerance below which an energy change counts as a tie.
const TIE_TOLERANCE: f64 = 1e-10;

/// Lifecycle of an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Initialized,
    Running,
    Converged,
    Aborted,
}

/// How a run ended. Both carry a valid labeling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Status {
    /// A full pass over all labels accepted no move.
    Converged,
    /// The pass cap was reached first; the labeling improved but may not be
    /// a local optimum.
    NonConvergence,
}

/// Summary of one `perform()` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub passes: usize,
    pub accepted_moves: usize,
    pub changed_sites: usize,
    pub initial_energy: f64,
    pub energy: f64,
}

/// Proposal of one block for one candidate label.
#[derive(Default)]
struct BlockMove {
    sites: Vec<u32>,
    truncated: usize,
}

/// Alpha-expansion over a grid MRF. Owns the cost model and the labeling.
pub struct Expansion {
    model: CostModel,
    config: ExpansionConfig,
    labels: Grid<u32>,
    state: EngineState,
    blocks: Vec<Block>,
    pool: Option<rayon::ThreadPool>,
    solver: MinCutSolver,
    /// Per-site scratch flags for move deltas.
    mark: Vec<bool>,
    energy: f64,
}

impl Expansion {
    /// Engine starting from the labeling selected by `config.initial`.
    pub fn new(model: CostModel, config: ExpansionConfig) -> Result<Self> {
        config.validate()?;
        let t = *model.topology();
        let labels = match config.initial {
            InitialLabeling::Zero => Grid::new(t.width, t.height),
            InitialLabeling::BestUnary => model.best_unary_labeling(),
        };
        Self::with_labeling(model, config, labels)
    }

    /// Engine starting from an explicit labeling.
    pub fn with_labeling(model: CostModel, config: ExpansionConfig, labels: Grid<u32>) -> Result<Self> {
        config.validate()?;
        model.check_labeling(&labels)?;
        let t = *model.topology();

        let (blocks, pool) = if config.is_parallel() {
            let size = match config.block_size {
                0 => default_block_size(t.width, t.height, config.workers),
                n => n,
            };
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("expansion-{}", i))
                .build()?;
            (partition(t.width, t.height, size), Some(pool))
        } else {
            (vec![Block::whole(&t)], None)
        };

        let energy = model.energy(&labels);
        debug!(
            width = t.width,
            height = t.height,
            n_labels = model.n_labels(),
            connectivity = t.connectivity.degree(),
            workers = config.workers,
            blocks = blocks.len(),
            energy,
            "expansion engine initialized"
        );
        let violations = model.submodular_violations().len();
        if violations > 0 {
            warn!(
                violations,
                "label interaction is not submodular for every expansion; affected pair terms are truncated"
            );
        }

        Ok(Self {
            mark: vec![false; t.num_sites()],
            model,
            config,
            labels,
            state: EngineState::Initialized,
            blocks,
            pool,
            solver: MinCutSolver::new(),
            energy,
        })
    }

    /// Run expansion passes until a pass accepts no move or the pass cap is
    /// reached. Calling it again continues from the current labeling.
    pub fn perform(&mut self) -> Result<Outcome> {
        self.state = EngineState::Running;
        let initial_energy = self.energy;
        let n_labels = self.model.n_labels() as u32;
        let mut accepted_moves = 0;
        let mut changed_sites = 0;
        let mut truncated = 0;

        for pass in 1..=self.config.max_passes {
            let mut pass_moves = 0;
            for alpha in 0..n_labels {
                let round = match self.expand(alpha) {
                    Ok(round) => round,
                    Err(e) => {
                        self.state = EngineState::Aborted;
                        return Err(e);
                    }
                };
                pass_moves += round.accepted;
                changed_sites += round.changed;
                truncated += round.truncated;
            }
            accepted_moves += pass_moves;
            info!(pass, accepted = pass_moves, energy = self.energy, "expansion pass");

            if pass_moves == 0 {
                self.state = EngineState::Converged;
                info!(pass, energy = self.energy, "expansion converged");
                return Ok(self.finish(Status::Converged, pass, accepted_moves, changed_sites, initial_energy, truncated));
            }
        }

        self.state = EngineState::Aborted;
        warn!(
            max_passes = self.config.max_passes,
            energy = self.energy,
            "expansion stopped before convergence"
        );
        Ok(self.finish(
            Status::NonConvergence,
            self.config.max_passes,
            accepted_moves,
            changed_sites,
            initial_energy,
            truncated,
        ))
    }

    fn finish(
        &mut self,
        status: Status,
        passes: usize,
        accepted_moves: usize,
        changed_sites: usize,
        initial_energy: f64,
        truncated: usize,
    ) -> Outcome {
        // Drop accumulated rounding from the incremental updates.
        self.energy = self.model.energy(&self.labels);
        if truncated > 0 {
            warn!(truncated, "non-submodular pair terms truncated during run");
        }
        Outcome {
            status,
            passes,
            accepted_moves,
            changed_sites,
            initial_energy,
            energy: self.energy,
        }
    }

    /// One round: propose a move per block for `alpha`, then apply the moves
    /// that strictly lower the energy, in block order.
    fn expand(&mut self, alpha: u32) -> Result<Round> {
        let proposals = self.propose(alpha)?;

        let mut round = Round::default();
        for (b, mv) in proposals.into_iter().enumerate() {
            round.truncated += mv.truncated;
            if mv.sites.is_empty() {
                continue;
            }
            // Earlier blocks of this round may have changed the border.
            let delta = self.model.move_delta(&self.labels.data, &mv.sites, alpha, &mut self.mark);
            if delta < -TIE_TOLERANCE * self.energy.abs().max(f64::MIN_POSITIVE) {
                for &s in &mv.sites {
                    self.labels.data[s as usize] = alpha;
                }
                self.energy += delta;
                round.accepted += 1;
                round.changed += mv.sites.len();
            } else {
                trace!(alpha, block = b, delta, "move rejected");
            }
        }
        debug!(
            alpha,
            accepted = round.accepted,
            changed = round.changed,
            energy = self.energy,
            "expansion round"
        );
        Ok(round)
    }

    fn propose(&mut self, alpha: u32) -> Result<Vec<BlockMove>> {
        let model = &self.model;
        let labels = &self.labels.data;
        let blocks = &self.blocks;
        match &self.pool {
            None => {
                let solver = &mut self.solver;
                blocks
                    .iter()
                    .map(|b| solve_block(model, labels, alpha, b, solver))
                    .collect()
            }
            Some(pool) => pool.install(|| {
                blocks
                    .par_iter()
                    .map_init(MinCutSolver::new, |solver, b| solve_block(model, labels, alpha, b, solver))
                    .collect()
            }),
        }
    }

    /// Read-only view of the current labeling, valid in every state.
    pub fn current_assignment(&self) -> &Grid<u32> {
        &self.labels
    }

    pub fn into_labeling(self) -> Grid<u32> {
        self.labels
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Energy of the current labeling.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn model(&self) -> &CostModel {
        &self.model
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

#[derive(Default)]
struct Round {
    accepted: usize,
    changed: usize,
    truncated: usize,
}

fn solve_block(
    model: &CostModel,
    labels: &[u32],
    alpha: u32,
    block: &Block,
    solver: &mut MinCutSolver,
) -> Result<BlockMove> {
    let net = network::build(model, labels, alpha, block)?;
    if net.sites.is_empty() {
        return Ok(BlockMove::default());
    }
    let cut = solver.solve(&net.graph)?;
    Ok(BlockMove {
        sites: net.moving_sites(&cut),
        truncated: net.truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{EdgeWeights, potts};
    use crate::grid::{Connectivity, GridTopology};

    fn stripes_model() -> CostModel {
        // Noisy two-region image: left half prefers 0, right half prefers 1.
        let (w, h) = (6, 4);
        let t = GridTopology::new(w, h, Connectivity::FourConnected).unwrap();
        let mut unary = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let prefer = if x < w / 2 { 0 } else { 1 };
                let flip = (x * 7 + y * 3) % 5 == 0;
                let l = if flip { 1 - prefer } else { prefer };
                unary.extend(if l == 0 { [0.0, 2.0] } else { [2.0, 0.0] });
            }
        }
        CostModel::new(t, 2, unary, potts(2, 3.0), EdgeWeights::uniform(w, h, 0.0)).unwrap()
    }

    #[test]
    fn state_machine_reaches_converged() {
        let mut engine = Expansion::new(stripes_model(), ExpansionConfig::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);
        let out = engine.perform().unwrap();
        assert_eq!(engine.state(), EngineState::Converged);
        assert_eq!(out.status, Status::Converged);
        assert!(out.energy < out.initial_energy);
        assert!((engine.model().energy(engine.current_assignment()) - out.energy).abs() < 1e-9);
    }

    #[test]
    fn smoothing_removes_isolated_flips() {
        let mut engine = Expansion::new(stripes_model(), ExpansionConfig::default()).unwrap();
        engine.perform().unwrap();
        let labels = engine.into_labeling();
        for y in 0..4 {
            for x in 0..6 {
                assert_eq!(labels.get(x, y), if x < 3 { 0 } else { 1 }, "({x}, {y})");
            }
        }
    }

    #[test]
    fn pass_cap_reports_non_convergence() {
        let cfg = ExpansionConfig { max_passes: 1, ..Default::default() };
        let mut engine = Expansion::new(stripes_model(), cfg).unwrap();
        let out = engine.perform().unwrap();
        assert_eq!(out.status, Status::NonConvergence);
        assert_eq!(engine.state(), EngineState::Aborted);
        assert_eq!(out.passes, 1);
        assert!(out.energy <= out.initial_energy);
    }

    #[test]
    fn explicit_labeling_is_validated() {
        let bad = Grid::from_vec(6, 4, vec![2; 24]).unwrap();
        assert!(Expansion::with_labeling(stripes_model(), ExpansionConfig::default(), bad).is_err());
        let wrong_size = Grid::new(3, 3);
        assert!(Expansion::with_labeling(stripes_model(), ExpansionConfig::default(), wrong_size).is_err());
    }

    #[test]
    fn parallel_engine_uses_blocks() {
        let cfg = ExpansionConfig { workers: 2, block_size: 3, ..Default::default() };
        let mut engine = Expansion::new(stripes_model(), cfg).unwrap();
        assert_eq!(engine.blocks().len(), 4);
        let out = engine.perform().unwrap();
        assert_eq!(out.status, Status::Converged);
        assert!(out.energy < out.initial_energy);
    }

    fn unary_only(w: usize, unary: Vec<f32>, n_labels: usize) -> CostModel {
        let t = GridTopology::new(w, 1, Connectivity::FourConnected).unwrap();
        CostModel::new(t, n_labels, unary, potts(n_labels, 0.0), EdgeWeights::uniform(w, 1, 0.0)).unwrap()
    }

    #[test]
    fn tiny_improvements_are_accepted() {
        let mut engine = Expansion::new(unary_only(1, vec![3e-11, 1e-11, 2e-11], 3), ExpansionConfig::default()).unwrap();
        let out = engine.perform().unwrap();
        assert_eq!(out.status, Status::Converged);
        assert_eq!(engine.current_assignment().data, vec![1]);
        assert_eq!(out.energy, 1e-11f32 as f64);
    }

    #[test]
    fn small_cost_scale_reaches_per_site_argmin() {
        for cfg in [
            ExpansionConfig::default(),
            ExpansionConfig { workers: 2, block_size: 1, ..Default::default() },
        ] {
            let mut engine = Expansion::new(unary_only(2, vec![5e-10, 0.0, 0.0, 3e-10], 2), cfg).unwrap();
            let out = engine.perform().unwrap();
            assert_eq!(engine.current_assignment().data, vec![1, 0]);
            assert_eq!(out.energy, 0.0);
        }
    }

    #[test]
    fn best_unary_start_is_never_worse_than_its_own_energy() {
        let cfg = ExpansionConfig { initial: InitialLabeling::BestUnary, ..Default::default() };
        let model = stripes_model();
        let start = model.energy(&model.best_unary_labeling());
        let mut engine = Expansion::new(model, cfg).unwrap();
        assert!((engine.energy() - start).abs() < 1e-9);
        let out = engine.perform().unwrap();
        assert!(out.energy <= start);
    }
}
