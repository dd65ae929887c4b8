//! JSON problem description in the nested `[x][y]` layout used by callers,
//! and its conversion into a [`CostModel`] and an [`ExpansionConfig`].

use serde::{Deserialize, Serialize};

use crate::config::{ExpansionConfig, InitialLabeling};
use crate::cost::{CostModel, EdgeWeights, PairwiseMode};
use crate::error::{ExpansionError, Result};
use crate::grid::{Connectivity, Grid, GridTopology};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// `[width][height][n_labels]`
    pub unary_cost: Vec<Vec<Vec<f32>>>,
    /// `[n_labels][n_labels]`
    pub pairwise_cost: Vec<Vec<f32>>,
    /// `[width][height]`
    pub edges_right: Vec<Vec<f32>>,
    /// `[width][height]`
    pub edges_down: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges_down_right: Option<Vec<Vec<f32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges_down_left: Option<Vec<Vec<f32>>>,
    /// 4 or 8; defaults to 4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_passes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairwise_mode: Option<PairwiseMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<InitialLabeling>,
}

impl Problem {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ExpansionError::malformed(format!("problem JSON: {}", e)))
    }

    pub fn width(&self) -> usize {
        self.unary_cost.len()
    }

    pub fn height(&self) -> usize {
        self.unary_cost.first().map_or(0, Vec::len)
    }

    pub fn n_labels(&self) -> usize {
        self.unary_cost
            .first()
            .and_then(|col| col.first())
            .map_or(0, Vec::len)
    }

    /// Flatten and validate the cost tables.
    pub fn cost_model(&self) -> Result<CostModel> {
        let connectivity = match self.connectivity {
            Some(d) => Connectivity::from_degree(d)?,
            None => Connectivity::default(),
        };
        let topology = GridTopology::new(self.width(), self.height(), connectivity)?;
        let n = self.n_labels();

        let mut unary = Vec::with_capacity(topology.num_sites() * n);
        for y in 0..topology.height {
            for x in 0..topology.width {
                let costs = self.unary_cost[x].get(y).ok_or_else(|| {
                    ExpansionError::malformed(format!("unary_cost column {} has fewer than {} rows", x, topology.height))
                })?;
                if costs.len() != n {
                    return Err(ExpansionError::malformed(format!(
                        "unary_cost at ({}, {}) has {} labels, expected {}",
                        x,
                        y,
                        costs.len(),
                        n
                    )));
                }
                unary.extend_from_slice(costs);
            }
        }
        if let Some(x) = self.unary_cost.iter().position(|col| col.len() != topology.height) {
            return Err(ExpansionError::malformed(format!(
                "unary_cost column {} has {} rows, expected {}",
                x,
                self.unary_cost[x].len(),
                topology.height
            )));
        }

        if let Some(row) = self.pairwise_cost.iter().position(|r| r.len() != n) {
            return Err(ExpansionError::malformed(format!(
                "pairwise_cost row {} has {} entries, expected {}",
                row,
                self.pairwise_cost[row].len(),
                n
            )));
        }
        let interaction: Vec<f32> = self.pairwise_cost.iter().flatten().copied().collect();

        let mut weights = EdgeWeights::new(
            weight_grid("edges_right", &self.edges_right)?,
            weight_grid("edges_down", &self.edges_down)?,
        );
        if let Some(cols) = &self.edges_down_right {
            weights.down_right = Some(weight_grid("edges_down_right", cols)?);
        }
        if let Some(cols) = &self.edges_down_left {
            weights.down_left = Some(weight_grid("edges_down_left", cols)?);
        }

        let model = CostModel::new(topology, n, unary, interaction, weights)?;
        Ok(model.with_mode(self.pairwise_mode.unwrap_or_default()))
    }

    /// Engine parameters; absent fields take their defaults.
    pub fn config(&self) -> Result<ExpansionConfig> {
        let defaults = ExpansionConfig::default();
        let config = ExpansionConfig {
            workers: self.n_threads.unwrap_or(defaults.workers),
            block_size: self.block_size.unwrap_or(defaults.block_size),
            max_passes: self.max_passes.unwrap_or(defaults.max_passes),
            initial: self.initial.unwrap_or(defaults.initial),
        };
        config.validate()?;
        Ok(config)
    }
}

fn weight_grid(name: &str, columns: &[Vec<f32>]) -> Result<Grid<f32>> {
    Grid::from_columns(columns).map_err(|e| ExpansionError::malformed(format!("{}: {}", name, e.message())))
}
