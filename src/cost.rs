//! Unary and pairwise cost tables of a grid MRF.
//!
//! The pairwise table is never materialized: the cost of an edge leaving
//! `site` in direction `dir` with labels `(a, b)` is derived on demand from
//! the label-interaction matrix and the directional edge weight.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ExpansionError, Result};
use crate::grid::{Connectivity, Direction, Grid, GridTopology};

/// How an edge weight combines with the label-interaction matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairwiseMode {
    /// `interaction[a][b] + weight`
    #[default]
    Additive,
    /// `interaction[a][b] * weight` (contrast-sensitive smoothing)
    Scaled,
}

/// One weight map per forward direction. Entries whose forward neighbor falls
/// outside the grid are ignored.
#[derive(Clone, Debug)]
pub struct EdgeWeights {
    pub right: Grid<f32>,
    pub down: Grid<f32>,
    pub down_right: Option<Grid<f32>>,
    pub down_left: Option<Grid<f32>>,
}

impl EdgeWeights {
    pub fn new(right: Grid<f32>, down: Grid<f32>) -> Self {
        Self {
            right,
            down,
            down_right: None,
            down_left: None,
        }
    }

    pub fn with_diagonals(mut self, down_right: Grid<f32>, down_left: Grid<f32>) -> Self {
        self.down_right = Some(down_right);
        self.down_left = Some(down_left);
        self
    }

    /// Same weight on every edge of every direction.
    pub fn uniform(w: usize, h: usize, weight: f32) -> Self {
        Self::new(Grid::filled(w, h, weight), Grid::filled(w, h, weight))
            .with_diagonals(Grid::filled(w, h, weight), Grid::filled(w, h, weight))
    }

    fn map(&self, dir: Direction) -> Option<&Grid<f32>> {
        match dir {
            Direction::Right => Some(&self.right),
            Direction::Down => Some(&self.down),
            Direction::DownRight => self.down_right.as_ref(),
            Direction::DownLeft => self.down_left.as_ref(),
        }
    }
}

/// Immutable cost tables for one labeling problem.
#[derive(Clone, Debug)]
pub struct CostModel {
    topology: GridTopology,
    n_labels: usize,
    /// `site * n_labels + label`
    unary: Vec<f32>,
    /// `a * n_labels + b`
    interaction: Vec<f32>,
    /// Indexed by `Direction::index()`; only the directions of the topology are populated.
    weights: [Vec<f32>; 4],
    mode: PairwiseMode,
}

impl CostModel {
    /// Validate and assemble the cost tables. Fails with `MalformedInput` on
    /// any dimension mismatch or on a negative / non-finite cost.
    pub fn new(
        topology: GridTopology,
        n_labels: usize,
        unary: Vec<f32>,
        interaction: Vec<f32>,
        weights: EdgeWeights,
    ) -> Result<Self> {
        if n_labels == 0 {
            return Err(ExpansionError::malformed("n_labels must be positive"));
        }
        if n_labels > u32::MAX as usize {
            return Err(ExpansionError::malformed(format!("too many labels: {}", n_labels)));
        }
        let (w, h) = (topology.width, topology.height);

        let expected = topology.num_sites() * n_labels;
        if unary.len() != expected {
            return Err(ExpansionError::malformed(format!(
                "unary table holds {} costs, expected {}x{}x{} = {}",
                unary.len(),
                w,
                h,
                n_labels,
                expected
            )));
        }
        if let Some(i) = unary.iter().position(|c| !valid_cost(*c)) {
            let site = i / n_labels;
            let (x, y) = topology.coords(site);
            return Err(ExpansionError::malformed(format!(
                "unary cost at ({}, {}) label {} is {}",
                x,
                y,
                i % n_labels,
                unary[i]
            )));
        }

        if interaction.len() != n_labels * n_labels {
            return Err(ExpansionError::malformed(format!(
                "label interaction matrix holds {} entries, expected {}x{}",
                interaction.len(),
                n_labels,
                n_labels
            )));
        }
        if let Some(i) = interaction.iter().position(|c| !valid_cost(*c)) {
            return Err(ExpansionError::malformed(format!(
                "label interaction [{}][{}] is {}",
                i / n_labels,
                i % n_labels,
                interaction[i]
            )));
        }

        let mut maps: [Vec<f32>; 4] = Default::default();
        for &dir in topology.connectivity.directions() {
            let Some(grid) = weights.map(dir) else {
                return Err(ExpansionError::malformed(format!(
                    "{:?} edge weights are required for {}-connectivity",
                    dir,
                    topology.connectivity.degree()
                )));
            };
            if grid.w != w || grid.h != h {
                return Err(ExpansionError::malformed(format!(
                    "{:?} edge weights are {}x{}, expected {}x{}",
                    dir, grid.w, grid.h, w, h
                )));
            }
            // Only weights of edges that exist are costs.
            for y in 0..h {
                for x in 0..w {
                    let v = grid.get(x, y);
                    if topology.has_edge(x, y, dir) && !valid_cost(v) {
                        return Err(ExpansionError::malformed(format!(
                            "{:?} edge weight at ({}, {}) is {}",
                            dir, x, y, v
                        )));
                    }
                }
            }
            maps[dir.index()] = grid.data.clone();
        }

        Ok(Self {
            topology,
            n_labels,
            unary,
            interaction,
            weights: maps,
            mode: PairwiseMode::Additive,
        })
    }

    pub fn with_mode(mut self, mode: PairwiseMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    #[inline]
    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    #[inline]
    pub fn mode(&self) -> PairwiseMode {
        self.mode
    }

    #[inline]
    pub fn unary_cost(&self, site: usize, label: u32) -> f64 {
        self.unary[site * self.n_labels + label as usize] as f64
    }

    #[inline]
    pub fn interaction(&self, a: u32, b: u32) -> f32 {
        self.interaction[a as usize * self.n_labels + b as usize]
    }

    /// Cost of the edge leaving `site` in `dir` when `site` has label `a`
    /// and its neighbor has label `b`. Evaluated in f64 so that finite f32
    /// inputs never combine to infinity.
    #[inline]
    pub fn pairwise_cost(&self, site: usize, dir: Direction, a: u32, b: u32) -> f64 {
        let w = self.weights[dir.index()][site] as f64;
        let v = self.interaction(a, b) as f64;
        match self.mode {
            PairwiseMode::Additive => v + w,
            PairwiseMode::Scaled => v * w,
        }
    }

    /// Cheapest unary label of every site (first one on ties).
    pub fn best_unary_labeling(&self) -> Grid<u32> {
        let t = &self.topology;
        let data = self
            .unary
            .chunks_exact(self.n_labels)
            .map(|costs| {
                let mut best = 0;
                for (l, &c) in costs.iter().enumerate() {
                    if c < costs[best] {
                        best = l;
                    }
                }
                best as u32
            })
            .collect();
        Grid {
            data,
            w: t.width,
            h: t.height,
        }
    }

    /// Check a labeling against the grid size and label range.
    pub fn check_labeling(&self, labels: &Grid<u32>) -> Result<()> {
        let t = &self.topology;
        if labels.w != t.width || labels.h != t.height || labels.data.len() != t.num_sites() {
            return Err(ExpansionError::malformed(format!(
                "labeling is {}x{}, expected {}x{}",
                labels.w, labels.h, t.width, t.height
            )));
        }
        if let Some(i) = labels.data.iter().position(|&l| l as usize >= self.n_labels) {
            let (x, y) = t.coords(i);
            return Err(ExpansionError::malformed(format!(
                "label {} at ({}, {}) is outside [0, {})",
                labels.data[i], x, y, self.n_labels
            )));
        }
        Ok(())
    }

    /// Unary cost plus the cost of every forward edge of one site.
    fn local_energy(&self, labels: &[u32], site: usize) -> f64 {
        let l = labels[site];
        let mut e = self.unary_cost(site, l);
        for (dir, n) in self.topology.forward_neighbors(site) {
            e += self.pairwise_cost(site, dir, l, labels[n]);
        }
        e
    }

    /// Total energy; each undirected edge counted once, from its forward origin.
    pub fn energy(&self, labels: &Grid<u32>) -> f64 {
        let w = self.topology.width;
        // Row sums in parallel, folded in row order so the result is reproducible.
        let rows: Vec<f64> = (0..self.topology.height)
            .into_par_iter()
            .map(|y| {
                (y * w..(y + 1) * w)
                    .map(|site| self.local_energy(&labels.data, site))
                    .sum()
            })
            .collect();
        rows.iter().sum()
    }

    /// Per-site share of the energy (unary plus forward edges).
    pub fn site_energy(&self, labels: &Grid<u32>) -> Grid<f32> {
        let w = self.topology.width;
        let mut out = Grid::<f32>::new(w, self.topology.height);
        out.data.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            for (x, v) in row.iter_mut().enumerate() {
                *v = self.local_energy(&labels.data, y * w + x) as f32;
            }
        });
        out
    }

    /// Exact change of total energy if every site in `moving` switched to
    /// `alpha`. `mark` is a scratch buffer of one flag per site; it must be
    /// all-false on entry and is all-false again on return.
    pub fn move_delta(&self, labels: &[u32], moving: &[u32], alpha: u32, mark: &mut [bool]) -> f64 {
        for &s in moving {
            mark[s as usize] = true;
        }
        let new_label = |site: usize, mark: &[bool]| if mark[site] { alpha } else { labels[site] };

        let mut delta = 0.0f64;
        for &s in moving {
            let s = s as usize;
            let old = labels[s];
            delta += self.unary_cost(s, alpha) - self.unary_cost(s, old);
            for (dir, n) in self.topology.forward_neighbors(s) {
                let before = self.pairwise_cost(s, dir, old, labels[n]);
                let after = self.pairwise_cost(s, dir, alpha, new_label(n, mark));
                delta += after - before;
            }
            for (dir, r) in self.topology.backward_neighbors(s) {
                // Counted from r's forward side when r moves too.
                if mark[r] {
                    continue;
                }
                let before = self.pairwise_cost(r, dir, labels[r], old);
                let after = self.pairwise_cost(r, dir, labels[r], alpha);
                delta += after - before;
            }
        }

        for &s in moving {
            mark[s as usize] = false;
        }
        delta
    }

    /// Label triples `(a, b, alpha)` for which the expansion term is not
    /// submodular: `V(a,b) + V(alpha,alpha) > V(a,alpha) + V(alpha,b)`.
    /// Edge weights cancel out of the condition in both pairwise modes
    /// (for `Scaled` they factor out), so the matrix alone decides.
    pub fn submodular_violations(&self) -> Vec<(u32, u32, u32)> {
        let n = self.n_labels as u32;
        let mut out = Vec::new();
        for alpha in 0..n {
            for a in 0..n {
                for b in 0..n {
                    if a == alpha || b == alpha {
                        continue;
                    }
                    let lhs = self.interaction(a, b) + self.interaction(alpha, alpha);
                    let rhs = self.interaction(a, alpha) + self.interaction(alpha, b);
                    if lhs > rhs * (1.0 + 1e-6) {
                        out.push((a, b, alpha));
                    }
                }
            }
        }
        out
    }

    /// Whether the label-interaction matrix is a metric: zero diagonal,
    /// symmetric, positive off the diagonal, triangle inequality.
    pub fn is_metric(&self) -> bool {
        let n = self.n_labels as u32;
        for a in 0..n {
            if self.interaction(a, a) != 0.0 {
                return false;
            }
            for b in 0..n {
                if a != b && (self.interaction(a, b) <= 0.0 || self.interaction(a, b) != self.interaction(b, a)) {
                    return false;
                }
                for c in 0..n {
                    if self.interaction(a, c) > self.interaction(a, b) + self.interaction(b, c) {
                        return false;
                    }
                }
            }
        }
        true
    }

    #[inline]
    pub fn connectivity(&self) -> Connectivity {
        self.topology.connectivity
    }
}

#[inline]
fn valid_cost(c: f32) -> bool {
    c.is_finite() && c >= 0.0
}

/// Potts interaction: 0 on the diagonal, `lambda` elsewhere.
pub fn potts(n_labels: usize, lambda: f32) -> Vec<f32> {
    let mut m = vec![lambda; n_labels * n_labels];
    for l in 0..n_labels {
        m[l * n_labels + l] = 0.0;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(w: usize, h: usize, n: usize, conn: Connectivity) -> CostModel {
        let t = GridTopology::new(w, h, conn).unwrap();
        let unary = (0..w * h * n).map(|i| (i % 7) as f32).collect();
        CostModel::new(t, n, unary, potts(n, 2.0), EdgeWeights::uniform(w, h, 0.5)).unwrap()
    }

    #[test]
    fn pairwise_follows_mode() {
        let m = model(2, 2, 3, Connectivity::FourConnected);
        assert_eq!(m.pairwise_cost(0, Direction::Right, 0, 1), 2.5);
        assert_eq!(m.pairwise_cost(0, Direction::Right, 1, 1), 0.5);
        let m = m.with_mode(PairwiseMode::Scaled);
        assert_eq!(m.pairwise_cost(0, Direction::Right, 0, 1), 1.0);
        assert_eq!(m.pairwise_cost(0, Direction::Right, 1, 1), 0.0);
    }

    #[test]
    fn energy_counts_each_edge_once() {
        let t = GridTopology::new(2, 1, Connectivity::FourConnected).unwrap();
        let m = CostModel::new(
            t,
            2,
            vec![0.0, 5.0, 5.0, 0.0],
            vec![0.0, 10.0, 10.0, 0.0],
            EdgeWeights::new(Grid::filled(2, 1, 1.0), Grid::filled(2, 1, 1.0)),
        )
        .unwrap();
        let labels = Grid::from_vec(2, 1, vec![0, 1]).unwrap();
        assert_eq!(m.energy(&labels), 11.0);
        let labels = Grid::from_vec(2, 1, vec![0, 0]).unwrap();
        assert_eq!(m.energy(&labels), 6.0);
    }

    #[test]
    fn move_delta_matches_energy_difference() {
        for conn in [Connectivity::FourConnected, Connectivity::EightConnected] {
            let m = model(4, 3, 3, conn);
            let mut labels = Grid::from_vec(4, 3, (0..12).map(|i| (i * 5 % 3) as u32).collect()).unwrap();
            let before = m.energy(&labels);
            let moving: Vec<u32> = vec![0, 1, 5, 6, 11];
            let mut mark = vec![false; 12];
            let delta = m.move_delta(&labels.data, &moving, 2, &mut mark);
            assert!(mark.iter().all(|f| !f));
            for &s in &moving {
                labels.data[s as usize] = 2;
            }
            let after = m.energy(&labels);
            assert!((after - before - delta).abs() < 1e-6, "{conn:?}: {delta} vs {}", after - before);
        }
    }

    #[test]
    fn rejects_malformed_tables() {
        let t = GridTopology::new(2, 2, Connectivity::FourConnected).unwrap();
        let w = || EdgeWeights::new(Grid::filled(2, 2, 1.0), Grid::filled(2, 2, 1.0));

        assert!(CostModel::new(t, 0, vec![], vec![], w()).is_err());
        assert!(CostModel::new(t, 2, vec![0.0; 7], potts(2, 1.0), w()).is_err());
        assert!(CostModel::new(t, 2, vec![0.0; 8], potts(3, 1.0), w()).is_err());

        let mut unary = vec![0.0; 8];
        unary[3] = -1.0;
        let err = CostModel::new(t, 2, unary, potts(2, 1.0), w()).unwrap_err();
        assert!(err.message().contains("(1, 0) label 1"), "{err}");

        let mut unary = vec![0.0; 8];
        unary[0] = f32::NAN;
        assert!(CostModel::new(t, 2, unary, potts(2, 1.0), w()).is_err());

        let bad = EdgeWeights::new(Grid::filled(3, 2, 1.0), Grid::filled(2, 2, 1.0));
        assert!(CostModel::new(t, 2, vec![0.0; 8], potts(2, 1.0), bad).is_err());

        let t8 = GridTopology::new(2, 2, Connectivity::EightConnected).unwrap();
        assert!(CostModel::new(t8, 2, vec![0.0; 8], potts(2, 1.0), w()).is_err());
    }

    #[test]
    fn ignored_border_weights_are_not_validated() {
        let t = GridTopology::new(2, 2, Connectivity::FourConnected).unwrap();
        let mut right = Grid::filled(2, 2, 1.0);
        right.set(1, 0, -3.0); // last column: no right neighbor
        let mut down = Grid::filled(2, 2, 1.0);
        down.set(0, 1, f32::NAN); // last row: no down neighbor
        assert!(CostModel::new(t, 2, vec![0.0; 8], potts(2, 1.0), EdgeWeights::new(right, down)).is_ok());

        let mut right = Grid::filled(2, 2, 1.0);
        right.set(0, 1, -3.0);
        assert!(CostModel::new(t, 2, vec![0.0; 8], potts(2, 1.0), EdgeWeights::new(right, Grid::filled(2, 2, 1.0))).is_err());
    }

    #[test]
    fn metric_and_submodularity_checks() {
        let m = model(2, 2, 3, Connectivity::FourConnected);
        assert!(m.is_metric());
        assert!(m.submodular_violations().is_empty());

        // Squared distance is not a metric and breaks submodularity for
        // (0, 2) expanded on 1.
        let t = GridTopology::new(2, 2, Connectivity::FourConnected).unwrap();
        let sq: Vec<f32> = (0..9).map(|i| ((i / 3) as f32 - (i % 3) as f32).powi(2)).collect();
        let m = CostModel::new(t, 3, vec![0.0; 12], sq, EdgeWeights::uniform(2, 2, 0.0)).unwrap();
        assert!(!m.is_metric());
        assert!(m.submodular_violations().contains(&(0, 2, 1)));
    }

    #[test]
    fn huge_finite_costs_stay_finite() {
        let t = GridTopology::new(2, 1, Connectivity::FourConnected).unwrap();
        let m = CostModel::new(t, 2, vec![0.0, 1.0, 1.0, 0.0], potts(2, 1e20), EdgeWeights::uniform(2, 1, 1e20))
            .unwrap()
            .with_mode(PairwiseMode::Scaled);
        let big = 1e20f32 as f64;
        assert_eq!(m.pairwise_cost(0, Direction::Right, 0, 1), big * big);
        let labels = Grid::from_vec(2, 1, vec![0, 1]).unwrap();
        assert!(m.energy(&labels).is_finite());

        let m = CostModel::new(t, 2, vec![0.0; 4], potts(2, f32::MAX), EdgeWeights::uniform(2, 1, f32::MAX)).unwrap();
        assert!(m.pairwise_cost(0, Direction::Right, 0, 1).is_finite());
    }

    #[test]
    fn best_unary_picks_first_minimum() {
        let t = GridTopology::new(2, 1, Connectivity::FourConnected).unwrap();
        let m = CostModel::new(
            t,
            3,
            vec![3.0, 1.0, 1.0, 0.0, 4.0, 2.0],
            potts(3, 1.0),
            EdgeWeights::uniform(2, 1, 0.0),
        )
        .unwrap();
        assert_eq!(m.best_unary_labeling().data, vec![1, 0]);
    }
}
