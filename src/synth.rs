//! Synthetic denoising problems.
//!
//! A piecewise-constant label image (nearest of a few random seed points) is
//! mapped to intensity levels and corrupted with Gaussian noise. Unary costs
//! are squared distances to each level; pairwise costs are Potts scaled by a
//! contrast weight, so smoothing is cheap across intensity edges.

use crate::cost::{PairwiseMode, potts};
use crate::error::{ExpansionError, Result};
use crate::grid::Grid;
use crate::problem::Problem;
use crate::rng::Rng;

const SEEDS_PER_LABEL: usize = 2;
const NOISE: f32 = 0.1;
const DATA_WEIGHT: f32 = 10.0;
const SMOOTHNESS: f32 = 1.0;
/// Intensity difference at which the contrast weight drops to `e^-0.5`.
const CONTRAST: f32 = 0.1;

pub struct Scene {
    pub problem: Problem,
    /// Label image the observation was generated from.
    pub truth: Grid<u32>,
    /// Noisy intensities in roughly `[0, 1]`.
    pub observed: Grid<f32>,
}

/// Intensity of label `l` among `n` evenly spaced levels in `[0, 1]`.
pub fn level(l: u32, n_labels: usize) -> f32 {
    if n_labels <= 1 {
        0.5
    } else {
        l as f32 / (n_labels - 1) as f32
    }
}

pub fn denoising(seed: u64, width: usize, height: usize, n_labels: usize) -> Result<Scene> {
    if width == 0 || height == 0 || n_labels == 0 {
        return Err(ExpansionError::malformed(format!(
            "demo needs a non-empty grid and at least one label, got {}x{} with {} labels",
            width, height, n_labels
        )));
    }
    let mut rng = Rng::new(seed);

    let points: Vec<(f32, f32, u32)> = (0..n_labels * SEEDS_PER_LABEL)
        .map(|i| {
            let x = rng.range_f32(0.0, width as f32);
            let y = rng.range_f32(0.0, height as f32);
            (x, y, (i % n_labels) as u32)
        })
        .collect();

    let mut truth = Grid::<u32>::new(width, height);
    let mut observed = Grid::<f32>::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let mut best = (f32::MAX, 0);
            for &(sx, sy, l) in &points {
                let d = (sx - px).powi(2) + (sy - py).powi(2);
                if d < best.0 {
                    best = (d, l);
                }
            }
            truth.set(x, y, best.1);
            observed.set(x, y, level(best.1, n_labels) + NOISE * rng.normal());
        }
    }

    let unary_cost = (0..width)
        .map(|x| {
            (0..height)
                .map(|y| {
                    let v = observed.get(x, y);
                    (0..n_labels as u32)
                        .map(|l| DATA_WEIGHT * (v - level(l, n_labels)).powi(2))
                        .collect()
                })
                .collect()
        })
        .collect();

    let contrast = |a: f32, b: f32| SMOOTHNESS * (-(a - b).powi(2) / (2.0 * CONTRAST * CONTRAST)).exp();
    let mut right = Grid::<f32>::new(width, height);
    let mut down = Grid::<f32>::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = observed.get(x, y);
            if x + 1 < width {
                right.set(x, y, contrast(v, observed.get(x + 1, y)));
            }
            if y + 1 < height {
                down.set(x, y, contrast(v, observed.get(x, y + 1)));
            }
        }
    }

    let pairwise = potts(n_labels, 1.0);
    let problem = Problem {
        unary_cost,
        pairwise_cost: pairwise.chunks(n_labels).map(<[f32]>::to_vec).collect(),
        edges_right: right.to_columns(),
        edges_down: down.to_columns(),
        edges_down_right: None,
        edges_down_left: None,
        connectivity: Some(4),
        n_threads: None,
        block_size: None,
        max_passes: None,
        pairwise_mode: Some(PairwiseMode::Scaled),
        initial: None,
    };

    Ok(Scene {
        problem,
        truth,
        observed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Expansion;

    fn agreement(a: &Grid<u32>, b: &Grid<u32>) -> f64 {
        let same = a.data.iter().zip(&b.data).filter(|(x, y)| x == y).count();
        same as f64 / a.data.len() as f64
    }

    #[test]
    fn same_seed_same_scene() {
        let a = denoising(5, 12, 9, 3).unwrap();
        let b = denoising(5, 12, 9, 3).unwrap();
        assert_eq!(a.problem, b.problem);
        assert_eq!(a.truth, b.truth);
        let c = denoising(6, 12, 9, 3).unwrap();
        assert_ne!(a.problem, c.problem);
    }

    #[test]
    fn scene_converts_to_a_valid_model() {
        let s = denoising(1, 7, 5, 4).unwrap();
        assert_eq!((s.problem.width(), s.problem.height(), s.problem.n_labels()), (7, 5, 4));
        let m = s.problem.cost_model().unwrap();
        assert!(m.is_metric());
        assert!(s.truth.data.iter().all(|&l| l < 4));
    }

    #[test]
    fn rejects_empty_scene() {
        assert!(denoising(1, 0, 5, 2).is_err());
        assert!(denoising(1, 5, 5, 0).is_err());
    }

    #[test]
    fn expansion_recovers_most_of_the_truth() {
        let s = denoising(42, 32, 32, 4).unwrap();
        let model = s.problem.cost_model().unwrap();
        let config = s.problem.config().unwrap();
        let mut engine = Expansion::new(model, config).unwrap();
        engine.perform().unwrap();
        let score = agreement(engine.current_assignment(), &s.truth);
        assert!(score > 0.85, "agreement {score}");
    }
}
