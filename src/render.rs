use rayon::prelude::*;

use crate::grid::Grid;
use crate::rng::splitmix32;

// Heat map color stops for per-site energy
const HEAT_LOW: [u8; 4] = [18, 36, 70, 255];
const HEAT_MID: [u8; 4] = [60, 160, 80, 255];
const HEAT_HIGH: [u8; 4] = [220, 200, 60, 255];
const HEAT_MAX: [u8; 4] = [200, 50, 30, 255];

#[inline]
fn lerp_color(a: [u8; 4], b: [u8; 4], t: f32) -> [u8; 4] {
    let t = t.clamp(0.0, 1.0);
    [
        (a[0] as f32 + (b[0] as f32 - a[0] as f32) * t).round() as u8,
        (a[1] as f32 + (b[1] as f32 - a[1] as f32) * t).round() as u8,
        (a[2] as f32 + (b[2] as f32 - a[2] as f32) * t).round() as u8,
        255,
    ]
}

/// Distinct color per label. Up to 16 labels get an even gray ramp so
/// ordered labels (intensity levels) read naturally; beyond that colors are
/// hashed from the label.
pub fn palette(n_labels: usize) -> Vec<[u8; 4]> {
    if n_labels <= 16 {
        return (0..n_labels)
            .map(|l| {
                let t = if n_labels > 1 { l as f32 / (n_labels - 1) as f32 } else { 0.5 };
                lerp_color([0, 0, 0, 255], [255, 255, 255, 255], t)
            })
            .collect();
    }
    (0..n_labels)
        .map(|l| {
            let h = splitmix32(l as u32 * 7 + 123);
            [
                (h & 0xFF) as u8 | 40,
                ((h >> 8) & 0xFF) as u8 | 40,
                ((h >> 16) & 0xFF) as u8 | 40,
                255,
            ]
        })
        .collect()
}

/// Render a labeling with [`palette`]. Out-of-range labels come out magenta.
pub fn render_labels(labels: &Grid<u32>, n_labels: usize) -> Vec<u8> {
    let colors = palette(n_labels);
    let w = labels.w;
    let mut rgba = vec![0u8; w * labels.h * 4];
    if w == 0 {
        return rgba;
    }

    rgba.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let color = colors
                .get(labels.get(x, y) as usize)
                .copied()
                .unwrap_or([255, 0, 255, 255]);
            row[x * 4..x * 4 + 4].copy_from_slice(&color);
        }
    });

    rgba
}

/// Heat map of per-site energy, scaled to the maximum of the grid.
pub fn render_energy(energy: &Grid<f32>) -> Vec<u8> {
    let max_e = energy
        .data
        .iter()
        .cloned()
        .filter(|e| e.is_finite())
        .fold(0.0f32, f32::max);
    let max_e = if max_e > 0.0 { max_e } else { 1.0 };
    let w = energy.w;
    let mut rgba = vec![0u8; w * energy.h * 4];
    if w == 0 {
        return rgba;
    }

    rgba.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let t = (energy.get(x, y) / max_e).clamp(0.0, 1.0);
            let color = if t < 0.33 {
                lerp_color(HEAT_LOW, HEAT_MID, t / 0.33)
            } else if t < 0.66 {
                lerp_color(HEAT_MID, HEAT_HIGH, (t - 0.33) / 0.33)
            } else {
                lerp_color(HEAT_HIGH, HEAT_MAX, (t - 0.66) / 0.34)
            };
            row[x * 4..x * 4 + 4].copy_from_slice(&color);
        }
    });

    rgba
}

/// Grayscale rendering of an intensity image, clamped to `[0, 1]`.
pub fn render_intensity(values: &Grid<f32>) -> Vec<u8> {
    let mut rgba = vec![0u8; values.w * values.h * 4];
    for (i, &v) in values.data.iter().enumerate() {
        let g = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        rgba[i * 4..i * 4 + 4].copy_from_slice(&[g, g, g, 255]);
    }
    rgba
}
