//! Frame-level motion features for activity segmentation.
//!
//! Works on small grayscale frames (the caller downscales; something
//! near 160×90 keeps the statistics stable and cheap). Each frame yields
//! six base features describing how much it differs from its
//! predecessor, which are then augmented with rolling statistics to give
//! the classifier temporal context.
//!
//! Base features, in column order:
//! 0. mean inter-frame absolute difference (÷255)
//! 1. std of the inter-frame difference (÷255)
//! 2. change ratio: fraction of pixels whose difference exceeds 18
//! 3. edge change ratio: fraction of churned edge pixels
//! 4. intensity std of the current frame (÷255)
//! 5. texture variance: Laplacian variance (÷1000, capped at 1)

use ndarray::{Array2, ArrayView2};

/// A single grayscale frame, `(height, width)`.
pub type GrayFrame = Array2<u8>;

/// Number of base motion features per frame.
pub const BASE_FEATURES: usize = 6;

/// Rolling-statistics window used by [`build_feature_matrix`].
pub const TEMPORAL_WINDOW: usize = 5;

/// Columns of the augmented feature matrix
/// (base + rolling mean + rolling std + delta).
pub const MATRIX_FEATURES: usize = BASE_FEATURES * 4;

/// Pixel-difference threshold for the change ratio.
const CHANGE_THRESHOLD: u8 = 18;

/// Gradient-magnitude threshold for the binary edge map.
const EDGE_THRESHOLD: i32 = 120;

/// Extract the base motion features for every frame.
///
/// Missing frames (`None`) leave their row at zero and keep the previous
/// frame as the comparison baseline, exactly as a dropped file would.
/// The first valid frame has no predecessor and stays zero too. An
/// all-missing sequence yields an all-zero matrix.
#[must_use]
pub fn extract_base_features(frames: &[Option<GrayFrame>]) -> Array2<f32> {
    let n = frames.len();
    let mut feats = Array2::<f32>::zeros((n, BASE_FEATURES));
    if n == 0 {
        return feats;
    }

    // Find the first frame that decoded at all.
    let Some((first_idx, first)) = frames
        .iter()
        .enumerate()
        .find_map(|(i, f)| f.as_ref().map(|f| (i, f)))
    else {
        return feats;
    };

    let mut prev = blur5(first.view());
    let mut prev_edges = edge_map(&prev);

    for idx in (first_idx + 1)..n {
        let Some(frame) = frames[idx].as_ref() else {
            continue;
        };
        let cur = blur5(frame.view());

        if cur.dim() != prev.dim() {
            // Resolution changed mid-sequence: restart differencing here.
            prev_edges = edge_map(&cur);
            prev = cur;
            continue;
        }

        let total = cur.len() as f64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut changed = 0usize;
        for (&a, &b) in cur.iter().zip(prev.iter()) {
            let d = a.abs_diff(b);
            let df = f64::from(d);
            sum += df;
            sum_sq += df * df;
            if d > CHANGE_THRESHOLD {
                changed += 1;
            }
        }
        let mean_diff = sum / total;
        let std_diff = (sum_sq / total - mean_diff * mean_diff).max(0.0).sqrt();
        let change_ratio = changed as f64 / total;

        let cur_edges = edge_map(&cur);
        let edge_changed = cur_edges
            .iter()
            .zip(prev_edges.iter())
            .filter(|(a, b)| a != b)
            .count();
        let edge_change_ratio = edge_changed as f64 / total;

        let intensity_std = frame_std(&cur);
        let texture_var = (laplacian_variance(&cur) / 1000.0).min(1.0);

        feats[[idx, 0]] = (mean_diff / 255.0) as f32;
        feats[[idx, 1]] = (std_diff / 255.0) as f32;
        feats[[idx, 2]] = change_ratio as f32;
        feats[[idx, 3]] = edge_change_ratio as f32;
        feats[[idx, 4]] = (intensity_std / 255.0) as f32;
        feats[[idx, 5]] = texture_var as f32;

        prev = cur;
        prev_edges = cur_edges;
    }

    feats
}

/// Augment base features with rolling mean, rolling std and first
/// difference over [`TEMPORAL_WINDOW`] frames.
#[must_use]
pub fn build_feature_matrix(base: &Array2<f32>) -> Array2<f32> {
    let (n, m) = base.dim();
    let mut out = Array2::<f32>::zeros((n, m * 4));
    if n == 0 {
        return out;
    }

    for idx in 0..n {
        let start = idx.saturating_sub(TEMPORAL_WINDOW - 1);
        let len = (idx - start + 1) as f32;

        for col in 0..m {
            let mut sum = 0.0f32;
            for row in start..=idx {
                sum += base[[row, col]];
            }
            let mean = sum / len;

            let mut var = 0.0f32;
            for row in start..=idx {
                let d = base[[row, col]] - mean;
                var += d * d;
            }
            let std = (var / len).sqrt();

            out[[idx, col]] = base[[idx, col]];
            out[[idx, m + col]] = mean;
            out[[idx, 2 * m + col]] = std;
            if idx > 0 {
                out[[idx, 3 * m + col]] = base[[idx, col]] - base[[idx - 1, col]];
            }
        }
    }

    out
}

/// Linear-interpolated percentile, `p` in `[0, 100]`.
///
/// Empty input returns 0.
#[must_use]
pub(crate) fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// 5×5 binomial blur (separable [1 4 6 4 1]/16), edge-clamped.
fn blur5(frame: ArrayView2<'_, u8>) -> Array2<u8> {
    const K: [u32; 5] = [1, 4, 6, 4, 1];
    let (h, w) = frame.dim();
    if h == 0 || w == 0 {
        return frame.to_owned();
    }

    let clamp = |v: isize, max: usize| v.clamp(0, max as isize - 1) as usize;

    let mut horiz = Array2::<u32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, &kv) in K.iter().enumerate() {
                let sx = clamp(x as isize + k as isize - 2, w);
                acc += kv * u32::from(frame[[y, sx]]);
            }
            horiz[[y, x]] = acc / 16;
        }
    }

    let mut out = Array2::<u8>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, &kv) in K.iter().enumerate() {
                let sy = clamp(y as isize + k as isize - 2, h);
                acc += kv * horiz[[sy, x]];
            }
            out[[y, x]] = (acc / 16).min(255) as u8;
        }
    }
    out
}

/// Binary edge map from the Sobel gradient magnitude.
fn edge_map(frame: &Array2<u8>) -> Array2<bool> {
    let (h, w) = frame.dim();
    let mut edges = Array2::<bool>::from_elem((h, w), false);
    if h < 3 || w < 3 {
        return edges;
    }

    let px = |y: usize, x: usize| i32::from(frame[[y, x]]);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = px(y - 1, x + 1) + 2 * px(y, x + 1) + px(y + 1, x + 1)
                - px(y - 1, x - 1)
                - 2 * px(y, x - 1)
                - px(y + 1, x - 1);
            let gy = px(y + 1, x - 1) + 2 * px(y + 1, x) + px(y + 1, x + 1)
                - px(y - 1, x - 1)
                - 2 * px(y - 1, x)
                - px(y - 1, x + 1);
            edges[[y, x]] = gx.abs() + gy.abs() > EDGE_THRESHOLD;
        }
    }
    edges
}

fn frame_std(frame: &Array2<u8>) -> f64 {
    let n = frame.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &v in frame {
        let f = f64::from(v);
        sum += f;
        sum_sq += f * f;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Variance of the 4-neighbor Laplacian response.
fn laplacian_variance(frame: &Array2<u8>) -> f64 {
    let (h, w) = frame.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let px = |y: usize, x: usize| f64::from(frame[[y, x]]);
    let mut responses = Vec::with_capacity((h - 2) * (w - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            responses.push(px(y - 1, x) + px(y + 1, x) + px(y, x - 1) + px(y, x + 1) - 4.0 * px(y, x));
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}
