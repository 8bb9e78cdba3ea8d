//! Lawson–Hanson active-set non-negative least squares.
//!
//! Solves `min ‖Σ cᵢ·eᵢ − p‖²` subject to `cᵢ ≥ 0` for one pixel `p` against
//! a fixed endmember set `{eᵢ}`. The Gram matrix `G = E Eᵀ` is computed once
//! per endmember set; each pixel then only needs `h = E p` and small dense
//! solves on the passive set.

/// Relative pivot below which a passive-set system is treated as singular.
const SINGULAR_PIVOT: f64 = 1e-12;
/// Coefficients at or below this are returned to the active (zero) set.
const ZERO_COEFF: f64 = 1e-14;

/// Precomputed normal-equation data for one endmember set.
#[derive(Debug, Clone)]
pub struct NnlsSystem {
    spectra: Vec<Vec<f64>>,
    gram: Vec<f64>,
    n: usize,
    /// Endmembers with zero energy; they can never enter the solution.
    degenerate: Vec<bool>,
}

impl NnlsSystem {
    /// `spectra` are the endmember rows; all must share one length.
    pub fn new(spectra: Vec<Vec<f64>>) -> Self {
        let n = spectra.len();
        let mut gram = vec![0.0; n * n];
        for i in 0..n {
            for j in i..n {
                let g = dot(&spectra[i], &spectra[j]);
                gram[i * n + j] = g;
                gram[j * n + i] = g;
            }
        }
        let degenerate = (0..n).map(|i| gram[i * n + i] <= 0.0).collect();
        Self {
            spectra,
            gram,
            n,
            degenerate,
        }
    }

    /// Non-negative coefficients for one pixel.
    pub fn solve(&self, pixel: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut x = vec![0.0; n];
        let h: Vec<f64> = self.spectra.iter().map(|e| dot(e, pixel)).collect();

        // All-zero pixels (and pixels anti-aligned with every endmember) stay
        // at the origin.
        let h_max = h.iter().cloned().fold(0.0, f64::max);
        if !(h_max > 0.0) {
            return x;
        }
        let tol = 1e-10 * h_max;

        let mut passive = vec![false; n];
        let mut excluded = self.degenerate.clone();
        let max_iter = 3 * n + 10;

        for _ in 0..max_iter {
            let w = self.gradient(&h, &x);
            let entering = (0..n)
                .filter(|&j| !passive[j] && !excluded[j] && w[j] > tol)
                .max_by(|&a, &b| w[a].total_cmp(&w[b]));
            let Some(t) = entering else { break };
            passive[t] = true;

            for _ in 0..max_iter {
                let set: Vec<usize> = (0..n).filter(|&j| passive[j]).collect();
                let Some(z) = self.solve_subsystem(&set, &h) else {
                    // `t` is linearly dependent on the current passive set.
                    passive[t] = false;
                    excluded[t] = true;
                    break;
                };

                if z.iter().all(|&v| v > 0.0) {
                    for (k, &j) in set.iter().enumerate() {
                        x[j] = z[k];
                    }
                    break;
                }

                // Step from x towards z until the first coefficient hits zero.
                let mut alpha = f64::INFINITY;
                for (k, &j) in set.iter().enumerate() {
                    if z[k] <= 0.0 {
                        let d = x[j] - z[k];
                        let ratio = if d > 0.0 { x[j] / d } else { 0.0 };
                        alpha = alpha.min(ratio);
                    }
                }
                for (k, &j) in set.iter().enumerate() {
                    x[j] += alpha * (z[k] - x[j]);
                }
                for &j in &set {
                    if x[j] <= ZERO_COEFF {
                        x[j] = 0.0;
                        passive[j] = false;
                    }
                }
                if !passive.iter().any(|&p| p) {
                    break;
                }
            }
        }

        for v in &mut x {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        x
    }

    /// w = h − G x
    fn gradient(&self, h: &[f64], x: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|j| {
                let gx: f64 = (0..self.n).map(|k| self.gram[j * self.n + k] * x[k]).sum();
                h[j] - gx
            })
            .collect()
    }

    /// Solve `G[set, set] z = h[set]` by Gaussian elimination with partial
    /// pivoting. `None` if the subsystem is singular.
    fn solve_subsystem(&self, set: &[usize], h: &[f64]) -> Option<Vec<f64>> {
        let m = set.len();
        // Augmented matrix, row-major, m × (m + 1).
        let mut a = vec![0.0; m * (m + 1)];
        let mut scale = 0.0f64;
        for (r, &i) in set.iter().enumerate() {
            for (c, &j) in set.iter().enumerate() {
                a[r * (m + 1) + c] = self.gram[i * self.n + j];
            }
            a[r * (m + 1) + m] = h[i];
            scale = scale.max(self.gram[i * self.n + i]);
        }

        for col in 0..m {
            let entry = |row: usize| a[row * (m + 1) + col].abs();
            let pivot_row = (col..m).max_by(|&p, &q| entry(p).total_cmp(&entry(q)))?;
            let pivot = a[pivot_row * (m + 1) + col];
            if pivot.abs() <= SINGULAR_PIVOT * scale {
                return None;
            }
            if pivot_row != col {
                for c in 0..=m {
                    a.swap(col * (m + 1) + c, pivot_row * (m + 1) + c);
                }
            }
            for r in (col + 1)..m {
                let f = a[r * (m + 1) + col] / pivot;
                if f != 0.0 {
                    for c in col..=m {
                        a[r * (m + 1) + c] -= f * a[col * (m + 1) + c];
                    }
                }
            }
        }

        let mut z = vec![0.0; m];
        for r in (0..m).rev() {
            let mut acc = a[r * (m + 1) + m];
            for c in (r + 1)..m {
                acc -= a[r * (m + 1) + c] * z[c];
            }
            z[r] = acc / a[r * (m + 1) + r];
        }
        Some(z)
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// One-shot solve for a single pixel.
pub fn nnls(spectra: &[Vec<f64>], pixel: &[f64]) -> Vec<f64> {
    NnlsSystem::new(spectra.to_vec()).solve(pixel)
}
