//! One-dimensional Gaussian mixture model fitted by expectation-maximization.
//!
//! The mixture describes a population of object sizes as K weighted normal
//! components. Fitting follows the usual recipe:
//!
//! 1. k-means++ seeding and Lloyd iterations give hard initial assignments
//! 2. an M-step turns the assignments into (mean, variance, weight)
//! 3. E-step / M-step alternate until the mean log-likelihood changes by less
//!    than `tol`, or `max_iter` is reached
//!
//! All randomness comes from a `StdRng` seeded with `config.seed`, so a fit is
//! exactly reproducible for identical input and configuration.

use crate::error::{Result, SegError};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Configuration for Gaussian mixture fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmmConfig {
    /// Number of mixture components.
    pub n_components: usize,
    /// Maximum EM iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the mean log-likelihood.
    pub tol: f64,
    /// Non-negative regularization added to every variance.
    pub reg_covar: f64,
    /// Maximum Lloyd iterations during initialization.
    pub max_kmeans_iter: usize,
    /// Random seed for the initialization.
    pub seed: u64,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            n_components: 1,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            max_kmeans_iter: 300,
            seed: 0,
        }
    }
}

impl GmmConfig {
    /// Create a config for `n_components` components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Default::default()
        }
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

/// A single fitted normal component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub mean: f64,
    pub variance: f64,
    pub weight: f64,
}

impl GaussianComponent {
    /// Standard deviation of the component.
    #[inline]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Unweighted normal density at `x`.
    #[inline]
    pub fn pdf(&self, x: f64) -> f64 {
        (-0.5 * (x - self.mean).powi(2) / self.variance).exp() / (2.0 * PI * self.variance).sqrt()
    }

    #[inline]
    fn log_pdf(&self, x: f64) -> f64 {
        -0.5 * ((2.0 * PI * self.variance).ln() + (x - self.mean).powi(2) / self.variance)
    }
}

/// A fitted mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureFit {
    /// Components in the order produced by the initialization.
    pub components: Vec<GaussianComponent>,
    /// Mean per-observation log-likelihood at the final iteration.
    pub log_likelihood: f64,
    /// Number of EM iterations run.
    pub iterations: usize,
    /// Whether the tolerance was reached before `max_iter`.
    pub converged: bool,
    /// Number of observations the model was fitted to.
    pub n_observations: usize,
}

impl MixtureFit {
    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn means(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.mean).collect()
    }

    pub fn variances(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.variance).collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.weight).collect()
    }

    /// Mixture density at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        self.components.iter().map(|c| c.weight * c.pdf(x)).sum()
    }
}

impl std::fmt::Display for MixtureFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Gaussian Mixture ({} components)", self.n_components())?;
        for (i, c) in self.components.iter().enumerate() {
            writeln!(
                f,
                "  [{}] mean={:.4} sd={:.4} weight={:.3}",
                i,
                c.mean,
                c.std_dev(),
                c.weight
            )?;
        }
        writeln!(f, "  Log-likelihood: {:.4}", self.log_likelihood)?;
        writeln!(
            f,
            "  Iterations: {} ({})",
            self.iterations,
            if self.converged { "converged" } else { "not converged" }
        )?;
        Ok(())
    }
}

/// Fit a Gaussian mixture to one-dimensional observations.
///
/// # Errors
/// * `InvalidParameter` for zero components or a negative `reg_covar`
/// * `Fit` when there are no observations, any observation is not finite,
///   there are fewer distinct values than components, or the likelihood
///   becomes non-finite
pub fn fit_gmm(data: &[f64], config: &GmmConfig) -> Result<MixtureFit> {
    let k = config.n_components;
    if k == 0 {
        return Err(SegError::InvalidParameter(
            "Mixture model needs at least one component".to_string(),
        ));
    }
    if config.reg_covar < 0.0 {
        return Err(SegError::InvalidParameter(
            "reg_covar must be non-negative".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(SegError::Fit("no observations to fit".to_string()));
    }
    if data.iter().any(|x| !x.is_finite()) {
        return Err(SegError::Fit("observations must be finite".to_string()));
    }

    let n_distinct = count_distinct(data);
    if n_distinct < k {
        return Err(SegError::Fit(format!(
            "{} distinct observations cannot support {} components",
            n_distinct, k
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let labels = kmeans_labels(data, k, config.max_kmeans_iter, &mut rng);

    let mut resp = vec![0.0; data.len() * k];
    for (i, &label) in labels.iter().enumerate() {
        resp[i * k + label] = 1.0;
    }
    let mut components = m_step(data, &resp, k, config.reg_covar);

    let mut log_likelihood = f64::NEG_INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config.max_iter {
        iterations = iter;
        let prev = log_likelihood;

        log_likelihood = e_step(data, &components, &mut resp);
        if !log_likelihood.is_finite() {
            return Err(SegError::Fit(format!(
                "log-likelihood became non-finite at iteration {}",
                iter
            )));
        }
        components = m_step(data, &resp, k, config.reg_covar);

        if (log_likelihood - prev).abs() < config.tol {
            converged = true;
            break;
        }
    }

    if components
        .iter()
        .any(|c| !c.mean.is_finite() || !c.variance.is_finite() || c.variance <= 0.0)
    {
        return Err(SegError::Fit("degenerate mixture component".to_string()));
    }

    if converged {
        debug!(
            "Mixture with {} components converged after {} iterations (mean log-likelihood {:.4})",
            k, iterations, log_likelihood
        );
    } else {
        warn!(
            "Mixture with {} components did not converge within {} iterations; keeping last estimate",
            k, config.max_iter
        );
    }

    Ok(MixtureFit {
        components,
        log_likelihood,
        iterations,
        converged,
        n_observations: data.len(),
    })
}

/// Responsibilities in place; returns the mean log-likelihood.
///
/// Rows are evaluated in parallel but summed in order so the result does not
/// depend on how the work was split.
fn e_step(data: &[f64], components: &[GaussianComponent], resp: &mut [f64]) -> f64 {
    let k = components.len();
    let row_lse: Vec<f64> = resp
        .par_chunks_mut(k)
        .zip(data.par_iter())
        .map(|(row, &x)| {
            for (r, c) in row.iter_mut().zip(components) {
                *r = c.weight.ln() + c.log_pdf(x);
            }
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lse = max + row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
            for r in row.iter_mut() {
                *r = (*r - lse).exp();
            }
            lse
        })
        .collect();
    row_lse.iter().sum::<f64>() / data.len() as f64
}

/// Component parameters from responsibilities.
fn m_step(data: &[f64], resp: &[f64], k: usize, reg_covar: f64) -> Vec<GaussianComponent> {
    let n = data.len() as f64;
    (0..k)
        .map(|j| {
            let nk: f64 = resp.iter().skip(j).step_by(k).sum::<f64>() + 10.0 * f64::EPSILON;
            let mean = data
                .iter()
                .enumerate()
                .map(|(i, &x)| resp[i * k + j] * x)
                .sum::<f64>()
                / nk;
            let variance = data
                .iter()
                .enumerate()
                .map(|(i, &x)| resp[i * k + j] * (x - mean).powi(2))
                .sum::<f64>()
                / nk
                + reg_covar;
            GaussianComponent {
                mean,
                variance,
                weight: nk / n,
            }
        })
        .collect()
}

/// Hard cluster assignments from k-means++ seeding and Lloyd iterations.
fn kmeans_labels(data: &[f64], k: usize, max_iter: usize, rng: &mut StdRng) -> Vec<usize> {
    if k == 1 {
        return vec![0; data.len()];
    }

    let mut centers = kmeans_plus_plus(data, k, rng);
    let mut labels = vec![usize::MAX; data.len()];

    for _ in 0..max_iter {
        let mut changed = false;
        for (label, &x) in labels.iter_mut().zip(data) {
            let nearest = nearest_center(&centers, x);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&label, &x) in labels.iter().zip(data) {
            sums[label] += x;
            counts[label] += 1;
        }
        for j in 0..k {
            // empty clusters keep their previous center
            if counts[j] > 0 {
                centers[j] = sums[j] / counts[j] as f64;
            }
        }
    }

    labels
}

fn kmeans_plus_plus(data: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut centers = Vec::with_capacity(k);
    centers.push(data[rng.gen_range(0..data.len())]);

    let mut dist2: Vec<f64> = data.iter().map(|&x| (x - centers[0]).powi(2)).collect();
    while centers.len() < k {
        let total: f64 = dist2.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut chosen = data.len() - 1;
            for (i, &d) in dist2.iter().enumerate() {
                acc += d;
                if acc >= target && d > 0.0 {
                    chosen = i;
                    break;
                }
            }
            data[chosen]
        } else {
            data[rng.gen_range(0..data.len())]
        };
        centers.push(next);
        for (d, &x) in dist2.iter_mut().zip(data) {
            *d = d.min((x - next).powi(2));
        }
    }
    centers
}

#[inline]
fn nearest_center(centers: &[f64], x: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, &c) in centers.iter().enumerate() {
        let d = (x - c).abs();
        if d < best_dist {
            best = j;
            best_dist = d;
        }
    }
    best
}

fn count_distinct(data: &[f64]) -> usize {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len()
}
