use std::f64::consts::{PI, SQRT_2};
use std::fmt;
use std::time::Instant;

use argmin::core::{CostFunction, Error as ArgminError, Executor};
use argmin::solver::neldermead::NelderMead;
use rand::Rng;
use rand::distr::Open01;
use rand_distr::{Distribution, Exp1, Gamma, Gumbel, InverseGaussian, LogNormal, StandardNormal, Weibull};
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erf, erfc};
use statrs::function::gamma::{gamma, gamma_lr, ln_gamma};

use crate::error::{Error, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;
/// Cost returned for parameter vectors whose likelihood is not finite.
const PENALTY: f64 = 1e100;

/// Catalogue of continuous families tried against LoS samples.
/// Names and shape-parameter names follow the scipy.stats conventions
/// so fitted parameters can be cross-checked there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    #[serde(rename = "expon")]
    Expon,
    #[serde(rename = "gamma")]
    Gamma,
    #[serde(rename = "lognorm")]
    LogNorm,
    #[serde(rename = "weibull_min")]
    WeibullMin,
    #[serde(rename = "norm")]
    Norm,
    #[serde(rename = "logistic")]
    Logistic,
    #[serde(rename = "gumbel_r")]
    GumbelR,
    #[serde(rename = "invgauss")]
    InvGauss,
    #[serde(rename = "fisk")]
    Fisk,
    #[serde(rename = "rayleigh")]
    Rayleigh,
    #[serde(rename = "halfnorm")]
    HalfNorm,
}

/// Standardised view of a parameter vector: `[shape?, location, scale]`.
#[derive(Debug, Clone, Copy)]
struct Params {
    shape: f64,
    loc: f64,
    scale: f64,
}

impl Family {
    pub const ALL: [Family; 11] = [
        Family::Expon,
        Family::Gamma,
        Family::LogNorm,
        Family::WeibullMin,
        Family::Norm,
        Family::Logistic,
        Family::GumbelR,
        Family::InvGauss,
        Family::Fisk,
        Family::Rayleigh,
        Family::HalfNorm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Family::Expon => "expon",
            Family::Gamma => "gamma",
            Family::LogNorm => "lognorm",
            Family::WeibullMin => "weibull_min",
            Family::Norm => "norm",
            Family::Logistic => "logistic",
            Family::GumbelR => "gumbel_r",
            Family::InvGauss => "invgauss",
            Family::Fisk => "fisk",
            Family::Rayleigh => "rayleigh",
            Family::HalfNorm => "halfnorm",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Family::Expon => "Exponential",
            Family::Gamma => "Gamma",
            Family::LogNorm => "Log-normal",
            Family::WeibullMin => "Weibull",
            Family::Norm => "Normal",
            Family::Logistic => "Logistic",
            Family::GumbelR => "Gumbel (right-skewed)",
            Family::InvGauss => "Inverse Gaussian",
            Family::Fisk => "Log-logistic",
            Family::Rayleigh => "Rayleigh",
            Family::HalfNorm => "Half-normal",
        }
    }

    pub fn from_name(name: &str) -> Option<Family> {
        Family::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn shape_names(self) -> &'static [&'static str] {
        match self {
            Family::Gamma => &["a"],
            Family::LogNorm => &["s"],
            Family::WeibullMin | Family::Fisk => &["c"],
            Family::InvGauss => &["mu"],
            _ => &[],
        }
    }

    /// Shape parameter names in order, then `location` and `scale`.
    pub fn param_names(self) -> Vec<&'static str> {
        let mut names = self.shape_names().to_vec();
        names.extend(["location", "scale"]);
        names
    }

    /// Support starts at `location`. Such families are fitted with `location = 0`.
    pub fn positive_support(self) -> bool {
        !matches!(self, Family::Norm | Family::Logistic | Family::GumbelR)
    }

    /// Number of parameters estimated from data.
    pub fn free_params(self) -> usize {
        let n = self.param_names().len();
        if self.positive_support() { n - 1 } else { n }
    }

    fn unpack(self, params: &[f64]) -> Params {
        match params {
            [shape, loc, scale] => Params { shape: *shape, loc: *loc, scale: *scale },
            [loc, scale] => Params { shape: f64::NAN, loc: *loc, scale: *scale },
            _ => Params { shape: f64::NAN, loc: f64::NAN, scale: f64::NAN },
        }
    }

    /// Parameter vector is the right length, finite, with positive scale and shape.
    pub fn check_params(self, params: &[f64]) -> Result<()> {
        let expected = self.param_names().len();
        if params.len() != expected {
            return Err(Error::config(format!(
                "{} expects {expected} parameters, got {}",
                self.name(),
                params.len()
            )));
        }
        if params.iter().any(|p| !p.is_finite()) {
            return Err(Error::config(format!("{} parameters must be finite", self.name())));
        }
        let p = self.unpack(params);
        if p.scale <= 0.0 || (!self.shape_names().is_empty() && p.shape <= 0.0) {
            return Err(Error::config(format!(
                "{} shape and scale must be positive",
                self.name()
            )));
        }
        Ok(())
    }

    // ── Densities ──────────────────────────────────────────────────────────────

    pub fn ln_pdf(self, params: &[f64], x: f64) -> f64 {
        let Params { shape, loc, scale } = self.unpack(params);
        let z = (x - loc) / scale;
        standard_ln_pdf(self, shape, z) - scale.ln()
    }

    pub fn pdf(self, params: &[f64], x: f64) -> f64 {
        self.ln_pdf(params, x).exp()
    }

    pub fn cdf(self, params: &[f64], x: f64) -> f64 {
        let Params { shape, loc, scale } = self.unpack(params);
        standard_cdf(self, shape, (x - loc) / scale)
    }

    // ── Moments ────────────────────────────────────────────────────────────────

    pub fn mean(self, params: &[f64]) -> f64 {
        let Params { shape, loc, scale } = self.unpack(params);
        loc + scale * standard_moments(self, shape).0
    }

    pub fn std(self, params: &[f64]) -> f64 {
        let Params { shape, scale, .. } = self.unpack(params);
        scale * standard_moments(self, shape).1
    }

    // ── Sampling ───────────────────────────────────────────────────────────────

    /// Draw one value. Invalid parameters yield NaN rather than panicking;
    /// the caller decides whether a non-numeric draw is fatal.
    pub fn sample(self, params: &[f64], rng: &mut impl Rng) -> f64 {
        let Params { shape, loc, scale } = self.unpack(params);
        let z: f64 = match self {
            Family::Expon => rng.sample(Exp1),
            Family::Gamma => Gamma::new(shape, 1.0).map_or(f64::NAN, |d| d.sample(rng)),
            Family::LogNorm => LogNormal::new(0.0, shape).map_or(f64::NAN, |d| d.sample(rng)),
            Family::WeibullMin => Weibull::new(1.0, shape).map_or(f64::NAN, |d| d.sample(rng)),
            Family::Norm => rng.sample(StandardNormal),
            Family::Logistic => {
                let u: f64 = rng.sample(Open01);
                (u / (1.0 - u)).ln()
            }
            Family::GumbelR => Gumbel::new(0.0, 1.0).map_or(f64::NAN, |d| d.sample(rng)),
            Family::InvGauss => {
                InverseGaussian::new(shape, 1.0).map_or(f64::NAN, |d| d.sample(rng))
            }
            Family::Fisk => {
                let u: f64 = rng.sample(Open01);
                (u / (1.0 - u)).powf(1.0 / shape)
            }
            Family::Rayleigh => {
                let u: f64 = rng.sample(Open01);
                (-2.0 * u.ln()).sqrt()
            }
            Family::HalfNorm => {
                let n: f64 = rng.sample(StandardNormal);
                n.abs()
            }
        };
        loc + scale * z
    }

    // ── Estimation ─────────────────────────────────────────────────────────────

    /// Maximum-likelihood parameters for `data`, as `[shapes.., location, scale]`.
    ///
    /// Closed forms are used where they exist; the remaining families minimise
    /// the negative log-likelihood with Nelder-Mead over log-transformed
    /// positive parameters.
    pub fn estimate(self, data: &[f64], budget: &FitBudget) -> Result<Vec<f64>> {
        if data.len() < 2 {
            return Err(Error::Optimizer(format!("{}: too few points", self.name())));
        }
        if self.positive_support() && data.iter().any(|&x| x <= 0.0) {
            return Err(Error::Optimizer(format!(
                "{}: sample contains non-positive values",
                self.name()
            )));
        }
        let n = data.len() as f64;
        let (m, sd) = mean_std(data);
        if sd <= 0.0 {
            return Err(Error::Optimizer(format!("{}: sample has zero spread", self.name())));
        }

        let params = match self {
            Family::Expon => vec![0.0, m],
            Family::LogNorm => {
                let logs: Vec<f64> = data.iter().map(|x| x.ln()).collect();
                let (mu, s) = mean_std(&logs);
                vec![s, 0.0, mu.exp()]
            }
            Family::Norm => vec![m, sd],
            Family::InvGauss => {
                let inv_sum: f64 = data.iter().map(|x| 1.0 / x - 1.0 / m).sum();
                let lambda = n / inv_sum;
                vec![m / lambda, 0.0, lambda]
            }
            Family::Rayleigh => {
                let sq: f64 = data.iter().map(|x| x * x).sum();
                vec![0.0, (sq / (2.0 * n)).sqrt()]
            }
            Family::HalfNorm => {
                let sq: f64 = data.iter().map(|x| x * x).sum();
                vec![0.0, (sq / n).sqrt()]
            }
            Family::Gamma | Family::WeibullMin | Family::Fisk | Family::Logistic | Family::GumbelR => {
                self.nelder_mead(data, m, sd, budget)?
            }
        };
        self.check_params(&params)
            .map_err(|e| Error::Optimizer(format!("{}: {e}", self.name())))?;
        Ok(params)
    }

    fn initial_guess(self, data: &[f64], m: f64, sd: f64) -> Vec<f64> {
        match self {
            Family::Gamma => vec![(m * m / (sd * sd)).ln(), (sd * sd / m).ln()],
            Family::WeibullMin => {
                let c = (sd / m).powf(-1.086).clamp(0.1, 50.0);
                vec![c.ln(), (m / gamma(1.0 + 1.0 / c)).ln()]
            }
            Family::Fisk => {
                let mut sorted = data.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let median = sorted[sorted.len() / 2];
                vec![3.0_f64.ln(), median.ln()]
            }
            Family::Logistic => vec![m, (sd * 3.0_f64.sqrt() / PI).ln()],
            Family::GumbelR => {
                let beta = sd * 6.0_f64.sqrt() / PI;
                vec![m - EULER_GAMMA * beta, beta.ln()]
            }
            _ => Vec::new(),
        }
    }

    /// Map an unconstrained optimiser vector back to `[shapes.., location, scale]`.
    fn constrain(self, theta: &[f64]) -> Vec<f64> {
        match (self, theta) {
            (Family::Gamma | Family::WeibullMin | Family::Fisk, [ln_shape, ln_scale]) => {
                vec![ln_shape.exp(), 0.0, ln_scale.exp()]
            }
            (Family::Logistic | Family::GumbelR, [loc, ln_scale]) => vec![*loc, ln_scale.exp()],
            _ => vec![f64::NAN; self.param_names().len()],
        }
    }

    fn nelder_mead(self, data: &[f64], m: f64, sd: f64, budget: &FitBudget) -> Result<Vec<f64>> {
        let initial = self.initial_guess(data, m, sd);
        let mut vertices = vec![initial.clone()];
        for i in 0..initial.len() {
            let mut vertex = initial.clone();
            vertex[i] += 0.1 * vertex[i].abs().max(1.0);
            vertices.push(vertex);
        }

        let solver = NelderMead::new(vertices)
            .with_sd_tolerance(budget.sd_tolerance)
            .map_err(|e| Error::Optimizer(format!("{}: {e}", self.name())))?;
        let problem = NegLogLikelihood {
            family: self,
            data: data.to_vec(),
            deadline: budget.deadline,
        };
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(budget.max_iterations))
            .run()
            .map_err(|e| Error::Optimizer(format!("{}: {e}", self.name())))?;

        let state = result.state();
        if !state.best_cost.is_finite() || state.best_cost >= PENALTY {
            return Err(Error::Optimizer(format!("{}: no finite likelihood", self.name())));
        }
        let theta = state.best_param.clone().unwrap_or(initial);
        Ok(self.constrain(&theta))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Limits applied to a single family's iterative fit.
#[derive(Debug, Clone, Copy)]
pub struct FitBudget {
    /// Wall-clock instant after which the fit is abandoned.
    pub deadline: Option<Instant>,
    pub max_iterations: u64,
    pub sd_tolerance: f64,
}

impl Default for FitBudget {
    fn default() -> Self {
        FitBudget { deadline: None, max_iterations: 2_000, sd_tolerance: 1e-9 }
    }
}

struct NegLogLikelihood {
    family: Family,
    data: Vec<f64>,
    deadline: Option<Instant>,
}

impl CostFunction for NegLogLikelihood {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        if let Some(deadline) = self.deadline
            && Instant::now() > deadline
        {
            return Err(ArgminError::msg("fit timed out"));
        }
        let params = self.family.constrain(theta);
        if self.family.check_params(&params).is_err() {
            return Ok(PENALTY);
        }
        let ll: f64 = self.data.iter().map(|&x| self.family.ln_pdf(&params, x)).sum();
        Ok(if ll.is_finite() { -ll } else { PENALTY })
    }
}

fn standard_ln_pdf(family: Family, shape: f64, z: f64) -> f64 {
    let positive_only = |f: &dyn Fn(f64) -> f64| if z > 0.0 { f(z) } else { f64::NEG_INFINITY };
    match family {
        Family::Expon => if z >= 0.0 { -z } else { f64::NEG_INFINITY },
        Family::Gamma => positive_only(&|z| (shape - 1.0) * z.ln() - z - ln_gamma(shape)),
        Family::LogNorm => positive_only(&|z| {
            let lz = z.ln();
            -lz - shape.ln() - LN_SQRT_2PI - lz * lz / (2.0 * shape * shape)
        }),
        Family::WeibullMin => {
            positive_only(&|z| shape.ln() + (shape - 1.0) * z.ln() - z.powf(shape))
        }
        Family::Norm => -0.5 * z * z - LN_SQRT_2PI,
        Family::Logistic => {
            let a = z.abs();
            -a - 2.0 * (-a).exp().ln_1p()
        }
        Family::GumbelR => -z - (-z).exp(),
        Family::InvGauss => positive_only(&|z| {
            -0.5 * (2.0 * PI * z * z * z).ln() - (z - shape).powi(2) / (2.0 * shape * shape * z)
        }),
        Family::Fisk => positive_only(&|z| {
            shape.ln() + (shape - 1.0) * z.ln() - 2.0 * z.powf(shape).ln_1p()
        }),
        Family::Rayleigh => positive_only(&|z| z.ln() - 0.5 * z * z),
        Family::HalfNorm => {
            if z >= 0.0 { 0.5 * (2.0 / PI).ln() - 0.5 * z * z } else { f64::NEG_INFINITY }
        }
    }
}

fn std_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

fn standard_cdf(family: Family, shape: f64, z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    match family {
        Family::Norm => std_normal_cdf(z),
        Family::Logistic => 1.0 / (1.0 + (-z).exp()),
        Family::GumbelR => (-(-z).exp()).exp(),
        _ if z <= 0.0 => 0.0,
        _ if z == f64::INFINITY => 1.0,
        Family::Expon => -(-z).exp_m1(),
        Family::Gamma => gamma_lr(shape, z),
        Family::LogNorm => std_normal_cdf(z.ln() / shape),
        Family::WeibullMin => -(-z.powf(shape)).exp_m1(),
        Family::InvGauss => {
            let root = z.sqrt();
            let first = std_normal_cdf((z / shape - 1.0) / root);
            let tail = std_normal_cdf(-(z / shape + 1.0) / root);
            let second = if tail > 0.0 { (2.0 / shape + tail.ln()).exp() } else { 0.0 };
            (first + if second.is_finite() { second } else { 0.0 }).min(1.0)
        }
        Family::Fisk => 1.0 / (1.0 + z.powf(-shape)),
        Family::Rayleigh => -(-0.5 * z * z).exp_m1(),
        Family::HalfNorm => erf(z / SQRT_2),
    }
}

/// `(mean, std)` of the standardised family (location 0, scale 1).
/// Infinite or undefined moments come back as infinity or NaN.
fn standard_moments(family: Family, shape: f64) -> (f64, f64) {
    match family {
        Family::Expon => (1.0, 1.0),
        Family::Gamma => (shape, shape.sqrt()),
        Family::LogNorm => {
            let w = (shape * shape).exp();
            (w.sqrt(), ((w - 1.0) * w).sqrt())
        }
        Family::WeibullMin => {
            let g1 = gamma(1.0 + 1.0 / shape);
            let g2 = gamma(1.0 + 2.0 / shape);
            (g1, (g2 - g1 * g1).max(0.0).sqrt())
        }
        Family::Norm => (0.0, 1.0),
        Family::Logistic => (0.0, PI / 3.0_f64.sqrt()),
        Family::GumbelR => (EULER_GAMMA, PI / 6.0_f64.sqrt()),
        Family::InvGauss => (shape, shape.powi(3).sqrt()),
        Family::Fisk => {
            let b = PI / shape;
            let mean = if shape > 1.0 { b / b.sin() } else { f64::INFINITY };
            let sd = if shape > 2.0 {
                (2.0 * b / (2.0 * b).sin() - mean * mean).max(0.0).sqrt()
            } else {
                f64::INFINITY
            };
            (mean, sd)
        }
        Family::Rayleigh => ((PI / 2.0).sqrt(), ((4.0 - PI) / 2.0).sqrt()),
        Family::HalfNorm => ((2.0 / PI).sqrt(), (1.0 - 2.0 / PI).sqrt()),
    }
}

/// Population mean and standard deviation (ddof = 0).
pub fn mean_std(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// A family with fitted parameters and its goodness-of-fit against the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedDistribution {
    pub family: Family,
    /// `[shapes.., location, scale]`, matching `family.param_names()`.
    pub params: Vec<f64>,
    pub sse: f64,
    pub aic: f64,
    pub bic: f64,
    pub ks_pvalue: f64,
    pub mean: f64,
    pub std: f64,
}

impl FittedDistribution {
    pub fn param_names(&self) -> Vec<&'static str> {
        self.family.param_names()
    }

    pub fn named_params(&self) -> Vec<(&'static str, f64)> {
        self.param_names().into_iter().zip(self.params.iter().copied()).collect()
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        self.family.sample(&self.params, rng)
    }
}

/// Length-of-stay model attached to a cohort for simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LosModel {
    /// A candidate chosen from the fitter's ranked output.
    Fitted(FittedDistribution),
    /// Degenerate distribution: every patient stays exactly `days`.
    Constant { days: f64 },
}

impl LosModel {
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        match self {
            LosModel::Fitted(dist) => dist.sample(rng),
            LosModel::Constant { days } => *days,
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            LosModel::Fitted(dist) => dist.mean,
            LosModel::Constant { days } => *days,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            LosModel::Fitted(dist) => dist.family.check_params(&dist.params),
            LosModel::Constant { days } if days.is_finite() && *days >= 0.0 => Ok(()),
            LosModel::Constant { days } => {
                Err(Error::config(format!("constant length of stay must be >= 0, got {days}")))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LosModel::Fitted(dist) => {
                let params: Vec<String> = dist
                    .named_params()
                    .iter()
                    .map(|(name, v)| format!("{name}={v:.4}"))
                    .collect();
                format!("{}({})", dist.family, params.join(", "))
            }
            LosModel::Constant { days } => format!("constant({days})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    fn draws(family: Family, params: &[f64], n: usize) -> Vec<f64> {
        let mut rng = rng();
        (0..n).map(|_| family.sample(params, &mut rng)).collect()
    }

    fn typical_params(family: Family) -> Vec<f64> {
        match family {
            Family::Gamma => vec![2.5, 0.0, 3.0],
            Family::LogNorm => vec![0.6, 0.0, 5.0],
            Family::WeibullMin => vec![1.5, 0.0, 6.0],
            Family::InvGauss => vec![0.5, 0.0, 10.0],
            Family::Fisk => vec![6.0, 0.0, 5.0],
            Family::Norm | Family::Logistic | Family::GumbelR => vec![8.0, 2.0],
            Family::Expon | Family::Rayleigh | Family::HalfNorm => vec![0.0, 4.0],
        }
    }

    // ── Catalogue ─────────────────────────────────────────────────────────────

    #[test]
    fn param_names_end_with_location_and_scale() {
        assert_eq!(Family::Gamma.param_names(), vec!["a", "location", "scale"]);
        assert_eq!(Family::WeibullMin.param_names(), vec!["c", "location", "scale"]);
        assert_eq!(Family::Norm.param_names(), vec!["location", "scale"]);
        for family in Family::ALL {
            let names = family.param_names();
            assert_eq!(&names[names.len() - 2..], &["location", "scale"], "{family}");
        }
    }

    #[test]
    fn names_round_trip() {
        for family in Family::ALL {
            assert_eq!(Family::from_name(family.name()), Some(family));
            let json = serde_json::to_string(&family).unwrap();
            assert_eq!(json, format!("\"{}\"", family.name()));
        }
        assert_eq!(Family::from_name("cauchy"), None);
    }

    // ── Densities and moments ─────────────────────────────────────────────────

    #[test]
    fn pdf_integrates_to_cdf() {
        for family in Family::ALL {
            let params = typical_params(family);
            let (lo, hi) = (2.0, 9.0);
            let steps = 20_000;
            let h = (hi - lo) / steps as f64;
            let area: f64 = (0..steps)
                .map(|i| family.pdf(&params, lo + (i as f64 + 0.5) * h) * h)
                .sum();
            let expected = family.cdf(&params, hi) - family.cdf(&params, lo);
            assert!(
                (area - expected).abs() < 1e-4,
                "{family}: integral {area} vs cdf difference {expected}"
            );
        }
    }

    #[test]
    fn sample_moments_match_closed_form() {
        for family in Family::ALL {
            let params = typical_params(family);
            let xs = draws(family, &params, 40_000);
            let (m, sd) = mean_std(&xs);
            let mean = family.mean(&params);
            let std = family.std(&params);
            assert!((m - mean).abs() < 0.05 * std.max(1.0), "{family}: mean {m} vs {mean}");
            assert!((sd - std).abs() < 0.08 * std, "{family}: std {sd} vs {std}");
        }
    }

    #[test]
    fn gamma_cdf_matches_exponential_at_shape_one() {
        let g = [1.0, 0.0, 2.0];
        let e = [0.0, 2.0];
        for x in [0.1, 1.0, 3.0, 10.0] {
            assert!((Family::Gamma.cdf(&g, x) - Family::Expon.cdf(&e, x)).abs() < 1e-10);
        }
    }

    // ── Estimation ────────────────────────────────────────────────────────────

    #[test]
    fn estimates_recover_generating_parameters() {
        for family in [Family::Gamma, Family::LogNorm, Family::WeibullMin, Family::Expon, Family::Norm] {
            let truth = typical_params(family);
            let xs = draws(family, &truth, 5_000);
            let fitted = family.estimate(&xs, &FitBudget::default()).unwrap();
            for ((name, t), f) in family.param_names().iter().zip(&truth).zip(&fitted) {
                let tol = 0.1 * t.abs().max(1.0);
                assert!((t - f).abs() < tol, "{family} {name}: true {t}, fitted {f}");
            }
        }
    }

    #[test]
    fn positive_families_reject_non_positive_samples() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        assert!(Family::Gamma.estimate(&xs, &FitBudget::default()).is_err());
        assert!(Family::Norm.estimate(&xs, &FitBudget::default()).is_ok());
    }

    #[test]
    fn expired_deadline_excludes_iterative_family() {
        let xs = draws(Family::Gamma, &typical_params(Family::Gamma), 200);
        let budget = FitBudget { deadline: Some(Instant::now()), ..FitBudget::default() };
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(Family::Gamma.estimate(&xs, &budget).is_err());
        // Closed-form families never consult the deadline.
        assert!(Family::Expon.estimate(&xs, &budget).is_ok());
    }

    // ── LoS model ─────────────────────────────────────────────────────────────

    #[test]
    fn constant_model_always_returns_days() {
        let model = LosModel::Constant { days: 2.0 };
        let mut rng = rng();
        assert!((0..100).all(|_| model.sample(&mut rng) == 2.0));
        assert!(LosModel::Constant { days: -1.0 }.validate().is_err());
    }

    #[test]
    fn los_model_json_is_tagged() {
        let model = LosModel::Constant { days: 2.0 };
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#"{"kind":"constant","days":2.0}"#);
    }

    #[test]
    fn invalid_params_sample_nan() {
        let mut rng = rng();
        assert!(Family::Gamma.sample(&[-1.0, 0.0, 1.0], &mut rng).is_nan());
        assert!(Family::Gamma.check_params(&[-1.0, 0.0, 1.0]).is_err());
        assert!(Family::Gamma.check_params(&[1.0, 1.0]).is_err());
    }
}
