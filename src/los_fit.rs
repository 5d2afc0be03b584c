use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::FitConfig;
use crate::distributions::{Family, FitBudget, FittedDistribution, mean_std};
use crate::error::{Error, Result};
use crate::types::AgeCohort;

/// Drop samples whose z-score magnitude reaches `z_threshold`, repeating
/// until a pass removes nothing. The result is therefore a fixed point:
/// filtering it again is a no-op.
///
/// A sample with zero spread has no outliers.
pub fn reject_outliers(samples: &[f64], z_threshold: f64) -> Vec<f64> {
    let mut kept: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite()).collect();
    loop {
        let (mean, sd) = mean_std(&kept);
        if kept.is_empty() || sd == 0.0 {
            return kept;
        }
        let before = kept.len();
        kept.retain(|x| ((x - mean) / sd).abs() < z_threshold);
        if kept.len() == before {
            return kept;
        }
    }
}

/// Fit every catalogue family to one cohort's LoS sample and return the
/// best `top_n` by histogram SSE, ascending.
///
/// Families that fail to converge, run past the timeout or have an
/// implausible mean/std are dropped without failing the call. An empty
/// result means no family was acceptable.
pub fn fit_los(samples: &[f64], cohort: AgeCohort, config: &FitConfig) -> Result<Vec<FittedDistribution>> {
    config.validate()?;
    let data = reject_outliers(samples, config.z_threshold);
    if data.is_empty() {
        return Err(Error::EmptySample);
    }
    let removed = samples.len() - data.len();
    let (_, sample_std) = mean_std(&data);
    let histogram = Histogram::density(&data, config.histogram_bins);

    let mut candidates: Vec<FittedDistribution> = Family::ALL
        .par_iter()
        .filter_map(|&family| fit_family(family, &data, &histogram, config))
        .collect();

    candidates.sort_by(|a, b| a.sse.total_cmp(&b.sse));
    candidates.retain(|c| {
        let plausible = has_plausible_moments(c, sample_std, config.std_band);
        if !plausible {
            debug!(%cohort, family = %c.family, mean = c.mean, std = c.std, "implausible moments, excluded");
        }
        plausible
    });
    candidates.truncate(config.top_n);

    if candidates.is_empty() {
        warn!(%cohort, n = data.len(), "no acceptable length-of-stay distribution");
    } else {
        info!(
            %cohort,
            n = data.len(),
            removed,
            best = %candidates[0].family,
            sse = candidates[0].sse,
            "length-of-stay fit complete"
        );
    }
    Ok(candidates)
}

/// Positive mean and a std inside `[lo, hi] × sample_std`, bounds included.
fn has_plausible_moments(fit: &FittedDistribution, sample_std: f64, (lo, hi): (f64, f64)) -> bool {
    fit.mean > 0.0 && fit.std >= lo * sample_std && fit.std <= hi * sample_std
}

fn fit_family(
    family: Family,
    data: &[f64],
    histogram: &Histogram,
    config: &FitConfig,
) -> Option<FittedDistribution> {
    let started = Instant::now();
    let budget = FitBudget {
        deadline: Some(started + config.timeout()),
        max_iterations: config.max_iterations,
        ..FitBudget::default()
    };
    let params = match family.estimate(data, &budget) {
        Ok(p) => p,
        Err(e) => {
            debug!(%family, error = %e, "fit failed, excluded");
            return None;
        }
    };
    if started.elapsed() > config.timeout() {
        debug!(%family, "fit exceeded timeout, excluded");
        return None;
    }

    let sse = histogram.sse(|x| family.pdf(&params, x));
    if !sse.is_finite() {
        debug!(%family, "non-finite sse, excluded");
        return None;
    }
    let log_lik: f64 = data.iter().map(|&x| family.ln_pdf(&params, x)).sum();
    let k = family.free_params() as f64;
    let n = data.len() as f64;
    let fitted = FittedDistribution {
        family,
        sse,
        aic: 2.0 * k - 2.0 * log_lik,
        bic: k * n.ln() - 2.0 * log_lik,
        ks_pvalue: ks_pvalue(data, |x| family.cdf(&params, x)),
        mean: family.mean(&params),
        std: family.std(&params),
        params,
    };
    debug!(%family, sse = fitted.sse, elapsed_ms = started.elapsed().as_millis() as u64, "fitted");
    Some(fitted)
}

/// Equal-width density histogram (integrates to 1 over its range).
struct Histogram {
    centres: Vec<f64>,
    density: Vec<f64>,
}

impl Histogram {
    fn density(data: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let mut lo = data.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;
        let mut counts = vec![0usize; bins];
        for &x in data {
            let i = (((x - lo) / width) as usize).min(bins - 1);
            counts[i] += 1;
        }
        let norm = data.len() as f64 * width;
        Histogram {
            centres: (0..bins).map(|i| lo + (i as f64 + 0.5) * width).collect(),
            density: counts.iter().map(|&c| c as f64 / norm).collect(),
        }
    }

    fn sse(&self, pdf: impl Fn(f64) -> f64) -> f64 {
        self.centres
            .iter()
            .zip(&self.density)
            .map(|(&x, &y)| (pdf(x) - y).powi(2))
            .sum()
    }
}

/// Two-sided one-sample Kolmogorov–Smirnov p-value, using the asymptotic
/// Kolmogorov distribution with Stephens' small-sample correction.
pub fn ks_pvalue(data: &[f64], cdf: impl Fn(f64) -> f64) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    if sorted.is_empty() {
        return f64::NAN;
    }
    let d = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let f = cdf(x);
            (f - i as f64 / n).max((i + 1) as f64 / n - f)
        })
        .fold(0.0, f64::max);
    let root_n = n.sqrt();
    kolmogorov_survival((root_n + 0.12 + 0.11 / root_n) * d)
}

fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = (-2.0 * j * j * lambda * lambda).exp();
        sum += if j as u64 % 2 == 1 { term } else { -term };
        if term < 1e-12 {
            break;
        }
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, Gamma};

    use super::*;

    fn gamma_sample(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let dist = Gamma::new(2.0, 3.5).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    // ── Outlier rejection ─────────────────────────────────────────────────────

    #[test]
    fn removes_extreme_value() {
        let mut xs: Vec<f64> = (0..50).map(|i| 5.0 + (i % 5) as f64 * 0.1).collect();
        xs.push(500.0);
        let kept = reject_outliers(&xs, 3.0);
        assert_eq!(kept.len(), 50);
        assert!(!kept.contains(&500.0));
    }

    #[test]
    fn constant_sample_is_kept_whole() {
        let xs = vec![2.0; 10];
        assert_eq!(reject_outliers(&xs, 3.0), xs);
    }

    proptest! {
        #[test]
        fn outlier_rejection_is_idempotent(xs in prop::collection::vec(0.01f64..1_000.0, 1..300)) {
            let once = reject_outliers(&xs, 3.0);
            let twice = reject_outliers(&once, 3.0);
            prop_assert_eq!(once, twice);
        }
    }

    // ── Ranking ───────────────────────────────────────────────────────────────

    #[test]
    fn ranked_by_ascending_sse_and_truncated() {
        let xs = gamma_sample(800, 7);
        let fits = fit_los(&xs, AgeCohort::Adult, &FitConfig::default()).unwrap();
        assert!(!fits.is_empty(), "gamma data should admit at least one family");
        assert!(fits.len() <= 5);
        for pair in fits.windows(2) {
            assert!(pair[0].sse <= pair[1].sse, "{} before {}", pair[0].family, pair[1].family);
        }
        assert!(fits.iter().any(|f| f.family == Family::Gamma), "gamma missing from {fits:?}");
    }

    #[test]
    fn survivors_pass_moment_filter() {
        let xs = gamma_sample(500, 11);
        let (_, sd) = mean_std(&reject_outliers(&xs, 3.0));
        let fits = fit_los(&xs, AgeCohort::Senior, &FitConfig::default()).unwrap();
        for f in &fits {
            assert!(f.mean > 0.0);
            assert!(f.std >= 0.75 * sd && f.std <= 1.5 * sd, "{}: std {} vs sample {sd}", f.family, f.std);
            assert_eq!(f.params.len(), f.param_names().len());
            assert!((0.0..=1.0).contains(&f.ks_pvalue));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]
        #[test]
        fn output_is_non_decreasing_in_sse(seed in 0u64..1_000, n in 40usize..120) {
            let xs = gamma_sample(n, seed);
            let fits = fit_los(&xs, AgeCohort::Paediatric, &FitConfig::default()).unwrap();
            for pair in fits.windows(2) {
                prop_assert!(pair[0].sse <= pair[1].sse);
            }
        }
    }

    #[test]
    fn empty_sample_is_an_error() {
        let err = fit_los(&[], AgeCohort::Adult, &FitConfig::default()).unwrap_err();
        assert!(matches!(err, Error::EmptySample));
    }

    #[test]
    fn moment_band_keeps_its_bounds() {
        let fit = |mean: f64, std: f64| FittedDistribution {
            family: Family::Gamma,
            params: vec![2.0, 0.0, 2.0],
            sse: 0.0,
            aic: 0.0,
            bic: 0.0,
            ks_pvalue: 1.0,
            mean,
            std,
        };
        let band = (0.75, 1.5);
        assert!(has_plausible_moments(&fit(4.0, 3.0), 4.0, band));
        assert!(has_plausible_moments(&fit(4.0, 6.0), 4.0, band));
        assert!(!has_plausible_moments(&fit(4.0, 2.999), 4.0, band));
        assert!(!has_plausible_moments(&fit(4.0, 6.001), 4.0, band));
        assert!(!has_plausible_moments(&fit(0.0, 4.0), 4.0, band));
    }

    #[test]
    fn impossible_band_yields_empty_list() {
        let xs = gamma_sample(200, 3);
        let config = FitConfig { std_band: (10.0, 20.0), ..FitConfig::default() };
        let fits = fit_los(&xs, AgeCohort::Adult, &config).unwrap();
        assert!(fits.is_empty());
    }

    // ── Goodness of fit ───────────────────────────────────────────────────────

    #[test]
    fn ks_pvalue_separates_good_and_bad_fits() {
        let xs = gamma_sample(400, 5);
        let good = ks_pvalue(&xs, |x| Family::Gamma.cdf(&[2.0, 0.0, 3.5], x));
        let bad = ks_pvalue(&xs, |x| Family::Norm.cdf(&[30.0, 1.0], x));
        assert!(good > 0.001, "true model rejected: p = {good}");
        assert!(bad < 1e-6, "wrong model accepted: p = {bad}");
    }

    #[test]
    fn histogram_integrates_to_one() {
        let xs = gamma_sample(300, 1);
        let h = Histogram::density(&xs, 100);
        let width = h.centres[1] - h.centres[0];
        let area: f64 = h.density.iter().map(|d| d * width).sum();
        assert!((area - 1.0).abs() < 1e-9);
    }
}
