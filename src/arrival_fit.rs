use argmin::core::{CostFunction, Error as ArgminError, Executor};
use argmin::solver::neldermead::NelderMead;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ArrivalFitConfig;
use crate::error::{Error, Result};
use crate::records::DailyCounts;
use crate::types::DateRange;

const PENALTY: f64 = 1e100;

/// Bell curve fitted to a window of daily arrival counts.
/// Offsets are in days since `window_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalFit {
    pub window_start: NaiveDate,
    /// Number of days the fitted window spans.
    pub window_days: usize,
    pub peak_offset: f64,
    pub scale: f64,
    pub peak_value: f64,
    pub floor_value: f64,
    pub sse: f64,
}

impl ArrivalFit {
    pub fn value_at(&self, offset: f64) -> f64 {
        bell(offset, self.peak_offset, self.scale, self.peak_value, self.floor_value)
    }

    /// Calendar day nearest the fitted peak.
    pub fn peak_date(&self) -> Option<NaiveDate> {
        let days = self.peak_offset.round();
        if days >= 0.0 {
            self.window_start.checked_add_days(Days::new(days as u64))
        } else {
            self.window_start.checked_sub_days(Days::new((-days) as u64))
        }
    }
}

fn bell(t: f64, mu: f64, scale: f64, peak: f64, floor: f64) -> f64 {
    let z = (t - mu) / scale;
    floor + (peak - floor) * (-0.5 * z * z).exp()
}

/// Sum of squared residuals of the bell curve against raw daily counts.
/// `theta` is `[peak_offset, peak_value, ln scale]`, optionally followed by `floor_value`.
struct LeastSquares {
    t: Vec<f64>,
    y: Vec<f64>,
}

impl LeastSquares {
    fn curve_params(theta: &[f64]) -> Option<(f64, f64, f64, f64)> {
        match theta {
            [mu, peak, ln_scale] => Some((*mu, ln_scale.exp(), *peak, 0.0)),
            [mu, peak, ln_scale, floor] => Some((*mu, ln_scale.exp(), *peak, *floor)),
            _ => None,
        }
    }
}

impl CostFunction for LeastSquares {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let (mu, scale, peak, floor) = Self::curve_params(theta)
            .ok_or_else(|| ArgminError::msg("unexpected parameter count"))?;
        let sse: f64 = self
            .t
            .iter()
            .zip(&self.y)
            .map(|(&t, &y)| (y - bell(t, mu, scale, peak, floor)).powi(2))
            .sum();
        Ok(if sse.is_finite() { sse } else { PENALTY })
    }
}

fn minimise(problem: LeastSquares, initial: Vec<f64>, max_iterations: u64) -> Result<(Vec<f64>, f64)> {
    let mut vertices = vec![initial.clone()];
    for i in 0..initial.len() {
        let mut vertex = initial.clone();
        vertex[i] += 0.1 * vertex[i].abs().max(1.0);
        vertices.push(vertex);
    }
    let solver = NelderMead::new(vertices)
        .with_sd_tolerance(1e-10)
        .map_err(|e| Error::Optimizer(e.to_string()))?;
    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iterations))
        .run()
        .map_err(|e| Error::Optimizer(e.to_string()))?;
    let state = result.state();
    let best = state.best_param.clone().unwrap_or(initial);
    Ok((best, state.best_cost))
}

/// Fit a peaked curve to the daily counts inside `window`.
///
/// The first pass fits peak location, height and scale with no floor,
/// seeded from the trailing rolling mean (argmax for the peak, max for the
/// height) and `config.initial_scale`. Its result seeds a second pass that
/// also fits a floor, starting from the rolling mean's minimum.
pub fn fit_arrivals(daily: &DailyCounts, window: DateRange, config: &ArrivalFitConfig) -> Result<ArrivalFit> {
    let windowed = daily.restrict(window);
    if windowed.is_empty() || windowed.counts.iter().all(|&c| c == 0) {
        return Err(Error::NoArrivals);
    }
    if !(config.initial_scale > 0.0) {
        return Err(Error::config("initial_scale must be positive"));
    }

    let rolling = windowed.rolling_mean(config.rolling_window);
    let (argmax, max) = rolling
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    let min = rolling.iter().copied().fold(f64::INFINITY, f64::min);

    let t: Vec<f64> = (0..windowed.len()).map(|i| i as f64).collect();
    let y: Vec<f64> = windowed.counts.iter().map(|&c| c as f64).collect();

    let seed = vec![argmax as f64, max, config.initial_scale.ln()];
    let (first, first_sse) = minimise(
        LeastSquares { t: t.clone(), y: y.clone() },
        seed,
        config.max_iterations,
    )?;
    debug!(peak_offset = first[0], peak_value = first[1], scale = first[2].exp(), sse = first_sse, "first arrival pass");

    let seed = vec![first[0], first[1], first[2], min];
    let (second, sse) = minimise(LeastSquares { t, y }, seed, config.max_iterations)?;
    let (peak_offset, scale, peak_value, floor_value) = LeastSquares::curve_params(&second)
        .ok_or_else(|| Error::Optimizer("unexpected parameter count".to_string()))?;

    // Offset from the window start, not from the first day with data.
    let lead = (windowed.start - window.start).num_days() as f64;
    let fit = ArrivalFit {
        window_start: window.start,
        window_days: window.len_days(),
        peak_offset: peak_offset + lead,
        scale,
        peak_value,
        floor_value,
        sse,
    };
    if ![fit.peak_offset, fit.scale, fit.peak_value, fit.floor_value].iter().all(|v| v.is_finite()) {
        return Err(Error::Optimizer("arrival fit diverged".to_string()));
    }
    info!(
        peak_offset = fit.peak_offset,
        scale = fit.scale,
        peak_value = fit.peak_value,
        floor_value = fit.floor_value,
        "arrival curve fitted"
    );
    Ok(fit)
}
