use chrono::{Days, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SimulationConfig;
use crate::distributions::LosModel;
use crate::error::{Error, Result};
use crate::scenario::ArrivalScenario;
use crate::simulation::{self, Occupancy, Series, SimulationRun};
use crate::types::{CohortProportions, PerCohort};

/// Probabilities reported for every day and series.
pub const QUANTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

/// Cross-run quantiles of one series on one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileBand {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

impl QuantileBand {
    /// Linear-interpolation quantiles (`h = p * (n - 1)`). `None` for no values.
    pub fn from_values(values: &mut [f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let sorted: &[f64] = values;
        let [p10, p25, p50, p75, p90] = QUANTILES.map(|p| quantile(sorted, p));
        Some(QuantileBand { p10, p25, p50, p75, p90 })
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.p10, self.p25, self.p50, self.p75, self.p90]
    }
}

/// Quantile `p` of an ascending, non-empty slice.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let h = p * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBands {
    pub date: NaiveDate,
    pub total: QuantileBand,
    pub paediatric: QuantileBand,
    pub adult: QuantileBand,
    pub senior: QuantileBand,
}

impl DailyBands {
    pub fn get(&self, series: Series) -> &QuantileBand {
        match series {
            Series::Total => &self.total,
            Series::Paediatric => &self.paediatric,
            Series::Adult => &self.adult,
            Series::Senior => &self.senior,
        }
    }
}

/// Daily quantile bands for every occupancy series, handed to charting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyForecast {
    pub n_runs: usize,
    pub base_seed: u64,
    pub days: Vec<DailyBands>,
}

impl OccupancyForecast {
    pub fn series(&self, series: Series) -> Vec<QuantileBand> {
        self.days.iter().map(|d| *d.get(series)).collect()
    }

    /// Day with the highest median total occupancy.
    pub fn peak_median(&self) -> Option<&DailyBands> {
        self.days.iter().max_by(|a, b| a.total.p50.total_cmp(&b.total.p50))
    }
}

/// Put every run on one shared date index. A run shorter than the index
/// holds its last level for the remaining dates.
pub fn align_runs(runs: &[SimulationRun]) -> (Vec<NaiveDate>, Vec<Vec<Occupancy>>) {
    let Some(start) = runs.iter().filter_map(|r| r.days.first().map(|d| d.date)).min() else {
        return (Vec::new(), Vec::new());
    };
    let end = runs
        .iter()
        .filter_map(|r| r.days.last().map(|d| d.date))
        .max()
        .unwrap_or(start);
    let dates: Vec<NaiveDate> = (0..=(end - start).num_days() as u64)
        .filter_map(|i| start.checked_add_days(Days::new(i)))
        .collect();

    let aligned = runs
        .iter()
        .map(|run| {
            let mut values = Vec::with_capacity(dates.len());
            let mut last = Occupancy::default();
            let mut cursor = run.days.iter().peekable();
            for &date in &dates {
                while let Some(day) = cursor.next_if(|d| d.date <= date) {
                    last = day.occupancy;
                }
                values.push(last);
            }
            values
        })
        .collect();
    (dates, aligned)
}

/// Quantile bands across already-completed runs.
pub fn summarise(runs: &[SimulationRun], base_seed: u64) -> OccupancyForecast {
    let (dates, aligned) = align_runs(runs);
    let band = |i: usize, series: Series| {
        let mut values: Vec<f64> = aligned.iter().map(|run| run[i].get(series) as f64).collect();
        QuantileBand::from_values(&mut values)
            .unwrap_or(QuantileBand { p10: 0.0, p25: 0.0, p50: 0.0, p75: 0.0, p90: 0.0 })
    };
    let days = dates
        .iter()
        .enumerate()
        .map(|(i, &date)| DailyBands {
            date,
            total: band(i, Series::Total),
            paediatric: band(i, Series::Paediatric),
            adult: band(i, Series::Adult),
            senior: band(i, Series::Senior),
        })
        .collect();
    OccupancyForecast { n_runs: runs.len(), base_seed, days }
}

/// Run `config.n_runs` independent simulations in parallel (run `i` seeded
/// with `config.run_seed(i)`) and reduce them to daily quantile bands.
/// The first failing run aborts the whole forecast.
pub fn aggregate(
    scenario: &ArrivalScenario,
    models: &PerCohort<LosModel>,
    proportions: &CohortProportions,
    config: &SimulationConfig,
) -> Result<OccupancyForecast> {
    config.validate()?;
    let run_all = || -> Result<Vec<SimulationRun>> {
        (0..config.n_runs as u64)
            .into_par_iter()
            .map(|i| simulation::run(scenario, models, proportions, config, config.run_seed(i)))
            .collect()
    };
    let runs = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| Error::config(format!("thread pool: {e}")))?
            .install(run_all)?,
        None => run_all()?,
    };

    let forecast = summarise(&runs, config.base_seed);
    info!(
        runs = forecast.n_runs,
        days = forecast.days.len(),
        peak_median = forecast.peak_median().map(|d| d.total.p50).unwrap_or(0.0),
        "forecast complete"
    );
    Ok(forecast)
}
