use chrono::{Days, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, LogNormal};

use respcast::config::SimulationConfig;
use respcast::distributions::{Family, FittedDistribution, LosModel};
use respcast::scenario::{ArrivalScenario, CurveShape, ScenarioParams};
use respcast::types::{CohortProportions, DateRange, PerCohort};

pub struct Outbreak {
    pub days: u64,
    pub peak_per_day: f64,
    pub floor_per_day: f64,
}

pub const SMALL: Outbreak = Outbreak { days: 60, peak_per_day: 10.0, floor_per_day: 1.0 };

pub const MEDIUM: Outbreak = Outbreak { days: 150, peak_per_day: 40.0, floor_per_day: 3.0 };

pub const LARGE: Outbreak = Outbreak { days: 365, peak_per_day: 200.0, floor_per_day: 10.0 };

impl Outbreak {
    /// Expected arrivals over the whole scenario, rounded.
    pub fn expected_patients(&self) -> u64 {
        scenario(self).total_expected().round() as u64
    }
}

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 1).unwrap_or(NaiveDate::MIN)
}

/// Normal-shaped arrival curve peaking a third of the way in.
pub fn scenario(outbreak: &Outbreak) -> ArrivalScenario {
    let params = ScenarioParams {
        range: DateRange::new(start(), start() + Days::new(outbreak.days)),
        peak_date: start() + Days::new(outbreak.days / 3),
        shape: CurveShape::Normal { scale: outbreak.days as f64 / 8.0 },
        peak_value: outbreak.peak_per_day,
        floor_value: outbreak.floor_per_day,
    };
    params.generate().expect("benchmark scenario is valid")
}

pub fn models() -> PerCohort<LosModel> {
    let lognormal = |s: f64, scale: f64| {
        let params = vec![s, 0.0, scale];
        LosModel::Fitted(FittedDistribution {
            family: Family::LogNorm,
            mean: Family::LogNorm.mean(&params),
            std: Family::LogNorm.std(&params),
            params,
            sse: 0.0,
            aic: 0.0,
            bic: 0.0,
            ks_pvalue: 1.0,
        })
    };
    PerCohort { paediatric: lognormal(0.7, 1.8), adult: lognormal(0.8, 3.5), senior: lognormal(0.75, 6.0) }
}

pub fn proportions() -> CohortProportions {
    CohortProportions::new(0.15, 0.45, 0.40).expect("benchmark proportions sum to one")
}

pub fn config(n_runs: usize) -> SimulationConfig {
    SimulationConfig { n_runs, drain_days: 14, ..SimulationConfig::default() }
}

/// Log-normal LoS sample in days, the shape real stays tend to have.
pub fn los_sample(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let dist = LogNormal::new(1.3, 0.6).expect("valid log-normal");
    (0..n).map(|_| dist.sample(&mut rng)).collect()
}
