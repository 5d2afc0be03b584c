//! Forecast workflow as a chain of immutable stages:
//!
//! `HistoricalData` -> `FittedModels` -> `ForecastPlan` -> `OccupancyForecast`.
//!
//! Each stage is built from the previous one and never mutated afterwards,
//! so a later stage can always be rebuilt from an earlier one with
//! different choices.

use tracing::{info, warn};

use crate::arrival_fit::{ArrivalFit, fit_arrivals};
use crate::config::{ArrivalFitConfig, FitConfig, SimulationConfig};
use crate::distributions::{FittedDistribution, LosModel};
use crate::error::{Error, Result};
use crate::los_fit::fit_los;
use crate::monte_carlo::{OccupancyForecast, aggregate};
use crate::records::{self, DailyCounts, OccupancyRecord, StartTimeOption, StayRecord};
use crate::scenario::{ArrivalScenario, ScenarioParams};
use crate::simulation::{self, SimulationRun};
use crate::snapshot::ModelSnapshot;
use crate::types::{AgeCohort, CohortProportions, DateRange, PerCohort};

/// Validated input records. Only derived data leaves this stage.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    pub stays: Vec<StayRecord>,
    pub occupancy: Vec<OccupancyRecord>,
}

impl HistoricalData {
    pub fn new(stays: Vec<StayRecord>, occupancy: Vec<OccupancyRecord>) -> Self {
        HistoricalData { stays, occupancy }
    }

    pub fn daily_arrivals(&self, option: StartTimeOption) -> DailyCounts {
        records::daily_arrivals(&self.stays, option)
    }

    /// Rank LoS distributions for every cohort and measure the cohort mix.
    /// A cohort with no usable stays ends up with no candidates rather than
    /// failing the whole stage.
    pub fn fit_models(&self, config: &FitConfig) -> Result<FittedModels> {
        let proportions = records::cohort_proportions(&self.stays)?;
        let mut candidates = PerCohort::from_fn(|_| Vec::new());
        for cohort in AgeCohort::ALL {
            let samples = records::los_samples(&self.stays, cohort);
            *candidates.get_mut(cohort) = match fit_los(&samples, cohort, config) {
                Ok(ranked) => ranked,
                Err(Error::EmptySample) => {
                    warn!(%cohort, "no stays to fit");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
        }
        Ok(FittedModels { candidates, proportions, arrival_fit: None })
    }

    pub fn fit_arrival_curve(
        &self,
        window: DateRange,
        option: StartTimeOption,
        config: &ArrivalFitConfig,
    ) -> Result<ArrivalFit> {
        fit_arrivals(&self.daily_arrivals(option), window, config)
    }
}

/// Ranked LoS candidates per cohort, the observed cohort mix and,
/// optionally, a fitted arrival curve.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedModels {
    pub candidates: PerCohort<Vec<FittedDistribution>>,
    pub proportions: CohortProportions,
    pub arrival_fit: Option<ArrivalFit>,
}

impl FittedModels {
    pub fn with_arrival_fit(self, fit: ArrivalFit) -> Self {
        FittedModels { arrival_fit: Some(fit), ..self }
    }

    /// Lowest-SSE candidate for `cohort`.
    pub fn best(&self, cohort: AgeCohort) -> Option<&FittedDistribution> {
        self.candidates.get(cohort).first()
    }

    /// A builder preloaded with the best candidate per cohort and the
    /// observed proportions. The scenario is still up to the caller.
    pub fn builder(&self, disease_name: impl Into<String>) -> ForecastBuilder {
        let mut builder = ForecastBuilder::new(disease_name).proportions(self.proportions.clone());
        for cohort in AgeCohort::ALL {
            if let Some(best) = self.best(cohort) {
                builder = builder.model(cohort, LosModel::Fitted(best.clone()));
            }
        }
        builder
    }
}

/// Collects the user's choices for a forecast. `build` checks they are complete.
#[derive(Debug, Clone)]
pub struct ForecastBuilder {
    disease_name: String,
    scenario_params: Option<ScenarioParams>,
    scenario: Option<ArrivalScenario>,
    models: PerCohort<Option<LosModel>>,
    proportions: Option<CohortProportions>,
    simulation: SimulationConfig,
}

impl ForecastBuilder {
    pub fn new(disease_name: impl Into<String>) -> Self {
        ForecastBuilder {
            disease_name: disease_name.into(),
            scenario_params: None,
            scenario: None,
            models: PerCohort::from_fn(|_| None),
            proportions: None,
            simulation: SimulationConfig::default(),
        }
    }

    /// Use explicit daily expectations.
    pub fn scenario(mut self, scenario: ArrivalScenario) -> Self {
        self.scenario = Some(scenario);
        self.scenario_params = None;
        self
    }

    /// Generate the scenario from curve parameters; they are kept for the snapshot.
    pub fn scenario_params(mut self, params: ScenarioParams) -> Result<Self> {
        self.scenario = Some(params.generate()?);
        self.scenario_params = Some(params);
        Ok(self)
    }

    pub fn model(mut self, cohort: AgeCohort, model: LosModel) -> Self {
        *self.models.get_mut(cohort) = Some(model);
        self
    }

    pub fn proportions(mut self, proportions: CohortProportions) -> Self {
        self.proportions = Some(proportions);
        self
    }

    pub fn simulation(mut self, config: SimulationConfig) -> Self {
        self.simulation = config;
        self
    }

    pub fn build(self) -> Result<ForecastPlan> {
        let scenario = self.scenario.ok_or_else(|| Error::config("no arrival scenario chosen"))?;
        let proportions = self.proportions.ok_or_else(|| Error::config("no cohort proportions given"))?;
        let [paediatric, adult, senior] = AgeCohort::ALL.map(|cohort| {
            self.models
                .get(cohort)
                .clone()
                .ok_or_else(|| Error::config(format!("no length-of-stay model chosen for the {cohort} cohort")))
        });
        let snapshot = ModelSnapshot {
            disease_name: self.disease_name,
            scenario_params: self.scenario_params,
            scenario,
            cohort_models: PerCohort { paediatric: paediatric?, adult: adult?, senior: senior? },
            cohort_proportions: proportions,
            simulation: self.simulation,
        };
        ForecastPlan::from_snapshot(snapshot)
    }
}

/// A complete, validated set of forecast inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPlan {
    inputs: ModelSnapshot,
}

impl ForecastPlan {
    pub fn from_snapshot(snapshot: ModelSnapshot) -> Result<Self> {
        snapshot.validate()?;
        Ok(ForecastPlan { inputs: snapshot })
    }

    pub fn snapshot(&self) -> &ModelSnapshot {
        &self.inputs
    }

    pub fn into_snapshot(self) -> ModelSnapshot {
        self.inputs
    }

    pub fn scenario(&self) -> &ArrivalScenario {
        &self.inputs.scenario
    }

    pub fn simulation(&self) -> &SimulationConfig {
        &self.inputs.simulation
    }

    /// Same plan with different simulation settings (run count, seed, threads).
    pub fn with_simulation(&self, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut inputs = self.inputs.clone();
        inputs.simulation = config;
        Ok(ForecastPlan { inputs })
    }

    /// One simulation with an explicit seed.
    pub fn run_once(&self, seed: u64) -> Result<SimulationRun> {
        let s = &self.inputs;
        simulation::run(&s.scenario, &s.cohort_models, &s.cohort_proportions, &s.simulation, seed)
    }

    pub fn run(&self) -> Result<OccupancyForecast> {
        let s = &self.inputs;
        info!(
            disease = %s.disease_name,
            days = s.scenario.len(),
            runs = s.simulation.n_runs,
            "running forecast"
        );
        aggregate(&s.scenario, &s.cohort_models, &s.cohort_proportions, &s.simulation)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, LogNormal};

    use super::*;
    use crate::scenario::CurveShape;

    fn day0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    fn at(day: u64, hours: f64) -> NaiveDateTime {
        let date = day0() + Days::new(day);
        NaiveDateTime::new(date, NaiveTime::MIN) + chrono::Duration::milliseconds((hours * 3_600_000.0) as i64)
    }

    /// Stays with log-normal LoS, admitted over 60 days.
    fn synthetic_stays(n: usize) -> Vec<StayRecord> {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let los = LogNormal::new(1.2, 0.5).unwrap();
        (0..n)
            .map(|_| {
                let age = match rng.random_range(0..10) {
                    0 => rng.random_range(0..16),
                    1..=4 => rng.random_range(16..65),
                    _ => rng.random_range(65..100),
                };
                let day = rng.random_range(0..60);
                let admit = at(day, rng.random_range(0.0..24.0));
                let stay_hours = los.sample(&mut rng) * 24.0;
                StayRecord {
                    age,
                    admission: admit,
                    discharge: admit + chrono::Duration::milliseconds((stay_hours * 3_600_000.0) as i64),
                    readmission: None,
                    readmission_discharge: None,
                    first_pos_collected: admit,
                    acquisition: "Community".to_string(),
                }
            })
            .collect()
    }

    fn plan_inputs() -> ForecastBuilder {
        ForecastBuilder::new("Test virus")
            .scenario(ArrivalScenario::constant(day0(), 14, 6.0).unwrap())
            .proportions(CohortProportions::new(0.1, 0.4, 0.5).unwrap())
            .model(AgeCohort::Paediatric, LosModel::Constant { days: 1.0 })
            .model(AgeCohort::Adult, LosModel::Constant { days: 3.0 })
            .model(AgeCohort::Senior, LosModel::Constant { days: 5.0 })
            .simulation(SimulationConfig { n_runs: 5, ..SimulationConfig::default() })
    }

    // ── Fitting stage ─────────────────────────────────────────────────────────

    #[test]
    fn fit_models_ranks_every_cohort() {
        let data = HistoricalData::new(synthetic_stays(900), Vec::new());
        let fitted = data.fit_models(&FitConfig::default()).unwrap();
        for cohort in AgeCohort::ALL {
            let ranked = fitted.candidates.get(cohort);
            assert!(!ranked.is_empty(), "{cohort}");
            assert!(ranked.windows(2).all(|w| w[0].sse <= w[1].sse));
        }
        let p = &fitted.proportions;
        assert!((p.paediatric + p.adult + p.senior - 1.0).abs() < 1e-9);
        assert!(p.senior > p.paediatric);
    }

    #[test]
    fn fit_models_needs_stays() {
        let data = HistoricalData::default();
        assert!(matches!(data.fit_models(&FitConfig::default()), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn missing_cohort_gets_no_candidates() {
        let stays: Vec<StayRecord> = synthetic_stays(400).into_iter().filter(|s| s.age >= 16).collect();
        let fitted = HistoricalData::new(stays, Vec::new()).fit_models(&FitConfig::default()).unwrap();
        assert!(fitted.candidates.paediatric.is_empty());
        assert!(fitted.best(AgeCohort::Paediatric).is_none());
        assert_eq!(fitted.proportions.paediatric, 0.0);

        let err = fitted
            .builder("Test virus")
            .scenario(ArrivalScenario::constant(day0(), 7, 2.0).unwrap())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("paediatric"), "{err}");
    }

    // ── Builder ───────────────────────────────────────────────────────────────

    #[test]
    fn builder_requires_scenario() {
        let err = ForecastBuilder::new("x")
            .proportions(CohortProportions::new(0.0, 1.0, 0.0).unwrap())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("scenario"));
    }

    #[test]
    fn builder_rejects_unnormalised_proportions() {
        let bad = PerCohort { paediatric: 0.5, adult: 0.5, senior: 0.5 };
        let err = plan_inputs().proportions(bad).build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn builder_surfaces_scenario_validation_message() {
        let params = ScenarioParams {
            range: DateRange::new(day0(), day0() + Days::new(30)),
            peak_date: day0() + Days::new(40),
            shape: CurveShape::Beta { concentration: 5.0 },
            peak_value: 10.0,
            floor_value: 1.0,
        };
        let err = plan_inputs().scenario_params(params).unwrap_err();
        assert_eq!(err.to_string(), "Dates must comply with start < peak < end.");
    }

    // ── Plan ──────────────────────────────────────────────────────────────────

    #[test]
    fn plan_round_trips_through_snapshot() {
        let plan = plan_inputs().build().unwrap();
        let json = plan.snapshot().to_json().unwrap();
        let again = ForecastPlan::from_snapshot(ModelSnapshot::from_json(&json).unwrap()).unwrap();
        assert_eq!(again, plan);
        assert_eq!(again.run().unwrap(), plan.run().unwrap());
    }

    #[test]
    fn with_simulation_changes_only_run_settings() {
        let plan = plan_inputs().build().unwrap();
        let wider = plan
            .with_simulation(SimulationConfig { n_runs: 9, ..plan.simulation().clone() })
            .unwrap();
        assert_eq!(wider.scenario(), plan.scenario());
        assert_eq!(wider.run().unwrap().n_runs, 9);
        assert!(plan.with_simulation(SimulationConfig { n_runs: 0, ..SimulationConfig::default() }).is_err());
    }

    #[test]
    fn fitted_models_feed_a_forecast_end_to_end() {
        let data = HistoricalData::new(synthetic_stays(900), Vec::new());
        let fitted = data.fit_models(&FitConfig::default()).unwrap();
        let plan = fitted
            .builder("Test virus")
            .scenario(ArrivalScenario::constant(day0(), 21, 12.0).unwrap())
            .simulation(SimulationConfig { n_runs: 8, drain_days: 10, ..SimulationConfig::default() })
            .build()
            .unwrap();
        let forecast = plan.run().unwrap();
        assert_eq!(forecast.days.len(), 31);
        let peak = forecast.peak_median().unwrap();
        assert!(peak.total.p50 > 12.0, "{:?}", peak.total);
        let run = plan.run_once(1).unwrap();
        assert!(run.patients > 150);
    }
}
