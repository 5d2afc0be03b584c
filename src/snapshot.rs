use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::distributions::{Family, FittedDistribution, LosModel};
use crate::error::{Error, Result};
use crate::scenario::{ArrivalScenario, CurveShape, ScenarioParams};
use crate::types::{CohortProportions, DateRange, PerCohort};

/// Everything needed to reproduce a forecast: the chosen scenario, one LoS
/// model per cohort, the cohort mix and the simulation settings.
/// Holds derived parameters only; no patient-level records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub disease_name: String,
    /// Curve parameters the scenario was generated from, when it was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_params: Option<ScenarioParams>,
    pub scenario: ArrivalScenario,
    pub cohort_models: PerCohort<LosModel>,
    pub cohort_proportions: CohortProportions,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl ModelSnapshot {
    pub fn validate(&self) -> Result<()> {
        if self.disease_name.trim().is_empty() {
            return Err(Error::config("disease_name must not be empty"));
        }
        self.cohort_proportions.validate()?;
        for (cohort, model) in self.cohort_models.iter() {
            model
                .validate()
                .map_err(|e| Error::config(format!("{cohort} length-of-stay model: {e}")))?;
        }
        if let Some(params) = &self.scenario_params {
            params.validate()?;
        }
        self.simulation.validate()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: ModelSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        writeln!(w)?;
        w.flush()?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: ModelSnapshot = serde_json::from_reader(reader)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// A winter-season demo: beta-shaped arrivals peaking before new year,
    /// log-normal stays with longer tails for older patients.
    pub fn canonical() -> Result<Self> {
        let date = |y, m, d| {
            NaiveDate::from_ymd_opt(y, m, d)
                .ok_or_else(|| Error::config(format!("invalid date {y}-{m}-{d}")))
        };
        let params = ScenarioParams {
            range: DateRange::new(date(2025, 10, 1)?, date(2026, 3, 1)?),
            peak_date: date(2025, 12, 22)?,
            shape: CurveShape::Beta { concentration: 12.0 },
            peak_value: 30.0,
            floor_value: 2.0,
        };
        let scenario = params.generate()?;

        let lognormal = |s: f64, scale: f64| {
            let family = Family::LogNorm;
            let params = vec![s, 0.0, scale];
            LosModel::Fitted(FittedDistribution {
                family,
                mean: family.mean(&params),
                std: family.std(&params),
                params,
                sse: 0.0,
                aic: 0.0,
                bic: 0.0,
                ks_pvalue: 1.0,
            })
        };

        Ok(ModelSnapshot {
            disease_name: "Influenza".to_string(),
            scenario_params: Some(params),
            scenario,
            cohort_models: PerCohort {
                paediatric: lognormal(0.7, 1.8),
                adult: lognormal(0.8, 3.5),
                senior: lognormal(0.75, 6.0),
            },
            cohort_proportions: CohortProportions::new(0.15, 0.45, 0.40)?,
            simulation: SimulationConfig::canonical(),
        })
    }
}
