use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::arrival_fit::ArrivalFit;
use crate::types::{DateRange, days_between};

/// Rejected scenario parameters. Messages are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("Dates must comply with start < peak < end.")]
    DateOrder,
    #[error("Start date must be before end date.")]
    EmptyRange,
    #[error("Shape parameter of beta distribution must be positive.")]
    NonPositiveConcentration,
    #[error("Scale of the normal curve must be a positive number of days.")]
    NonPositiveScale,
    #[error("Maximum value must be greater than minimum value.")]
    PeakNotAboveFloor,
    #[error("Minimum value must not be negative.")]
    NegativeFloor,
    #[error("Scenario values must be finite, non-negative numbers.")]
    InvalidValue,
    #[error("Scenario dates must be consecutive days, found a gap after {0}.")]
    NonContiguous(NaiveDate),
    #[error("Scenario must contain at least one day.")]
    Empty,
}

/// Bell shape of the scenario curve. Both are normalised so the peak day
/// takes `peak_value`; the two are not numerically interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum CurveShape {
    /// Gaussian in days from the peak; `scale` is its standard deviation in days.
    Normal { scale: f64 },
    /// Beta density over the range mapped onto `[0, 1]`; larger
    /// `concentration` gives a narrower peak.
    Beta { concentration: f64 },
}

/// User-facing knobs of the scenario curve generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub range: DateRange,
    pub peak_date: NaiveDate,
    pub shape: CurveShape,
    pub peak_value: f64,
    pub floor_value: f64,
}

impl ScenarioParams {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if ![self.peak_value, self.floor_value].iter().all(|v| v.is_finite()) {
            return Err(ScenarioError::InvalidValue);
        }
        match self.shape {
            CurveShape::Normal { scale } => {
                if self.range.is_empty() {
                    return Err(ScenarioError::EmptyRange);
                }
                if !self.range.contains(self.peak_date) {
                    return Err(ScenarioError::DateOrder);
                }
                if !(scale > 0.0) || !scale.is_finite() {
                    return Err(ScenarioError::NonPositiveScale);
                }
            }
            CurveShape::Beta { concentration } => {
                if !(self.range.start < self.peak_date && self.peak_date < self.range.end) {
                    return Err(ScenarioError::DateOrder);
                }
                if !(concentration > 0.0) || !concentration.is_finite() {
                    return Err(ScenarioError::NonPositiveConcentration);
                }
            }
        }
        if self.peak_value <= self.floor_value {
            return Err(ScenarioError::PeakNotAboveFloor);
        }
        if self.floor_value < 0.0 {
            return Err(ScenarioError::NegativeFloor);
        }
        Ok(())
    }

    /// Expected arrivals for every day of the range, end exclusive.
    pub fn generate(&self) -> Result<ArrivalScenario, ScenarioError> {
        self.validate()?;
        let span = self.peak_value - self.floor_value;
        let points = match self.shape {
            CurveShape::Normal { scale } => self
                .range
                .days()
                .map(|d| {
                    let z = days_between(self.peak_date, d) as f64 / scale;
                    (d, self.floor_value + span * (-0.5 * z * z).exp())
                })
                .collect(),
            CurveShape::Beta { concentration } => {
                let last = (self.range.len_days() - 1) as f64;
                let mode = days_between(self.range.start, self.peak_date) as f64 / last;
                let a = mode * concentration + 1.0;
                let b = (1.0 - mode) * concentration + 1.0;
                self.range
                    .days()
                    .enumerate()
                    .map(|(i, d)| {
                        let x = i as f64 / last;
                        (d, self.floor_value + span * beta_ratio(x, mode, a, b))
                    })
                    .collect()
            }
        };
        ArrivalScenario::from_points(points)
    }

    /// Move a fitted curve onto a new scenario start date, keeping the
    /// fitted window's length and the peak's position within it.
    pub fn from_arrival_fit(fit: &ArrivalFit, start: NaiveDate) -> Self {
        let len = fit.window_days.max(1) as u64;
        let end = start.checked_add_days(Days::new(len)).unwrap_or(start);
        let peak_offset = fit.peak_offset.round().clamp(0.0, (len - 1) as f64) as u64;
        let peak_date = start.checked_add_days(Days::new(peak_offset)).unwrap_or(start);
        let floor_value = if fit.floor_value < 0.0 {
            warn!(floor = fit.floor_value, "fitted floor below zero, using 0");
            0.0
        } else {
            fit.floor_value
        };
        ScenarioParams {
            range: DateRange::new(start, end),
            peak_date,
            shape: CurveShape::Normal { scale: fit.scale },
            peak_value: fit.peak_value,
            floor_value,
        }
    }
}

/// `pdf(x) / pdf(mode)` for a Beta(a, b) with `a, b >= 1`. A zero exponent
/// contributes nothing, including at `x == mode` on either boundary.
fn beta_ratio(x: f64, mode: f64, a: f64, b: f64) -> f64 {
    let term = |exp: f64, v: f64, m: f64| if exp == 0.0 { 0.0 } else { exp * (v.ln() - m.ln()) };
    let ln = term(a - 1.0, x, mode) + term(b - 1.0, 1.0 - x, 1.0 - mode);
    if ln.is_nan() { 0.0 } else { ln.exp() }
}

/// Contract-level entry point: a curve over `range` peaking at `peak_date`.
pub fn generate(
    range: DateRange,
    peak_date: NaiveDate,
    shape: CurveShape,
    peak_value: f64,
    floor_value: f64,
) -> Result<ArrivalScenario, ScenarioError> {
    ScenarioParams { range, peak_date, shape, peak_value, floor_value }.generate()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPoint {
    pub date: NaiveDate,
    pub expected: f64,
}

/// Daily expected arrivals over a contiguous run of dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScenarioPoint>", into = "Vec<ScenarioPoint>")]
pub struct ArrivalScenario {
    points: Vec<ScenarioPoint>,
}

impl ArrivalScenario {
    pub fn from_points(points: Vec<(NaiveDate, f64)>) -> Result<Self, ScenarioError> {
        Self::try_from(
            points
                .into_iter()
                .map(|(date, expected)| ScenarioPoint { date, expected })
                .collect::<Vec<_>>(),
        )
    }

    /// Same expected count every day for `days` days.
    pub fn constant(start: NaiveDate, days: usize, expected: f64) -> Result<Self, ScenarioError> {
        let range = DateRange::new(start, start.checked_add_days(Days::new(days as u64)).unwrap_or(start));
        Self::from_points(range.days().map(|d| (d, expected)).collect())
    }

    pub fn points(&self) -> &[ScenarioPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> NaiveDate {
        self.points[0].date
    }

    /// Day after the last scenario day.
    pub fn end(&self) -> NaiveDate {
        let last = self.points[self.points.len() - 1].date;
        last.checked_add_days(Days::new(1)).unwrap_or(last)
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start(), self.end())
    }

    pub fn expected(&self, day: usize) -> Option<f64> {
        self.points.get(day).map(|p| p.expected)
    }

    pub fn total_expected(&self) -> f64 {
        self.points.iter().map(|p| p.expected).sum()
    }

    pub fn peak(&self) -> ScenarioPoint {
        self.points
            .iter()
            .copied()
            .fold(self.points[0], |best, p| if p.expected > best.expected { p } else { best })
    }
}

impl TryFrom<Vec<ScenarioPoint>> for ArrivalScenario {
    type Error = ScenarioError;

    fn try_from(points: Vec<ScenarioPoint>) -> Result<Self, Self::Error> {
        if points.is_empty() {
            return Err(ScenarioError::Empty);
        }
        if points.iter().any(|p| !p.expected.is_finite() || p.expected < 0.0) {
            return Err(ScenarioError::InvalidValue);
        }
        for pair in points.windows(2) {
            if days_between(pair[0].date, pair[1].date) != 1 {
                return Err(ScenarioError::NonContiguous(pair[0].date));
            }
        }
        Ok(ArrivalScenario { points })
    }
}

impl From<ArrivalScenario> for Vec<ScenarioPoint> {
    fn from(s: ArrivalScenario) -> Self {
        s.points
    }
}
