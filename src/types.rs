use std::cmp::Ordering;
use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(pub u64);

/// Simulation time in fractional days since midnight of the first scenario day.
/// Time jumps directly from one event to the next; there is no clock ticking
/// through the gaps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimTime(pub f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn offset(self, days: f64) -> Self {
        SimTime(self.0 + days)
    }

    /// Index of the simulated day this instant falls in.
    pub fn day_index(self) -> i64 {
        self.0.floor() as i64
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Age band used to stratify both fitting and simulation.
/// The thresholds partition `[0, ∞)`: paediatric `< 16`, adult `16..65`, senior `>= 65`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeCohort {
    Paediatric,
    Adult,
    Senior,
}

impl AgeCohort {
    pub const ADULT_MIN_AGE: u32 = 16;
    pub const SENIOR_MIN_AGE: u32 = 65;

    /// Cumulative-draw order: paediatric first, then adult, senior takes the remainder.
    pub const ALL: [AgeCohort; 3] = [AgeCohort::Paediatric, AgeCohort::Adult, AgeCohort::Senior];

    pub fn from_age(age: u32) -> Self {
        if age < Self::ADULT_MIN_AGE {
            AgeCohort::Paediatric
        } else if age < Self::SENIOR_MIN_AGE {
            AgeCohort::Adult
        } else {
            AgeCohort::Senior
        }
    }

    pub fn contains(self, age: u32) -> bool {
        match self {
            AgeCohort::Paediatric => age < Self::ADULT_MIN_AGE,
            AgeCohort::Adult => (Self::ADULT_MIN_AGE..Self::SENIOR_MIN_AGE).contains(&age),
            AgeCohort::Senior => age >= Self::SENIOR_MIN_AGE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeCohort::Paediatric => "0-15",
            AgeCohort::Adult => "16-64",
            AgeCohort::Senior => "65+",
        }
    }
}

impl fmt::Display for AgeCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgeCohort::Paediatric => "paediatric",
            AgeCohort::Adult => "adult",
            AgeCohort::Senior => "senior",
        };
        f.write_str(name)
    }
}

/// One value per cohort. Serializes as `{"paediatric": .., "adult": .., "senior": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerCohort<T> {
    pub paediatric: T,
    pub adult: T,
    pub senior: T,
}

impl<T> PerCohort<T> {
    pub fn from_fn(mut f: impl FnMut(AgeCohort) -> T) -> Self {
        PerCohort {
            paediatric: f(AgeCohort::Paediatric),
            adult: f(AgeCohort::Adult),
            senior: f(AgeCohort::Senior),
        }
    }

    pub fn get(&self, cohort: AgeCohort) -> &T {
        match cohort {
            AgeCohort::Paediatric => &self.paediatric,
            AgeCohort::Adult => &self.adult,
            AgeCohort::Senior => &self.senior,
        }
    }

    pub fn get_mut(&mut self, cohort: AgeCohort) -> &mut T {
        match cohort {
            AgeCohort::Paediatric => &mut self.paediatric,
            AgeCohort::Adult => &mut self.adult,
            AgeCohort::Senior => &mut self.senior,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgeCohort, &T)> {
        AgeCohort::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// Fraction of admissions falling in each cohort. Held fixed over the simulated horizon.
pub type CohortProportions = PerCohort<f64>;

impl CohortProportions {
    pub fn new(paediatric: f64, adult: f64, senior: f64) -> Result<Self> {
        let p = PerCohort { paediatric, adult, senior };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        for (cohort, &v) in self.iter() {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{cohort} proportion must be a non-negative number, got {v}"
                )));
            }
        }
        let sum = self.paediatric + self.adult + self.senior;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidConfig(format!(
                "cohort proportions must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }

    /// Map a single uniform draw in `[0, 1)` to a cohort against the cumulative proportions.
    pub fn draw(&self, u: f64) -> AgeCohort {
        if u < self.paediatric {
            AgeCohort::Paediatric
        } else if u < self.paediatric + self.adult {
            AgeCohort::Adult
        } else {
            AgeCohort::Senior
        }
    }
}

/// Half-open calendar range `[start, end)` with daily granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days().max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len_days() == 0
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.len_days() as u64).filter_map(|i| self.start.checked_add_days(Days::new(i)))
    }
}

/// Signed whole days from `from` to `to`.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
