use std::io::BufRead;

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AgeCohort, CohortProportions, DateRange};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// One hospital stay, as handed over by the ingestion layer.
/// Field names match the upload column headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StayRecord {
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Admission")]
    pub admission: NaiveDateTime,
    #[serde(rename = "Discharge")]
    pub discharge: NaiveDateTime,
    #[serde(rename = "ReAdmission", default)]
    pub readmission: Option<NaiveDateTime>,
    #[serde(rename = "ReAdmissionDischarge", default)]
    pub readmission_discharge: Option<NaiveDateTime>,
    #[serde(rename = "FirstPosCollected")]
    pub first_pos_collected: NaiveDateTime,
    #[serde(rename = "Acquisition")]
    pub acquisition: String,
}

/// Which timestamp marks the start of an infection episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartTimeOption {
    #[default]
    Admission,
    /// Community-acquired stays start at the first positive sample instead.
    FirstPosCollected,
}

impl StayRecord {
    /// Total length of stay in fractional days, including any re-admission segment.
    /// A re-admission with either timestamp missing contributes zero.
    pub fn los_days(&self) -> f64 {
        let primary = (self.discharge - self.admission).num_milliseconds() as f64;
        let readmit = match (self.readmission, self.readmission_discharge) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64,
            _ => 0.0,
        };
        (primary + readmit) / MILLIS_PER_DAY
    }

    pub fn cohort(&self) -> AgeCohort {
        AgeCohort::from_age(self.age)
    }

    pub fn is_community_acquired(&self) -> bool {
        self.acquisition.starts_with("Community")
    }

    pub fn start_time(&self, option: StartTimeOption) -> NaiveDateTime {
        match option {
            StartTimeOption::FirstPosCollected if self.is_community_acquired() => {
                self.first_pos_collected
            }
            _ => self.admission,
        }
    }
}

/// Daily ward census. Display-only; the simulation never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "CriticalCare")]
    pub critical_care: u32,
    #[serde(rename = "NonCriticalCare")]
    pub non_critical_care: u32,
}

impl OccupancyRecord {
    pub fn total(&self) -> u32 {
        self.critical_care + self.non_critical_care
    }
}

/// Read one JSON object per line, skipping blank lines.
pub fn read_ndjson<T: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| Error::Ndjson { line: i + 1, source })?;
        out.push(record);
    }
    Ok(out)
}

/// LoS values (days) for every stay in `cohort`.
pub fn los_samples(records: &[StayRecord], cohort: AgeCohort) -> Vec<f64> {
    records
        .iter()
        .filter(|r| r.cohort() == cohort)
        .map(StayRecord::los_days)
        .collect()
}

/// Share of stays in each cohort.
pub fn cohort_proportions(records: &[StayRecord]) -> Result<CohortProportions> {
    if records.is_empty() {
        return Err(Error::config("cannot estimate cohort proportions from zero stays"));
    }
    let n = records.len() as f64;
    let share = |cohort: AgeCohort| {
        records.iter().filter(|r| r.cohort() == cohort).count() as f64 / n
    };
    let paediatric = share(AgeCohort::Paediatric);
    let adult = share(AgeCohort::Adult);
    // Senior takes the remainder so the three always sum to exactly 1.
    let senior = (1.0 - paediatric - adult).max(0.0);
    Ok(CohortProportions { paediatric, adult, senior })
}

/// Contiguous per-day arrival counts, plus a trailing rolling mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCounts {
    pub start: NaiveDate,
    pub counts: Vec<u32>,
}

impl DailyCounts {
    pub fn new(start: NaiveDate, counts: Vec<u32>) -> Self {
        DailyCounts { start, counts }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.start.checked_add_days(Days::new(index as u64))
    }

    pub fn range(&self) -> DateRange {
        let end = self.date(self.counts.len()).unwrap_or(self.start);
        DateRange::new(self.start, end)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| self.date(i).map(|d| (d, c)))
    }

    /// Counts restricted to `window`, with the dates that survived.
    pub fn restrict(&self, window: DateRange) -> DailyCounts {
        let mut kept = self.iter().filter(|(d, _)| window.contains(*d)).peekable();
        let start = kept.peek().map(|(d, _)| *d).unwrap_or(window.start);
        DailyCounts::new(start, kept.map(|(_, c)| c).collect())
    }

    pub fn rolling_mean(&self, window: usize) -> Vec<f64> {
        rolling_mean(&self.counts, window)
    }
}

/// Trailing mean over up to `window` values ending at each index.
/// The first few entries average over however many values exist so far.
pub fn rolling_mean(values: &[u32], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum: u64 = 0;
    for i in 0..values.len() {
        sum += values[i] as u64;
        if i >= window {
            sum -= values[i - window] as u64;
        }
        let n = (i + 1).min(window);
        out.push(sum as f64 / n as f64);
    }
    out
}

/// Count stays by the calendar day their episode started.
/// Days between the first and last start with no arrivals are present as zero.
pub fn daily_arrivals(records: &[StayRecord], option: StartTimeOption) -> DailyCounts {
    let mut dates: Vec<NaiveDate> =
        records.iter().map(|r| r.start_time(option).date()).collect();
    dates.sort_unstable();
    let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
        return DailyCounts::new(NaiveDate::MIN, Vec::new());
    };
    let mut counts = vec![0u32; (last - first).num_days() as usize + 1];
    for d in dates {
        counts[(d - first).num_days() as usize] += 1;
    }
    DailyCounts::new(first, counts)
}
