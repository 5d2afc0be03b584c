use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{Days, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ArrivalTiming, SimulationConfig};
use crate::distributions::LosModel;
use crate::error::{Error, Result};
use crate::events::{Event, SimEvent};
use crate::patient::{BedPools, Patient};
use crate::scenario::ArrivalScenario;
use crate::types::{AgeCohort, CohortProportions, PatientId, PerCohort, SimTime};

/// Which occupancy series a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Series {
    Total,
    Paediatric,
    Adult,
    Senior,
}

impl Series {
    pub const ALL: [Series; 4] = [Series::Total, Series::Paediatric, Series::Adult, Series::Senior];

    pub fn of(cohort: AgeCohort) -> Self {
        match cohort {
            AgeCohort::Paediatric => Series::Paediatric,
            AgeCohort::Adult => Series::Adult,
            AgeCohort::Senior => Series::Senior,
        }
    }
}

/// Beds held at one instant, overall and per cohort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub total: u32,
    pub paediatric: u32,
    pub adult: u32,
    pub senior: u32,
}

impl Occupancy {
    fn from_pools(pools: &BedPools) -> Self {
        Occupancy {
            total: pools.total.claimed(),
            paediatric: pools.paediatric.claimed(),
            adult: pools.adult.claimed(),
            senior: pools.senior.claimed(),
        }
    }

    pub fn get(&self, series: Series) -> u32 {
        match series {
            Series::Total => self.total,
            Series::Paediatric => self.paediatric,
            Series::Adult => self.adult,
            Series::Senior => self.senior,
        }
    }

    fn max(self, other: Occupancy) -> Occupancy {
        Occupancy {
            total: self.total.max(other.total),
            paediatric: self.paediatric.max(other.paediatric),
            adult: self.adult.max(other.adult),
            senior: self.senior.max(other.senior),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyOccupancy {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub occupancy: Occupancy,
}

/// One stochastic trajectory resampled to a daily grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub seed: u64,
    pub patients: usize,
    pub days: Vec<DailyOccupancy>,
}

impl SimulationRun {
    pub fn series(&self, series: Series) -> Vec<u32> {
        self.days.iter().map(|d| d.occupancy.get(series)).collect()
    }

    pub fn peak(&self, series: Series) -> u32 {
        self.days.iter().map(|d| d.occupancy.get(series)).max().unwrap_or(0)
    }
}

pub struct Simulation<'a> {
    queue: BinaryHeap<Reverse<SimEvent>>,
    /// Dispatched events, kept only when enabled with `with_event_log`.
    pub log: Option<Vec<SimEvent>>,
    rng: ChaCha20Rng,
    seed: u64,
    /// Events at or after this instant are not processed.
    horizon: SimTime,
    next_seq: u64,
    scenario: &'a ArrivalScenario,
    models: &'a PerCohort<LosModel>,
    proportions: &'a CohortProportions,
    config: &'a SimulationConfig,
    jitter: Option<Normal<f64>>,
    patients: Vec<Patient>,
    pub pools: BedPools,
    /// Occupancy after all events at each distinct event time.
    trace: Vec<(SimTime, Occupancy)>,
}

impl<'a> Simulation<'a> {
    pub fn new(
        scenario: &'a ArrivalScenario,
        models: &'a PerCohort<LosModel>,
        proportions: &'a CohortProportions,
        config: &'a SimulationConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        proportions.validate()?;
        for (cohort, model) in models.iter() {
            model
                .validate()
                .map_err(|e| Error::config(format!("{cohort} length-of-stay model: {e}")))?;
        }
        let jitter = if config.batch_jitter_sd > 0.0 {
            let normal = Normal::new(1.0, config.batch_jitter_sd)
                .map_err(|e| Error::config(format!("batch jitter: {e}")))?;
            Some(normal)
        } else {
            None
        };
        let horizon = SimTime((scenario.len() + config.drain_days as usize) as f64);

        Ok(Simulation {
            queue: BinaryHeap::new(),
            log: None,
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
            horizon,
            next_seq: 0,
            scenario,
            models,
            proportions,
            config,
            jitter,
            patients: Vec::new(),
            pools: BedPools::default(),
            trace: vec![(SimTime::ZERO, Occupancy::default())],
        })
    }

    /// Record every dispatched event (used in tests and debugging).
    pub fn with_event_log(mut self) -> Self {
        self.log = Some(Vec::new());
        self
    }

    /// Number of whole days on the output grid.
    pub fn horizon_days(&self) -> usize {
        self.horizon.0 as usize
    }

    pub fn schedule(&mut self, time: SimTime, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(SimEvent { time, seq, event }));
    }

    /// Run to the horizon and resample the occupancy trace to days.
    /// Call once per `Simulation`.
    pub fn run(&mut self) -> Result<SimulationRun> {
        self.schedule(SimTime::ZERO, Event::GenerateBatch { day: 0 });

        while let Some(Reverse(next)) = self.queue.peek() {
            if next.time >= self.horizon {
                break;
            }
            let Some(Reverse(ev)) = self.queue.pop() else { break };
            if let Some(log) = self.log.as_mut() {
                log.push(ev.clone());
            }
            self.dispatch(ev.time, ev.event)?;
        }

        let days = self.daily();
        debug!(
            seed = self.seed,
            patients = self.patients.len(),
            peak = days.iter().map(|d| d.occupancy.total).max().unwrap_or(0),
            "run complete"
        );
        Ok(SimulationRun { seed: self.seed, patients: self.patients.len(), days })
    }

    fn dispatch(&mut self, now: SimTime, event: Event) -> Result<()> {
        match event {
            Event::GenerateBatch { day } => {
                self.generate_batch(now, day);
            }

            Event::PatientArrives { patient } => {
                let p = &mut self.patients[patient.0 as usize];
                let discharge_at =
                    p.admit(now, self.proportions, self.models, &mut self.pools, &mut self.rng)?;
                self.schedule(discharge_at, Event::PatientDischarged { patient });
                self.record(now);
            }

            Event::PatientDischarged { patient } => {
                self.patients[patient.0 as usize].discharge(&mut self.pools);
                self.record(now);
            }
        }
        Ok(())
    }

    fn generate_batch(&mut self, now: SimTime, day: usize) {
        let expected = self.scenario.expected(day).unwrap_or(0.0);
        let factor = match &self.jitter {
            Some(normal) => normal.sample(&mut self.rng),
            None => 1.0,
        };
        let count = (expected * factor).round().max(0.0) as u64;

        for _ in 0..count {
            let id = PatientId(self.patients.len() as u64);
            let mut patient = Patient::generate(id, now);
            let wait = match self.config.arrival_timing {
                ArrivalTiming::Uniform => self.rng.random::<f64>(),
                ArrivalTiming::Fixed(f) => f,
            };
            let arrive_at = patient.await_entry(wait);
            self.patients.push(patient);
            self.schedule(arrive_at, Event::PatientArrives { patient: id });
        }

        if day + 1 < self.scenario.len() {
            self.schedule(now.offset(1.0), Event::GenerateBatch { day: day + 1 });
        }
    }

    fn record(&mut self, now: SimTime) {
        let level = Occupancy::from_pools(&self.pools);
        match self.trace.last_mut() {
            Some((t, occ)) if *t == now => *occ = level,
            _ => self.trace.push((now, level)),
        }
    }

    /// Each day's value is the maximum of the occupancy step function over
    /// `[d, d + 1)`. The level carried in from the previous day counts only
    /// when nothing changes exactly at midnight.
    fn daily(&self) -> Vec<DailyOccupancy> {
        let start = self.scenario.start();
        let mut out = Vec::with_capacity(self.horizon_days());
        let mut carried = Occupancy::default();
        let mut i = 0;
        for d in 0..self.horizon_days() {
            let (lo, hi) = (d as f64, (d + 1) as f64);
            let mut day_max = match self.trace.get(i) {
                Some((t, _)) if t.0 == lo => None,
                _ => Some(carried),
            };
            while let Some(&(t, level)) = self.trace.get(i)
                && t.0 < hi
            {
                day_max = Some(day_max.map_or(level, |m| m.max(level)));
                carried = level;
                i += 1;
            }
            let Some(date) = start.checked_add_days(Days::new(d as u64)) else { break };
            out.push(DailyOccupancy { date, occupancy: day_max.unwrap_or(carried) });
        }
        out
    }
}

/// Run one simulation of `scenario` with `seed`.
pub fn run(
    scenario: &ArrivalScenario,
    models: &PerCohort<LosModel>,
    proportions: &CohortProportions,
    config: &SimulationConfig,
    seed: u64,
) -> Result<SimulationRun> {
    Simulation::new(scenario, models, proportions, config, seed)?.run()
}
