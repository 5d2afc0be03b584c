use rand::Rng;
use serde::Serialize;

use crate::distributions::LosModel;
use crate::error::{Error, Result};
use crate::types::{AgeCohort, CohortProportions, PatientId, PerCohort, SimTime};

/// Uncapped counter of concurrently held beds. Measures demand; never blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourcePool {
    claimed: u32,
}

impl ResourcePool {
    pub fn claimed(&self) -> u32 {
        self.claimed
    }

    pub fn acquire(&mut self) {
        self.claimed += 1;
    }

    pub fn release(&mut self) {
        debug_assert!(self.claimed > 0, "release without matching acquire");
        self.claimed = self.claimed.saturating_sub(1);
    }
}

/// The global bed pool plus one sub-pool per cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BedPools {
    pub total: ResourcePool,
    pub paediatric: ResourcePool,
    pub adult: ResourcePool,
    pub senior: ResourcePool,
}

impl BedPools {
    pub fn cohort(&self, cohort: AgeCohort) -> &ResourcePool {
        match cohort {
            AgeCohort::Paediatric => &self.paediatric,
            AgeCohort::Adult => &self.adult,
            AgeCohort::Senior => &self.senior,
        }
    }

    fn cohort_mut(&mut self, cohort: AgeCohort) -> &mut ResourcePool {
        match cohort {
            AgeCohort::Paediatric => &mut self.paediatric,
            AgeCohort::Adult => &mut self.adult,
            AgeCohort::Senior => &mut self.senior,
        }
    }

    /// Global pool first, then the cohort's sub-pool.
    pub fn acquire(&mut self, cohort: AgeCohort) {
        self.total.acquire();
        self.cohort_mut(cohort).acquire();
    }

    /// Reverse of `acquire`.
    pub fn release(&mut self, cohort: AgeCohort) {
        self.cohort_mut(cohort).release();
        self.total.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatientState {
    Generated,
    AwaitingEntry,
    Admitted,
    Discharged,
}

/// One simulated patient, driven through its states by the engine's events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub id: PatientId,
    pub state: PatientState,
    pub generated_at: SimTime,
    pub admitted_at: Option<SimTime>,
    pub cohort: Option<AgeCohort>,
    /// Bed-hold duration in days, after clamping.
    pub los: Option<f64>,
}

impl Patient {
    pub fn generate(id: PatientId, at: SimTime) -> Self {
        Patient {
            id,
            state: PatientState::Generated,
            generated_at: at,
            admitted_at: None,
            cohort: None,
            los: None,
        }
    }

    /// Start the intra-day wait of `wait` days. Returns the arrival instant.
    pub fn await_entry(&mut self, wait: f64) -> SimTime {
        debug_assert_eq!(self.state, PatientState::Generated);
        self.state = PatientState::AwaitingEntry;
        self.generated_at.offset(wait)
    }

    /// Enter hospital at `now`: draw a cohort, draw a stay from that
    /// cohort's model and take a bed in both pools. Returns the discharge instant.
    pub fn admit(
        &mut self,
        now: SimTime,
        proportions: &CohortProportions,
        models: &PerCohort<LosModel>,
        pools: &mut BedPools,
        rng: &mut impl Rng,
    ) -> Result<SimTime> {
        debug_assert_eq!(self.state, PatientState::AwaitingEntry);
        let cohort = proportions.draw(rng.random::<f64>());
        let los = hold_duration(models.get(cohort).sample(rng), cohort)?;
        pools.acquire(cohort);
        self.state = PatientState::Admitted;
        self.admitted_at = Some(now);
        self.cohort = Some(cohort);
        self.los = Some(los);
        Ok(now.offset(los))
    }

    pub fn discharge(&mut self, pools: &mut BedPools) {
        debug_assert_eq!(self.state, PatientState::Admitted);
        if let Some(cohort) = self.cohort {
            pools.release(cohort);
        }
        self.state = PatientState::Discharged;
    }
}

/// Turn a raw LoS draw into a bed-hold duration: negative draws hold for
/// zero days, and a NaN or infinite draw is a fatal error.
pub fn hold_duration(drawn: f64, cohort: AgeCohort) -> Result<f64> {
    if !drawn.is_finite() {
        return Err(Error::NonNumericLos { cohort, value: drawn });
    }
    Ok(drawn.max(0.0))
}
