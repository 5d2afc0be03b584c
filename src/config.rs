use std::time::Duration;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for the length-of-stay distribution fitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Samples with `|z| >= z_threshold` are discarded before fitting.
    pub z_threshold: f64,
    /// Wall-clock budget per family, in seconds.
    pub timeout_secs: f64,
    /// Bins of the density histogram the SSE is measured against.
    pub histogram_bins: usize,
    pub top_n: usize,
    /// Accepted range for a fit's implied std, as multiples of the sample std.
    pub std_band: (f64, f64),
    pub max_iterations: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            z_threshold: 3.0,
            timeout_secs: 10.0,
            histogram_bins: 100,
            top_n: 5,
            std_band: (0.75, 1.5),
            max_iterations: 2_000,
        }
    }
}

impl FitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.z_threshold > 0.0) {
            return Err(Error::config("z_threshold must be positive"));
        }
        if !(self.timeout_secs > 0.0) || !self.timeout_secs.is_finite() {
            return Err(Error::config("timeout_secs must be a positive number of seconds"));
        }
        if self.histogram_bins == 0 || self.top_n == 0 {
            return Err(Error::config("histogram_bins and top_n must be at least 1"));
        }
        let (lo, hi) = self.std_band;
        if !(lo >= 0.0 && lo < hi) {
            return Err(Error::config(format!("std_band ({lo}, {hi}) must satisfy 0 <= lo < hi")));
        }
        Ok(())
    }
}

/// Settings for the arrival-curve least-squares fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrivalFitConfig {
    /// Starting guess for the curve's scale, in days.
    pub initial_scale: f64,
    /// Trailing window of the rolling mean used to seed the fit.
    pub rolling_window: usize,
    pub max_iterations: u64,
}

impl Default for ArrivalFitConfig {
    fn default() -> Self {
        ArrivalFitConfig { initial_scale: 14.0, rolling_window: 7, max_iterations: 5_000 }
    }
}

/// When within its day a generated patient formally arrives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalTiming {
    /// Uniformly random fraction of the day.
    Uniform,
    /// Every patient arrives at this fraction of the day, in `[0, 1)`.
    Fixed(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Standard deviation of the multiplicative normal jitter on daily batch sizes.
    pub batch_jitter_sd: f64,
    pub arrival_timing: ArrivalTiming,
    /// Extra days simulated after the last scenario day so stays can drain.
    pub drain_days: u32,
    pub n_runs: usize,
    /// Root of every run's seed; see [`SimulationConfig::run_seed`].
    pub base_seed: u64,
    /// Worker threads for Monte-Carlo runs; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            batch_jitter_sd: 0.05,
            arrival_timing: ArrivalTiming::Uniform,
            drain_days: 0,
            n_runs: 30,
            base_seed: 0,
            threads: None,
        }
    }
}

impl SimulationConfig {
    /// Demo settings used by the CLI when no snapshot is supplied.
    pub fn canonical() -> Self {
        SimulationConfig { base_seed: 42, drain_days: 14, ..SimulationConfig::default() }
    }

    /// Seed of Monte-Carlo run `run`: the first word of stream `run` of a
    /// ChaCha20 generator keyed by `base_seed`. Nearby base seeds give
    /// unrelated run seeds.
    pub fn run_seed(&self, run: u64) -> u64 {
        let mut rng = ChaCha20Rng::seed_from_u64(self.base_seed);
        rng.set_stream(run);
        rng.next_u64()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.batch_jitter_sd >= 0.0) || !self.batch_jitter_sd.is_finite() {
            return Err(Error::config(format!(
                "batch_jitter_sd must be finite and >= 0, got {}",
                self.batch_jitter_sd
            )));
        }
        if let ArrivalTiming::Fixed(f) = self.arrival_timing
            && !(0.0..1.0).contains(&f)
        {
            return Err(Error::config(format!("fixed arrival fraction must be in [0, 1), got {f}")));
        }
        if self.n_runs == 0 {
            return Err(Error::config("n_runs must be at least 1"));
        }
        if self.threads == Some(0) {
            return Err(Error::config("threads must be at least 1 when given"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_seeds_do_not_overlap_for_adjacent_base_seeds() {
        let a = SimulationConfig { base_seed: 7, ..SimulationConfig::default() };
        let b = SimulationConfig { base_seed: 8, ..SimulationConfig::default() };
        let seeds_a: Vec<u64> = (0..100).map(|i| a.run_seed(i)).collect();
        let seeds_b: Vec<u64> = (0..100).map(|i| b.run_seed(i)).collect();
        assert!(seeds_a.iter().all(|s| !seeds_b.contains(s)));
        assert_eq!(a.run_seed(3), a.clone().run_seed(3));
        assert_ne!(a.run_seed(0), a.run_seed(1));
    }

    #[test]
    fn defaults_match_documented_values() {
        let fit = FitConfig::default();
        assert_eq!(fit.z_threshold, 3.0);
        assert_eq!(fit.timeout(), Duration::from_secs(10));
        assert_eq!(fit.top_n, 5);
        assert_eq!(fit.std_band, (0.75, 1.5));
        let sim = SimulationConfig::default();
        assert_eq!(sim.batch_jitter_sd, 0.05);
        assert_eq!(sim.n_runs, 30);
        assert_eq!(ArrivalFitConfig::default().initial_scale, 14.0);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let sim: SimulationConfig = serde_json::from_str(r#"{"n_runs": 5}"#).unwrap();
        assert_eq!(sim.n_runs, 5);
        assert_eq!(sim.arrival_timing, ArrivalTiming::Uniform);
        let timing: ArrivalTiming = serde_json::from_str(r#"{"fixed": 0.25}"#).unwrap();
        assert_eq!(timing, ArrivalTiming::Fixed(0.25));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let sim = SimulationConfig { batch_jitter_sd: -0.1, ..SimulationConfig::default() };
        assert!(sim.validate().is_err());
        let sim = SimulationConfig { arrival_timing: ArrivalTiming::Fixed(1.0), ..SimulationConfig::default() };
        assert!(sim.validate().is_err());
        let sim = SimulationConfig { n_runs: 0, ..SimulationConfig::default() };
        assert!(sim.validate().is_err());
        assert!(SimulationConfig::canonical().validate().is_ok());

        let fit = FitConfig { std_band: (1.5, 0.75), ..FitConfig::default() };
        assert!(fit.validate().is_err());
        assert!(FitConfig::default().validate().is_ok());
    }
}
