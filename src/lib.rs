//! Bed-demand forecasting for respiratory outbreaks.
//!
//! Historical stays are turned into per-cohort length-of-stay models and an
//! arrival curve; a discrete-event simulation replays a chosen arrival
//! scenario many times and reduces the runs to daily occupancy quantiles.

pub mod arrival_fit;
pub mod config;
pub mod distributions;
pub mod error;
pub mod events;
pub mod jobs;
pub mod los_fit;
pub mod monte_carlo;
pub mod patient;
pub mod pipeline;
pub mod records;
pub mod scenario;
pub mod simulation;
pub mod snapshot;
pub mod types;

pub use error::{Error, Result};
