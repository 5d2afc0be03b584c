use thiserror::Error;

use crate::scenario::ScenarioError;
use crate::types::AgeCohort;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Scenario curve parameters rejected; the message is meant for the end user.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("no length-of-stay values remain after outlier removal")]
    EmptySample,

    #[error("no arrivals fall inside the fitting window")]
    NoArrivals,

    /// A LoS draw came back NaN or infinite. Aborts the run.
    #[error("{cohort} length-of-stay model produced a non-numeric draw ({value})")]
    NonNumericLos { cohort: AgeCohort, value: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("optimizer failed: {0}")]
    Optimizer(String),

    #[error("job '{name}' failed: {message}")]
    JobFailed { name: String, message: String },

    /// A line of an NDJSON input failed to parse. `line` is 1-based.
    #[error("line {line}: {source}")]
    Ndjson { line: usize, source: serde_json::Error },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
