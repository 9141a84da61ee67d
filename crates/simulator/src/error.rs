//! Simulation errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("Simulation already running: {id}")]
    AlreadyRunning { id: String },

    #[error("No simulation is running")]
    NotRunning,

    #[error("Rate {rate}/s is out of range (at most {max}/s)")]
    InvalidRate { rate: u32, max: u32 },

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),
}
