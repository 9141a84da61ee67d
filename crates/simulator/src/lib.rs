//! EDA-Lab Simulator
//!
//! Synthesizes banking events and drives them through the producer at a
//! fixed rate. One run at a time per scheduler.

pub mod error;
pub mod fake;
pub mod generator;
pub mod scheduler;

pub use error::SimulationError;
pub use fake::FakeData;
pub use generator::{EventGenerator, DEFAULT_POOL_CAPACITY};
pub use scheduler::{
    parse_event_type, ProduceReport, RunStatus, SimulationConfig, SimulationScheduler,
    SimulationStatus,
};
