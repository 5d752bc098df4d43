//! The PCA301 wire protocol: frame codec plus the stateful engine that
//! drives it over a radio.

pub mod engine;
pub mod frame;

pub use engine::{Announce, CommandOutcome, Config as EngineConfig, Engine, PcaRadio, Stats as EngineStats};
pub use frame::Frame;
