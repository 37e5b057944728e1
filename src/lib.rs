//! Crime-risk scoring for points and walking routes.
//!
//! Three independent signals are fused into one score in [0, 1]: a pretrained
//! historical model keyed by H3 cell and weekday, the density of
//! risk-correlated venues nearby, and recent geolocated news events.

pub mod cache;
pub mod collectors;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fusion;
pub mod hotspots;
pub mod model;
pub mod poi;
pub mod route;
pub mod signal;
pub mod spatial;

pub use engine::RiskEngine;
pub use error::{Result, RiskError};
pub use fusion::{FusedResult, RiskBand};
pub use route::Segment;
pub use signal::SignalScore;
pub use spatial::Coordinate;
