//! Assessment classification and indicator scoring engine.
//!
//! The [`assessment`] module holds the domain: point calculation, classification
//! resolution, commission relation aggregation, the classification and indicator
//! stores, batch orchestration and researcher ranking. The remaining modules carry
//! the service plumbing shared with the API binary.

pub mod assessment;
pub mod config;
pub mod error;
pub mod telemetry;
