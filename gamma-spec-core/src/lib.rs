//! Canonical data model, energy-calibration algebra and cubic-spline engine
//! for gamma/neutron spectrum files (components C1-C5 plus the C9 CALp
//! side-format and the ambient error/settings stack).
//!
//! This crate is the foundation for `gamma-spec-in` (format decoders) and
//! `gamma-spec-out` (format encoders, HTML chart export); it can be built
//! either with serialization support or without it (see features).
#![allow(clippy::derive_partial_eq_without_eq)]
extern crate num;
#[macro_use]
extern crate num_derive;

#[cfg(any(feature = "to_json", feature = "serde"))]
extern crate serde;
#[cfg(feature = "to_json")]
extern crate serde_json;

pub mod calibration;
pub mod calp;
pub mod enums;
pub mod errors;
pub mod measurement;
pub mod settings;
pub mod specfile;
pub mod spline;

pub use calibration::EnergyCalibration;
pub use enums::*;
pub use errors::SpecError;
pub use measurement::Measurement;
pub use settings::SpecFileSettings;
pub use specfile::{AnalysisResult, DetectorAnalysis, SpecFile};
