//! Enums that classify a [`crate::measurement::Measurement`] or an
//! [`crate::calibration::EnergyCalibration`].
//!
//! As a general rule, enums derived straight from a file format's own
//! enumeration (e.g. [`EnergyCalType`]) carry an explicit `Invalid`/sentinel
//! variant so decoders can represent "not yet known" without an `Option`
//! wrapper at every call site; classification enums that are purely our own
//! invention (e.g. [`SourceType`]) get an `Unknown` variant instead.
use num::FromPrimitive;
#[cfg(any(feature = "to_json", feature = "serde"))]
use serde::{Deserialize, Serialize};

use crate::errors::*;

/// The energy (or FWHM) calibration type the calibration coefficients should
/// be interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum EnergyCalType {
    /// `E(i) = Σ c_k · i^k`, i zero-based channel index. Used in nearly all N42 files.
    Polynomial = 0,
    /// `x = i/N; E(i) = c0 + c1*x + c2*x^2 + c3*x^3 + c4/(1+60*x)`. Used by GADRAS/PCF.
    FullRangeFraction = 1,
    /// One energy per channel, tabulated directly.
    LowerChannelEdge = 2,
    /// Functionally Polynomial, but guessed rather than parsed from the file.
    UnspecifiedUsingDefaultPolynomial = 3,
    /// Placeholder for "no calibration known yet".
    InvalidEquationType = 4,
}

impl Default for EnergyCalType {
    fn default() -> Self {
        EnergyCalType::InvalidEquationType
    }
}

impl std::fmt::Display for EnergyCalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl EnergyCalType {
    pub fn new(source: u8) -> Result<Self, SpecError> {
        EnergyCalType::from_u8(source).ok_or_else(|| SpecError::ParseEnum {
            f: "EnergyCalType".to_string(),
            code: source as i64,
        })
    }
}

/// Classification of what a [`crate::measurement::Measurement`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum SourceType {
    IntrinsicActivity = 0,
    Calibration = 1,
    Background = 2,
    Foreground = 3,
    Unknown = 4,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Unknown
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl SourceType {
    pub fn new(source: u8) -> Result<Self, SpecError> {
        SourceType::from_u8(source).ok_or_else(|| SpecError::ParseEnum {
            f: "SourceType".to_string(),
            code: source as i64,
        })
    }
}

/// Data-quality classification of a measurement, as reported by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum QualityStatus {
    Good = 0,
    Suspect = 1,
    Bad = 2,
    Missing = 3,
}

impl Default for QualityStatus {
    fn default() -> Self {
        QualityStatus::Missing
    }
}

impl std::fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Portal/RPM occupancy state at the time of the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum Occupancy {
    Occupied = 0,
    NotOccupied = 1,
    Unknown = 2,
}

impl Default for Occupancy {
    fn default() -> Self {
        Occupancy::Unknown
    }
}

impl std::fmt::Display for Occupancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Instrument/detector family, guessed from manufacturer/model text during
/// consolidation when the decoder did not already know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum DetectorType {
    NaI = 0,
    HPGe = 1,
    LaBr3 = 2,
    CsI = 3,
    CZT = 4,
    PVT = 5,
    HeliumNeutron = 6,
    Unknown = 7,
}

impl Default for DetectorType {
    fn default() -> Self {
        DetectorType::Unknown
    }
}

impl std::fmt::Display for DetectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The closed enumeration of decoders the `Auto` driver knows how to try, in
/// the order it tries them when no format hint is given. `decode_by_tag` in
/// the `gamma-spec-in` crate keys a dispatch table off this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(C)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum DecoderFormat {
    N42_2012 = 0,
    N42_2006 = 1,
    Pcf = 2,
    Chn = 3,
    SpcBinary = 4,
    SpcAscii = 5,
    IaeaSpe = 6,
    Cnf = 7,
    ExploraniumGr130 = 8,
    ExploraniumGr135 = 9,
    CsvTxt = 10,
    Tka = 11,
    /// Reserved tags for vendor single-record formats not yet implemented
    /// (MCA, MPS, LIS, LZS, PHD, LSRM SPE, MultiAct, Micro-Raider, Aram,
    /// SRPM210 daily). Kept so the enumeration stays closed and exhaustive.
    Unimplemented = 12,
}

impl std::fmt::Display for DecoderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl DecoderFormat {
    /// All formats the `Auto` driver tries, in the order it tries them.
    pub fn all() -> &'static [DecoderFormat] {
        use DecoderFormat::*;
        &[
            N42_2012,
            N42_2006,
            Pcf,
            Chn,
            SpcBinary,
            SpcAscii,
            IaeaSpe,
            Cnf,
            ExploraniumGr130,
            ExploraniumGr135,
            Tka,
            CsvTxt,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_cal_type_round_trips_through_u8() {
        assert_eq!(EnergyCalType::new(0).unwrap(), EnergyCalType::Polynomial);
        assert_eq!(
            EnergyCalType::new(1).unwrap(),
            EnergyCalType::FullRangeFraction
        );
        assert!(EnergyCalType::new(200).is_err());
    }

    #[test]
    fn source_type_defaults_to_unknown() {
        assert_eq!(SourceType::default(), SourceType::Unknown);
    }

    #[test]
    fn decoder_format_all_excludes_unimplemented() {
        assert!(!DecoderFormat::all().contains(&DecoderFormat::Unimplemented));
    }
}
