//! Crate-wide error taxonomy for the energy-calibration engine and the canonical
//! record/file model. Format decoders and encoders in the sibling crates reuse
//! this same enum rather than minting their own.

/// Basic error types covering the calibration engine, the record/file model
/// and the bits that the format crates build on top of.
#[derive(Debug)]
pub enum SpecError {
    /// Input to the cubic-spline engine was not sorted, or had fewer than two points.
    SplineNotSorted { msg: String },
    /// Malformed input to a format decoder; the decoder has already rewound its stream.
    ParseError { msg: String },
    /// Calibration coefficients/channel-count/deviation-pairs failed validation.
    InvalidCalibration { msg: String },
    /// Two operands (rebin, set_calibration, combine, truncate) disagree on channel count.
    IncompatibleShape { expected: usize, got: usize },
    /// Query by (sample, detector) found nothing.
    NotFound { msg: String },
    /// A writer could not emit its output.
    OutputError { msg: String },
    /// A mutation was requested that would violate a file-level invariant
    /// (e.g. renaming a detector to a name already in use).
    DomainViolation { msg: String },
    /// A fixed-width binary field could not be converted (short read, bad byte count).
    BitConversionError { msg: String },
    /// IoError from the std library.
    Io(std::io::Error),
    /// TryFromSliceError from the std library, surfacing through binary decoders.
    TryFromSlice(std::array::TryFromSliceError),
    /// Enum creation error (unrecognised discriminant read from a binary/text field).
    ParseEnum { f: String, code: i64 },
    #[cfg(feature = "to_json")]
    /// Serialisation/Deserialisation error.
    SerdeError(serde_json::Error),
}

impl From<std::array::TryFromSliceError> for SpecError {
    fn from(e: std::array::TryFromSliceError) -> Self {
        Self::TryFromSlice(e)
    }
}

impl From<std::io::Error> for SpecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for SpecError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use self::SpecError::*;
        match self {
            #[cfg(feature = "to_json")]
            SerdeError(x) => write!(fmt, "{}", x),
            Io(x) => write!(fmt, "{}", x),
            TryFromSlice(x) => write!(fmt, "{}", x),
            SplineNotSorted { msg } => write!(fmt, "Cubic spline input not sorted: {}", msg),
            ParseError { msg } => write!(fmt, "Parse error: {}", msg),
            InvalidCalibration { msg } => write!(fmt, "Invalid energy calibration: {}", msg),
            IncompatibleShape { expected, got } => write!(
                fmt,
                "Incompatible channel counts: expected {}, got {}",
                expected, got
            ),
            NotFound { msg } => write!(fmt, "Not found: {}", msg),
            OutputError { msg } => write!(fmt, "Output error: {}", msg),
            DomainViolation { msg } => write!(fmt, "Domain violation: {}", msg),
            BitConversionError { msg } => write!(fmt, "Bit conversion failed: {}", msg),
            ParseEnum { f, code } => write!(fmt, "Could not parse source ({}) to {}.", code, f),
        }
    }
}

impl From<SpecError> for String {
    fn from(e: SpecError) -> String {
        e.to_string()
    }
}

impl std::error::Error for SpecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use self::SpecError::*;
        match self {
            #[cfg(feature = "to_json")]
            SerdeError(x) => x.source(),
            Io(x) => x.source(),
            TryFromSlice(x) => x.source(),
            _ => None,
        }
    }
}
