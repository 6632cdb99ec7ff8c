//! Common errors across the basin-setup crate

/// The errors that can stop processing of a single observation (or, for
/// `ConfigValidation`, a whole run). The contained strings describe what
/// went wrong in terms a user can act on; the underlying library error,
/// if any, is attached to the [`error_stack::Report`] carrying this value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GrmError {
    /// The reference topo (or a raster read back from the warp tool) is missing
    /// or lacks the expected spatial dimensions/variables.
    #[error("Could not read grid: {0}")]
    GridRead(String),
    /// The external warp (or rasterize) program could not be run or exited non-zero.
    #[error("Raster warp failed: {0}")]
    Warp(String),
    /// The incoming topo does not describe the same domain as the collection.
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),
    /// The collection was created for a different basin.
    #[error("Basin mismatch: {0}")]
    BasinMismatch(String),
    /// The collection covers a different water year than the observation.
    #[error("Water year mismatch: {0}")]
    WaterYearMismatch(String),
    /// The collection already holds a flight on the observation's date.
    #[error("Duplicate date: {0}")]
    DuplicateDate(String),
    /// The topo's basin mask does not belong to the requested basin.
    #[error("Mask name mismatch: {0}")]
    MaskNameMismatch(String),
    /// Creating, writing, or reading back the collection file failed.
    #[error("Collection I/O error: {0}")]
    StoreIo(String),
    /// No date could be determined for an observation.
    #[error("Could not determine date: {0}")]
    DateParse(String),
    /// Configuration or command line values are invalid.
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),
}

impl GrmError {
    pub fn grid_read<S: ToString>(msg: S) -> Self {
        Self::GridRead(msg.to_string())
    }

    pub fn warp<S: ToString>(msg: S) -> Self {
        Self::Warp(msg.to_string())
    }

    pub fn store_io<S: ToString>(msg: S) -> Self {
        Self::StoreIo(msg.to_string())
    }

    pub fn date_parse<S: ToString>(msg: S) -> Self {
        Self::DateParse(msg.to_string())
    }

    pub fn config<S: ToString>(msg: S) -> Self {
        Self::ConfigValidation(msg.to_string())
    }

    /// A short name for the kind of error, used in the batch summary.
    pub fn kind(&self) -> &'static str {
        match self {
            GrmError::GridRead(_) => "GridReadError",
            GrmError::Warp(_) => "WarpError",
            GrmError::DomainMismatch(_) => "DomainMismatchError",
            GrmError::BasinMismatch(_) => "BasinMismatchError",
            GrmError::WaterYearMismatch(_) => "WaterYearMismatchError",
            GrmError::DuplicateDate(_) => "DuplicateDateError",
            GrmError::MaskNameMismatch(_) => "MaskNameMismatchError",
            GrmError::StoreIo(_) => "StoreIOError",
            GrmError::DateParse(_) => "DateParseError",
            GrmError::ConfigValidation(_) => "ConfigValidationError",
        }
    }
}

/// Errors related to working with datetimes
#[derive(Debug, thiserror::Error)]
pub enum DateTimeError {
    #[error("Year {0}, month {1}, day {2} is not a valid date")]
    InvalidYearMonthDay(i32, u32, u32),
    #[error("Could not interpret '{0}' as a netCDF time units string")]
    InvalidTimeUnits(String),
    #[error("Unsupported calendar '{0}', only standard/gregorian calendars are supported")]
    UnsupportedCalendar(String),
    #[error("Time value {0} does not correspond to a representable date")]
    TimeValueOutOfRange(f64),
}
