//! Error types for Rhythm board operations

use thiserror::Error;

/// Result type alias for Rhythm operations
pub type Result<T> = std::result::Result<T, RhythmError>;

/// Errors that can occur while driving the board
#[derive(Debug, Error)]
pub enum RhythmError {
    /// The transport for the requested board could not be opened
    #[error("Board {index} unavailable: {reason}")]
    TransportUnavailable {
        /// Board index that was requested
        index: u32,
        /// Reason reported by the transport
        reason: String,
    },

    /// A register read or write failed on the link
    #[error("Register I/O failed at device {device:#06x} offset {offset:#06x}: {reason}")]
    RegisterIo {
        /// Device id
        device: u16,
        /// Register offset
        offset: u16,
        /// Reason for failure
        reason: String,
    },

    /// A sample did not start with the header magic
    #[error("Header mismatch in sample {sample}: found {found:#018x}")]
    HeaderMismatch {
        /// Header value that was read
        found: u64,
        /// Sample number within the session
        sample: u64,
    },

    /// A sample payload was shorter than the layout requires
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameLength {
        /// Bytes required by the layout
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Discovered chips need more streams than the board has
    #[error("Detected chips need {required_streams} streams; board supports at most {max_channels} channels")]
    CapacityExceeded {
        /// Streams the detected chips would occupy
        required_streams: usize,
        /// Channel limit of the board
        max_channels: usize,
    },

    /// A parameter was outside its valid range
    #[error("{name} = {value} out of range (max {max})")]
    ArgumentOutOfRange {
        /// Parameter name
        name: &'static str,
        /// Value supplied
        value: i64,
        /// Largest accepted value
        max: i64,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Board in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// A bounded busy-poll gave up
    #[error("Status register still busy after {reads} reads")]
    Timeout {
        /// Reads performed before giving up
        reads: u32,
    },
}

impl RhythmError {
    /// Create a transport unavailable error
    pub fn transport_unavailable(index: u32, reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            index,
            reason: reason.into(),
        }
    }

    /// Create a register I/O error
    pub fn register_io(device: u16, offset: u16, reason: impl Into<String>) -> Self {
        Self::RegisterIo {
            device,
            offset,
            reason: reason.into(),
        }
    }

    /// Create an out-of-range error
    pub fn out_of_range(name: &'static str, value: impl Into<i64>, max: impl Into<i64>) -> Self {
        Self::ArgumentOutOfRange {
            name,
            value: value.into(),
            max: max.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Whether the error ends the current acquisition session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::HeaderMismatch { .. } | Self::FrameLength { .. } | Self::RegisterIo { .. }
        )
    }
}

/// Fail with [`RhythmError::ArgumentOutOfRange`] unless `value <= max`.
pub(crate) fn check_range(name: &'static str, value: impl Into<i64>, max: impl Into<i64>) -> Result<()> {
    let (value, max) = (value.into(), max.into());
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(RhythmError::ArgumentOutOfRange { name, value, max })
    }
}

/// [`check_range`] for indices and counts.
pub(crate) fn check_index(name: &'static str, value: usize, max: usize) -> Result<()> {
    let wide = |v: usize| i64::try_from(v).unwrap_or(i64::MAX);
    check_range(name, wide(value), wide(max))
}
