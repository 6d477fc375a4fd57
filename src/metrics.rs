//! Metric names and recording helpers.
//!
//! All helpers compile to no-ops when the `metrics` feature is disabled, so
//! callers never need their own feature gates.

/// Gauge: connections currently attached (either engine).
pub const CONNECTIONS_ACTIVE: &str = "subwire_connections_active";
/// Counter: frames processed, labelled by `direction`.
pub const FRAMES_PROCESSED: &str = "subwire_frames_processed_total";
/// Counter: protocol, encode, and hook errors observed.
pub const ERRORS_TOTAL: &str = "subwire_errors_total";

/// Direction label for frame counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frame received from the peer.
    Inbound,
    /// Frame sent to the peer.
    Outbound,
}

#[cfg(feature = "metrics")]
impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Record a connection becoming active.
pub fn connection_opened() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection going away.
pub fn connection_closed() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record one processed frame.
pub fn frame_processed(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record one observed error.
pub fn error_recorded() {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL).increment(1);
}
