use crate::Match;

/// Receives a record of every tracked resolution.
///
/// The client does not depend on the sink succeeding; implementations that ship matches elsewhere
/// should buffer and return quickly since they run on the caller's thread.
pub trait TelemetrySink {
    /// Record one resolution.
    fn on_match(&self, m: &Match);
}

/// Discards all matches.
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_match(&self, _m: &Match) {}
}

impl<T: Fn(&Match)> TelemetrySink for T {
    fn on_match(&self, m: &Match) {
        self(m);
    }
}
