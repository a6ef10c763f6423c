//! Read-only health counters for one endpoint.
//!
//! The original kept these as a handful of global mutable counters scraped by
//! an external overlay. Here they're a plain struct owned by whichever
//! [`crate::transport::Transport`]/server loop/client loop updates them, with
//! no publishing step of its own — a host application or test can read the
//! fields directly.

/// Counters a client or server accumulates over its lifetime. All fields are
/// monotonically increasing; there is no reset other than replacing the
/// struct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Datagrams that failed to decode, by any [`crate::wire::DecodeError`] variant.
    pub decode_errors: u64,
    /// Reliable messages retransmitted after their timeout elapsed.
    pub retransmits: u64,
    /// Datagrams dropped because their header sequence was already seen.
    pub duplicate_datagrams: u64,
    /// Input frames or other client messages dropped by rate limiting.
    pub rate_limit_drops: u64,
    /// Reconciliation corrections that snapped the predicted state instantly.
    pub reconciliation_snaps: u64,
    /// Reconciliation corrections that blended the predicted state smoothly.
    pub reconciliation_blends: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    pub fn record_retransmit(&mut self) {
        self.retransmits += 1;
    }

    pub fn record_duplicate_datagram(&mut self) {
        self.duplicate_datagrams += 1;
    }

    pub fn record_rate_limit_drop(&mut self) {
        self.rate_limit_drops += 1;
    }

    /// Folds a [`crate::predict::CorrectionKind`]-shaped outcome into the
    /// snap/blend counters. Takes a bool rather than the client-side type
    /// itself, since `engine_shared` doesn't depend on `engine_client`.
    pub fn record_reconciliation(&mut self, snapped: bool) {
        if snapped {
            self.reconciliation_snaps += 1;
        } else {
            self.reconciliation_blends += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.decode_errors, 0);

        diag.record_decode_error();
        diag.record_decode_error();
        diag.record_retransmit();
        diag.record_duplicate_datagram();
        diag.record_rate_limit_drop();
        diag.record_reconciliation(true);
        diag.record_reconciliation(false);

        assert_eq!(diag.decode_errors, 2);
        assert_eq!(diag.retransmits, 1);
        assert_eq!(diag.duplicate_datagrams, 1);
        assert_eq!(diag.rate_limit_drops, 1);
        assert_eq!(diag.reconciliation_snaps, 1);
        assert_eq!(diag.reconciliation_blends, 1);
    }
}
