//! Client identity.
//!
//! Historically this module also carried the message envelope and the TCP/UDP
//! connection wrappers; those moved to [`crate::wire`] (codec) and
//! [`crate::transport`] (per-peer sequencing/reliability) once the protocol
//! became a fixed binary framing instead of JSON-over-length-prefix.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client. Wire-encoded as `u16`; values
/// above `u16::MAX` are rejected by the codec before they ever hit the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_increase() {
        let a = ClientId::new_unique();
        let b = ClientId::new_unique();
        assert!(b.0 > a.0);
    }
}
