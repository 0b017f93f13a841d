//! Network addresses: a segment number plus an optional physical sub-address.

use bytes::Bytes;
use commonware_utils::hex;
use std::fmt;

/// Segment number meaning "this segment, resolved by whoever reads the address".
pub const LOCAL_SEGMENT: u16 = 0;

/// Reserved segment number addressing every reachable segment.
pub const GLOBAL_SEGMENT: u16 = 0xFFFF;

/// Longest sub-address that fits behind a one-byte length prefix.
pub const MAX_MAC_LEN: usize = u8::MAX as usize;

/// A network address.
///
/// The sub-address (`mac`) is the address on the physical medium of the segment. A missing
/// sub-address means "every node of the segment".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    segment: u16,
    mac: Option<Bytes>,
}

impl Address {
    /// Create a new address.
    ///
    /// The global segment never carries a sub-address, so any `mac` supplied with it is dropped.
    /// An empty `mac` is treated as missing.
    ///
    /// # Panics
    ///
    /// Panics if `mac` is longer than [MAX_MAC_LEN].
    pub fn new(segment: u16, mac: Option<Bytes>) -> Self {
        let mac = match mac {
            _ if segment == GLOBAL_SEGMENT => None,
            Some(mac) if mac.is_empty() => None,
            Some(mac) => {
                assert!(mac.len() <= MAX_MAC_LEN, "sub-address too long: {}", mac.len());
                Some(mac)
            }
            None => None,
        };
        Self { segment, mac }
    }

    /// Address of a node on the local segment.
    pub fn local(mac: impl Into<Bytes>) -> Self {
        Self::new(LOCAL_SEGMENT, Some(mac.into()))
    }

    /// Address reaching every node on every reachable segment.
    pub const fn global() -> Self {
        Self {
            segment: GLOBAL_SEGMENT,
            mac: None,
        }
    }

    pub fn segment(&self) -> u16 {
        self.segment
    }

    pub fn mac(&self) -> Option<&Bytes> {
        self.mac.as_ref()
    }

    /// Returns `true` if this is the global broadcast address.
    pub fn is_global(&self) -> bool {
        self.segment == GLOBAL_SEGMENT
    }

    /// Returns `true` if the segment must be resolved by the receiver.
    pub fn is_local(&self) -> bool {
        self.segment == LOCAL_SEGMENT
    }

    /// Returns the same sub-address placed on `segment`.
    pub fn with_segment(&self, segment: u16) -> Self {
        Self::new(segment, self.mac.clone())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mac {
            Some(mac) => write!(f, "{}:{}", self.segment, hex(mac)),
            None => write!(f, "{}:*", self.segment),
        }
    }
}
