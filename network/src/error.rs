use bacnet_npdu::Address;
use thiserror::Error;

/// Errors that can occur when routing messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid segment: {0}")]
    InvalidSegment(u16),
    #[error("invalid port: {0}")]
    InvalidPort(u16),
    #[error("no room for more routes")]
    NoRoomForRoutes,
    #[error("router provided for local recipient {0}")]
    RouterForLocalRecipient(Address),
    #[error("medium serves segment {expected}, not {actual}")]
    WrongSegment { expected: u16, actual: u16 },
    #[error("sub-address already attached: {0}")]
    DuplicateMac(String),
    #[error("no route to segment {0}")]
    Unroutable(u16),
    #[error("codec error: {0}")]
    Codec(#[from] bacnet_npdu::Error),
    #[error("frame too large: {0}")]
    FrameTooLarge(usize),
    #[error("closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("unable to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}
