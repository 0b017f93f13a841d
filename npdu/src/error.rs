//! Error types for frame decoding

use thiserror::Error;

/// Error type for frame decoding
#[derive(Error, Debug)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
}
