//! Encode and decode network-layer frames of a building-automation field bus.
//!
//! A frame is a header ([Header]) followed by a payload. The header carries the protocol
//! version, routing information (destination, source, hop count) and, for network-layer
//! messages, the [MessageType]. Everything after the header is returned untouched.
//!
//! # Example
//!
//! ```rust
//! use bacnet_npdu::{decode, encode, Address, Destination, Header, DEFAULT_HOP_COUNT};
//!
//! let header = Header {
//!     destination: Some(Destination::new(&Address::global(), DEFAULT_HOP_COUNT)),
//!     ..Default::default()
//! };
//! let frame = encode(&header, b"payload");
//! let (decoded, payload) = decode(frame).unwrap();
//! assert_eq!(decoded, header);
//! assert_eq!(&payload[..], b"payload");
//! ```

pub mod address;
pub mod envelope;
pub mod error;
pub mod header;
pub mod message;

pub use address::{Address, GLOBAL_SEGMENT, LOCAL_SEGMENT, MAX_MAC_LEN};
pub use envelope::Envelope;
pub use error::Error;
pub use header::{Destination, Header, Priority, Source, DEFAULT_HOP_COUNT, VERSION};
pub use message::{IAmRouterToNetwork, MessageType, NetworkNumberIs, WhoIsRouterToNetwork};

use bytes::{BufMut, Bytes, BytesMut};
use commonware_codec::{EncodeSize, ReadExt, Write};

/// Writes `header` followed by `payload`.
pub fn encode(header: &Header, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(header.encode_size() + payload.len());
    header.write(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Reads a header from `frame` and returns it with the remaining bytes.
///
/// Fails with [Error::InvalidVersion] if the frame is not version 1, before anything else
/// is read.
pub fn decode(mut frame: Bytes) -> Result<(Header, Bytes), Error> {
    if let Some(&version) = frame.first() {
        if version != VERSION {
            return Err(Error::InvalidVersion(version));
        }
    }
    let header = Header::read(&mut frame)?;
    Ok((header, frame))
}
