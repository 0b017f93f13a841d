//! Protocol control information carried in front of every frame.
//!
//! # Format
//!
//! ```txt
//! version      u8                        always 1
//! control      u8                        flags, see below
//! dnet         u16                       if destination present
//! dlen, dadr   u8 + dlen bytes           if destination present (0 = every node)
//! snet         u16                       if source present
//! slen, sadr   u8 + slen bytes           if source present
//! hop count    u8                        if destination present
//! type         u8                        if network message
//! vendor       u16                       if type >= 0x80
//! ```
//!
//! Control flags: `0x80` network message, `0x20` destination present, `0x08` source
//! present, `0x04` expects reply, `0x03` priority.

use crate::{Address, MessageType, MAX_MAC_LEN};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};

/// The only protocol version understood.
pub const VERSION: u8 = 1;

/// Hop count given to frames that enter the routed network.
pub const DEFAULT_HOP_COUNT: u8 = 0xFF;

const NETWORK_MESSAGE: u8 = 0x80;
const DESTINATION: u8 = 0x20;
const SOURCE: u8 = 0x08;
const EXPECTS_REPLY: u8 = 0x04;
const PRIORITY: u8 = 0x03;

/// Writes a sub-address as a length byte followed by its bytes. A missing sub-address is
/// written as a zero length.
///
/// # Panics
///
/// Panics if `mac` is longer than [MAX_MAC_LEN].
fn write_mac(mac: Option<&Bytes>, buf: &mut impl BufMut) {
    let mac = mac.map_or(&[][..], |mac| &mac[..]);
    assert!(mac.len() <= MAX_MAC_LEN, "sub-address too long: {}", mac.len());
    (mac.len() as u8).write(buf);
    buf.put_slice(mac);
}

fn mac_size(mac: Option<&Bytes>) -> usize {
    u8::SIZE + mac.map_or(0, Bytes::len)
}

/// Reads a length-prefixed sub-address. A zero length yields `None`.
fn read_mac(buf: &mut impl Buf) -> Result<Option<Bytes>, Error> {
    let len = u8::read(buf)? as usize;
    if len == 0 {
        return Ok(None);
    }
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(Some(buf.copy_to_bytes(len)))
}

/// Network priority of a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
    CriticalEquipment,
    LifeSafety,
}

impl Priority {
    fn bits(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Urgent => 1,
            Self::CriticalEquipment => 2,
            Self::LifeSafety => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & PRIORITY {
            0 => Self::Normal,
            1 => Self::Urgent,
            2 => Self::CriticalEquipment,
            _ => Self::LifeSafety,
        }
    }
}

/// Final destination of a routed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub segment: u16,
    pub mac: Option<Bytes>,
    pub hop_count: u8,
}

impl Destination {
    pub fn new(address: &Address, hop_count: u8) -> Self {
        Self {
            segment: address.segment(),
            mac: address.mac().cloned(),
            hop_count,
        }
    }

    pub fn address(&self) -> Address {
        Address::new(self.segment, self.mac.clone())
    }
}

/// Original sender of a routed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub segment: u16,
    pub mac: Option<Bytes>,
}

impl Source {
    pub fn address(&self) -> Address {
        Address::new(self.segment, self.mac.clone())
    }
}

impl From<&Address> for Source {
    fn from(address: &Address) -> Self {
        Self {
            segment: address.segment(),
            mac: address.mac().cloned(),
        }
    }
}

/// Decoded protocol control information.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub expects_reply: bool,
    pub priority: Priority,
    pub destination: Option<Destination>,
    pub source: Option<Source>,
    /// Present only for network-layer messages.
    pub message: Option<MessageType>,
}

impl Header {
    /// Header of a frame delivered on the segment it is sent on.
    pub fn local(message: Option<MessageType>, expects_reply: bool) -> Self {
        Self {
            expects_reply,
            message,
            ..Default::default()
        }
    }

    pub fn is_network_message(&self) -> bool {
        self.message.is_some()
    }

    fn control(&self) -> u8 {
        let mut control = self.priority.bits();
        if self.message.is_some() {
            control |= NETWORK_MESSAGE;
        }
        if self.destination.is_some() {
            control |= DESTINATION;
        }
        if self.source.is_some() {
            control |= SOURCE;
        }
        if self.expects_reply {
            control |= EXPECTS_REPLY;
        }
        control
    }
}

impl Write for Header {
    fn write(&self, buf: &mut impl BufMut) {
        VERSION.write(buf);
        self.control().write(buf);
        if let Some(destination) = &self.destination {
            destination.segment.write(buf);
            write_mac(destination.mac.as_ref(), buf);
        }
        if let Some(source) = &self.source {
            source.segment.write(buf);
            write_mac(source.mac.as_ref(), buf);
        }
        if let Some(destination) = &self.destination {
            destination.hop_count.write(buf);
        }
        if let Some(message) = &self.message {
            message.write(buf);
        }
    }
}

impl EncodeSize for Header {
    fn encode_size(&self) -> usize {
        let mut size = u8::SIZE + u8::SIZE;
        if let Some(destination) = &self.destination {
            size += u16::SIZE + mac_size(destination.mac.as_ref()) + u8::SIZE;
        }
        if let Some(source) = &self.source {
            size += u16::SIZE + mac_size(source.mac.as_ref());
        }
        if let Some(message) = &self.message {
            size += message.encode_size();
        }
        size
    }
}

impl Read for Header {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        // Reject other versions before looking at anything else
        let version = u8::read(buf)?;
        if version != VERSION {
            return Err(Error::Invalid("Header", "unsupported version"));
        }
        let control = u8::read(buf)?;

        // Addressing
        let destination = if control & DESTINATION != 0 {
            let segment = u16::read(buf)?;
            let mac = read_mac(buf)?;
            Some((segment, mac))
        } else {
            None
        };
        let source = if control & SOURCE != 0 {
            let segment = u16::read(buf)?;
            let mac = read_mac(buf)?;
            Some(Source { segment, mac })
        } else {
            None
        };
        let destination = match destination {
            Some((segment, mac)) => Some(Destination {
                segment,
                mac,
                hop_count: u8::read(buf)?,
            }),
            None => None,
        };

        // Message type
        let message = if control & NETWORK_MESSAGE != 0 {
            Some(MessageType::read(buf)?)
        } else {
            None
        };

        Ok(Self {
            expects_reply: control & EXPECTS_REPLY != 0,
            priority: Priority::from_bits(control),
            destination,
            source,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error as FrameError;
    use commonware_codec::Encode;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_mac(rng: &mut StdRng) -> Option<Bytes> {
        let len = rng.gen_range(0..=6);
        if len == 0 {
            return None;
        }
        Some(Bytes::from((0..len).map(|_| rng.gen()).collect::<Vec<u8>>()))
    }

    fn random_header(rng: &mut StdRng) -> Header {
        let priority = Priority::from_bits(rng.gen());
        let destination = rng.gen_bool(0.5).then(|| Destination {
            segment: rng.gen(),
            mac: random_mac(rng),
            hop_count: rng.gen(),
        });
        let source = rng.gen_bool(0.5).then(|| Source {
            segment: rng.gen(),
            mac: random_mac(rng),
        });
        let message = rng.gen_bool(0.5).then(|| {
            let code: u8 = rng.gen();
            if code >= 0x80 {
                MessageType::Proprietary {
                    kind: code,
                    vendor: rng.gen(),
                }
            } else {
                MessageType::standard(code)
            }
        });
        Header {
            expects_reply: rng.gen(),
            priority,
            destination,
            source,
            message,
        }
    }

    #[test]
    fn test_random_headers_survive_encoding() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..1_000 {
            let header = random_header(&mut rng);
            let payload: Vec<u8> = (0..rng.gen_range(0..16)).map(|_| rng.gen()).collect();
            let frame = crate::encode(&header, &payload);
            assert_eq!(frame.len(), header.encode_size() + payload.len());
            let (decoded, rest) = crate::decode(frame).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(&rest[..], &payload[..]);
        }
    }

    #[test]
    fn test_global_broadcast_wire_bytes() {
        let header = Header {
            destination: Some(Destination::new(&Address::global(), DEFAULT_HOP_COUNT)),
            ..Default::default()
        };
        assert_eq!(&header.encode()[..], &[0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn test_routed_wire_bytes() {
        let header = Header {
            expects_reply: true,
            priority: Priority::Urgent,
            destination: Some(Destination {
                segment: 2,
                mac: Some(Bytes::from_static(&[0x0a])),
                hop_count: 7,
            }),
            source: Some(Source {
                segment: 1,
                mac: Some(Bytes::from_static(&[0x0b, 0x0c])),
            }),
            message: Some(MessageType::WhoIsRouterToNetwork),
        };
        assert_eq!(
            &header.encode()[..],
            &[
                0x01, 0xAD, // version, control
                0x00, 0x02, 0x01, 0x0a, // destination
                0x00, 0x01, 0x02, 0x0b, 0x0c, // source
                0x07, // hop count
                0x00, // message type
            ]
        );
    }

    #[test]
    fn test_every_other_version_is_rejected() {
        for version in (0..=u8::MAX).filter(|v| *v != VERSION) {
            let frame = Bytes::from(vec![version, 0x20, 0xFF, 0xFF, 0x00, 0xFF]);
            assert!(matches!(
                crate::decode(frame),
                Err(FrameError::InvalidVersion(v)) if v == version
            ));
        }
        // Version is checked even when nothing follows it
        assert!(matches!(
            crate::decode(Bytes::from_static(&[0x02])),
            Err(FrameError::InvalidVersion(2))
        ));
        // Reading the header alone rejects it too
        assert!(matches!(
            Header::read(&mut Bytes::from_static(&[0x02, 0x00])),
            Err(Error::Invalid("Header", _))
        ));
    }

    #[test]
    fn test_truncated_frames() {
        let truncated: [&'static [u8]; 4] = [
            &[],
            &[0x01],
            // Destination flag without destination
            &[0x01, 0x20, 0x00],
            // Declared sub-address longer than the frame
            &[0x01, 0x08, 0x00, 0x01, 0x04, 0xaa],
        ];
        for frame in truncated {
            assert!(matches!(
                crate::decode(Bytes::from_static(frame)),
                Err(FrameError::Codec(Error::EndOfBuffer))
            ));
        }
    }

    #[test]
    #[should_panic(expected = "sub-address too long")]
    fn test_oversized_mac_not_written() {
        let header = Header {
            source: Some(Source {
                segment: 1,
                mac: Some(Bytes::from(vec![0u8; MAX_MAC_LEN + 1])),
            }),
            ..Default::default()
        };
        crate::encode(&header, &[]);
    }

    #[test]
    fn test_segment_zero_untouched() {
        let header = Header {
            destination: Some(Destination {
                segment: 0,
                mac: Some(Bytes::from_static(&[0x01])),
                hop_count: 3,
            }),
            ..Default::default()
        };
        let (decoded, _) = crate::decode(crate::encode(&header, &[])).unwrap();
        assert_eq!(decoded.destination.unwrap().segment, 0);
    }
}
