//! Network-layer message types and the bodies the router understands.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};

/// First message type whose header carries a vendor identifier.
pub const PROPRIETARY_BASE: u8 = 0x80;

/// Type of a network-layer (as opposed to upper-layer) message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    WhoIsRouterToNetwork,
    IAmRouterToNetwork,
    ICouldBeRouterToNetwork,
    RejectMessageToNetwork,
    RouterBusyToNetwork,
    RouterAvailableToNetwork,
    InitializeRoutingTable,
    InitializeRoutingTableAck,
    EstablishConnectionToNetwork,
    DisconnectConnectionToNetwork,
    WhatIsNetworkNumber,
    /// Announces the segment number of the sender. Never routed.
    NetworkNumberIs,
    /// A standard code this implementation does not name (below [PROPRIETARY_BASE]).
    Reserved(u8),
    /// A vendor-defined message. `kind` is at least [PROPRIETARY_BASE].
    Proprietary { kind: u8, vendor: u16 },
}

impl MessageType {
    /// Returns the one-byte code written on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::WhoIsRouterToNetwork => 0x00,
            Self::IAmRouterToNetwork => 0x01,
            Self::ICouldBeRouterToNetwork => 0x02,
            Self::RejectMessageToNetwork => 0x03,
            Self::RouterBusyToNetwork => 0x04,
            Self::RouterAvailableToNetwork => 0x05,
            Self::InitializeRoutingTable => 0x06,
            Self::InitializeRoutingTableAck => 0x07,
            Self::EstablishConnectionToNetwork => 0x08,
            Self::DisconnectConnectionToNetwork => 0x09,
            Self::WhatIsNetworkNumber => 0x12,
            Self::NetworkNumberIs => 0x13,
            Self::Reserved(code) => *code,
            Self::Proprietary { kind, .. } => *kind,
        }
    }

    pub(crate) fn standard(code: u8) -> Self {
        match code {
            0x00 => Self::WhoIsRouterToNetwork,
            0x01 => Self::IAmRouterToNetwork,
            0x02 => Self::ICouldBeRouterToNetwork,
            0x03 => Self::RejectMessageToNetwork,
            0x04 => Self::RouterBusyToNetwork,
            0x05 => Self::RouterAvailableToNetwork,
            0x06 => Self::InitializeRoutingTable,
            0x07 => Self::InitializeRoutingTableAck,
            0x08 => Self::EstablishConnectionToNetwork,
            0x09 => Self::DisconnectConnectionToNetwork,
            0x12 => Self::WhatIsNetworkNumber,
            0x13 => Self::NetworkNumberIs,
            other => Self::Reserved(other),
        }
    }
}

impl Write for MessageType {
    fn write(&self, buf: &mut impl BufMut) {
        self.code().write(buf);
        if let Self::Proprietary { vendor, .. } = self {
            vendor.write(buf);
        }
    }
}

impl EncodeSize for MessageType {
    fn encode_size(&self) -> usize {
        match self {
            Self::Proprietary { .. } => u8::SIZE + u16::SIZE,
            _ => u8::SIZE,
        }
    }
}

impl Read for MessageType {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let code = u8::read(buf)?;
        if code >= PROPRIETARY_BASE {
            let vendor = u16::read(buf)?;
            return Ok(Self::Proprietary { kind: code, vendor });
        }
        Ok(Self::standard(code))
    }
}

/// Body of [MessageType::WhoIsRouterToNetwork].
///
/// Without a segment the query asks for every segment reachable through the responder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhoIsRouterToNetwork {
    pub segment: Option<u16>,
}

impl Write for WhoIsRouterToNetwork {
    fn write(&self, buf: &mut impl BufMut) {
        if let Some(segment) = self.segment {
            segment.write(buf);
        }
    }
}

impl EncodeSize for WhoIsRouterToNetwork {
    fn encode_size(&self) -> usize {
        self.segment.map_or(0, |_| u16::SIZE)
    }
}

impl Read for WhoIsRouterToNetwork {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        if !buf.has_remaining() {
            return Ok(Self { segment: None });
        }
        Ok(Self {
            segment: Some(u16::read(buf)?),
        })
    }
}

/// Body of [MessageType::IAmRouterToNetwork]: the segments reachable through the sender.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IAmRouterToNetwork {
    pub segments: Vec<u16>,
}

impl Write for IAmRouterToNetwork {
    fn write(&self, buf: &mut impl BufMut) {
        for segment in &self.segments {
            segment.write(buf);
        }
    }
}

impl EncodeSize for IAmRouterToNetwork {
    fn encode_size(&self) -> usize {
        self.segments.len() * u16::SIZE
    }
}

impl Read for IAmRouterToNetwork {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        if buf.remaining() % u16::SIZE != 0 {
            return Err(Error::Invalid("IAmRouterToNetwork", "odd body length"));
        }
        let mut segments = Vec::with_capacity(buf.remaining() / u16::SIZE);
        while buf.has_remaining() {
            segments.push(u16::read(buf)?);
        }
        Ok(Self { segments })
    }
}

/// Body of [MessageType::NetworkNumberIs].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkNumberIs {
    pub segment: u16,
    /// `true` if the number was configured rather than learned.
    pub configured: bool,
}

impl Write for NetworkNumberIs {
    fn write(&self, buf: &mut impl BufMut) {
        self.segment.write(buf);
        self.configured.write(buf);
    }
}

impl EncodeSize for NetworkNumberIs {
    fn encode_size(&self) -> usize {
        u16::SIZE + bool::SIZE
    }
}

impl Read for NetworkNumberIs {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let segment = u16::read(buf)?;
        let configured = bool::read(buf)?;
        Ok(Self {
            segment,
            configured,
        })
    }
}
