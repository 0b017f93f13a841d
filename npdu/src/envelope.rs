//! Routed unit of the network layer.

use crate::{
    header::{Destination, Header, Priority, Source, DEFAULT_HOP_COUNT},
    Address, MessageType,
};
use bytes::Bytes;

/// A decoded frame ready for routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Sender. Segment `0` until the frame leaves the segment it originated on.
    pub from: Address,
    /// Final recipient. `None` delivers on the segment the frame is received on.
    pub to: Option<Address>,
    /// Sub-address of the node that put the frame on the local medium, used to reply
    /// through the same router.
    pub link: Option<Bytes>,
    /// Upper-layer message or network-message body.
    pub payload: Bytes,
    pub hop_count: u8,
    pub expects_reply: bool,
    pub priority: Priority,
    pub message: Option<MessageType>,
}

impl Envelope {
    pub fn new(from: Address, to: Option<Address>, payload: Bytes) -> Self {
        Self {
            from,
            to,
            link: None,
            payload,
            hop_count: DEFAULT_HOP_COUNT,
            expects_reply: false,
            priority: Priority::default(),
            message: None,
        }
    }

    pub fn is_network_message(&self) -> bool {
        self.message.is_some()
    }

    /// Builds the header written when this envelope is put back on a medium.
    ///
    /// A sender on segment `0` is not written: receivers resolve it from the link.
    pub fn header(&self) -> Header {
        Header {
            expects_reply: self.expects_reply,
            priority: self.priority,
            destination: self
                .to
                .as_ref()
                .map(|to| Destination::new(to, self.hop_count)),
            source: (!self.from.is_local()).then(|| Source::from(&self.from)),
            message: self.message,
        }
    }

    /// Encodes the envelope as a frame.
    pub fn encode(&self) -> Bytes {
        crate::encode(&self.header(), &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_sender_not_written() {
        let envelope = Envelope::new(
            Address::local(Bytes::from_static(&[0x01])),
            None,
            Bytes::from_static(b"hello"),
        );
        let (header, payload) = crate::decode(envelope.encode()).unwrap();
        assert!(header.source.is_none());
        assert!(header.destination.is_none());
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn test_routed_header() {
        let mut envelope = Envelope::new(
            Address::new(1, Some(Bytes::from_static(&[0x01]))),
            Some(Address::new(2, Some(Bytes::from_static(&[0x02])))),
            Bytes::new(),
        );
        envelope.hop_count = 9;
        envelope.message = Some(MessageType::IAmRouterToNetwork);
        let (header, _) = crate::decode(envelope.encode()).unwrap();
        let destination = header.destination.unwrap();
        assert_eq!(destination.address(), envelope.to.unwrap());
        assert_eq!(destination.hop_count, 9);
        assert_eq!(header.source.unwrap().address(), envelope.from);
        assert_eq!(header.message, Some(MessageType::IAmRouterToNetwork));
    }
}
