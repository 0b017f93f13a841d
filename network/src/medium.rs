//! Contracts between an [crate::Engine] and the medium it emits frames on.

use crate::Error;
use bacnet_npdu::Address;
use bytes::Bytes;
use std::sync::Weak;

/// A frame handed to a medium for physical transmission.
#[derive(Clone, Debug)]
pub struct Transmission {
    /// Address the frame is for. Only its sub-address matters to the medium.
    pub recipient: Address,
    /// Sub-address of the router that must receive the frame instead of `recipient`.
    pub router: Option<Bytes>,
    pub frame: Bytes,
    /// Deliver to every node of the medium.
    pub broadcast: bool,
    pub expects_reply: bool,
}

/// Entry point of a node for frames arriving from its medium.
pub trait Inbound: Send + Sync {
    /// Segment the node is attached to.
    fn segment(&self) -> u16;

    /// Processes a raw frame sent by the node with sub-address `origin`.
    ///
    /// Must not propagate failures: one bad frame never stops the caller's receive loop.
    fn handle_incoming_data(&self, frame: Bytes, origin: Bytes);
}

/// A physical or simulated medium a node is attached to.
pub trait Medium: Send + Sync + 'static {
    /// Sub-address of this node on the medium.
    fn mac(&self) -> Bytes;

    /// Every sub-address this node answers to.
    fn macs(&self) -> Vec<Bytes> {
        vec![self.mac()]
    }

    /// Sub-address reaching every node of the medium.
    fn broadcast_mac(&self) -> Bytes;

    /// Starts feeding incoming frames to `inbound`.
    fn attach(&self, inbound: Weak<dyn Inbound>) -> Result<(), Error>;

    /// Stops feeding incoming frames.
    fn detach(&self);

    /// Emits a frame.
    fn transmit(&self, transmission: Transmission) -> Result<(), Error>;
}
