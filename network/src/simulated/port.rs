use super::Link;
use crate::{
    medium::{Inbound, Medium, Transmission},
    Error,
};
use bytes::Bytes;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::sync::Weak;

/// Attachment point of one engine on a [Link].
pub struct Port {
    link: Link,
    mac: Bytes,
    bytes_in: Counter,
    bytes_out: Counter,
}

impl Port {
    pub(super) fn new(link: Link, mac: Bytes) -> Self {
        Self {
            link,
            mac,
            bytes_in: Counter::default(),
            bytes_out: Counter::default(),
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Frame bytes handed to the attached engine.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.get()
    }

    /// Frame bytes accepted for transmission.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.get()
    }

    pub fn register_metrics(&self, registry: &mut Registry) {
        registry.register(
            "bytes_in",
            "Number of frame bytes received",
            self.bytes_in.clone(),
        );
        registry.register(
            "bytes_out",
            "Number of frame bytes sent",
            self.bytes_out.clone(),
        );
    }
}

impl Medium for Port {
    fn mac(&self) -> Bytes {
        self.mac.clone()
    }

    fn broadcast_mac(&self) -> Bytes {
        self.link.broadcast_mac()
    }

    fn attach(&self, inbound: Weak<dyn Inbound>) -> Result<(), Error> {
        self.link
            .register(self.mac.clone(), inbound, self.bytes_in.clone())
    }

    fn detach(&self) {
        self.link.unregister(&self.mac);
    }

    fn transmit(&self, transmission: Transmission) -> Result<(), Error> {
        let len = transmission.frame.len() as u64;
        self.link.send(self.mac.clone(), transmission)?;
        self.bytes_out.inc_by(len);
        Ok(())
    }
}
