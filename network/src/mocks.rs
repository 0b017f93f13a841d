//! Recording doubles for media, transports and handlers.

use crate::{
    medium::{Inbound, Medium, Transmission},
    transport::{Handler, Outgoing, Transport},
    Error,
};
use bacnet_npdu::Envelope;
use bytes::Bytes;
use std::{
    sync::{Mutex, Weak},
    time::{Duration, Instant},
};

/// A medium that records every transmission and delivers nothing.
pub struct Wire {
    mac: Bytes,
    broadcast_mac: Bytes,
    sent: Mutex<Vec<Transmission>>,
    inbound: Mutex<Option<Weak<dyn Inbound>>>,
}

impl Wire {
    pub fn new(mac: impl Into<Bytes>) -> Self {
        Self {
            mac: mac.into(),
            broadcast_mac: Bytes::from_static(&[0xFF]),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
        }
    }

    /// Returns every transmission so far, oldest first.
    pub fn sent(&self) -> Vec<Transmission> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inbound.lock().unwrap().is_some()
    }
}

impl Medium for Wire {
    fn mac(&self) -> Bytes {
        self.mac.clone()
    }

    fn broadcast_mac(&self) -> Bytes {
        self.broadcast_mac.clone()
    }

    fn attach(&self, inbound: Weak<dyn Inbound>) -> Result<(), Error> {
        *self.inbound.lock().unwrap() = Some(inbound);
        Ok(())
    }

    fn detach(&self) {
        *self.inbound.lock().unwrap() = None;
    }

    fn transmit(&self, transmission: Transmission) -> Result<(), Error> {
        self.sent.lock().unwrap().push(transmission);
        Ok(())
    }
}

/// A transport that records what it is given and processes nothing.
#[derive(Default)]
pub struct Collector {
    envelopes: Mutex<Vec<Envelope>>,
    outgoing: Mutex<Vec<Outgoing>>,
}

impl Collector {
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }

    /// Removes and returns the queued sends.
    pub fn take_outgoing(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *self.outgoing.lock().unwrap())
    }
}

impl Transport for Collector {
    fn deliver(&self, envelope: Envelope) {
        self.envelopes.lock().unwrap().push(envelope);
    }

    fn send(&self, outgoing: Outgoing) {
        self.outgoing.lock().unwrap().push(outgoing);
    }
}

/// A handler that records what it receives.
///
/// When correlating, the first payload byte of an envelope is taken as its invoke id.
#[derive(Default)]
pub struct Recorder {
    correlate: bool,
    envelopes: Mutex<Vec<Envelope>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlating() -> Self {
        Self {
            correlate: true,
            ..Default::default()
        }
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

impl Handler for Recorder {
    fn correlate(&self, envelope: &Envelope) -> Option<u8> {
        if !self.correlate {
            return None;
        }
        envelope.payload.first().copied()
    }

    fn receive(&self, envelope: Envelope) {
        self.envelopes.lock().unwrap().push(envelope);
    }
}

/// Polls `condition` until it holds or `timeout` elapses. Returns the last result.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
