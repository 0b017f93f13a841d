use super::{Config, Port};
use crate::{
    medium::{Inbound, Transmission},
    reporter::Reporter,
    utils::{Mailbox, Signal},
    Engine, Error,
};
use bacnet_npdu::GLOBAL_SEGMENT;
use bytes::Bytes;
use commonware_utils::hex;
use prometheus_client::metrics::counter::Counter;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    thread::JoinHandle,
};
use tracing::{debug, error};

struct Registration {
    inbound: Weak<dyn Inbound>,
    bytes_in: Counter,
}

struct Frame {
    origin: Bytes,
    // `None` reaches every registered port
    target: Option<Bytes>,
    data: Bytes,
}

struct Inner {
    cfg: Config,
    registry: Mutex<HashMap<Bytes, Registration>>,
    queue: Mailbox<Frame>,
    signal: Signal,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            match self.queue.pop() {
                Some(frame) => self.deliver(frame),
                None => {
                    self.signal.wait(self.cfg.idle_wait);
                }
            }
        }
    }

    fn deliver(&self, frame: Frame) {
        // Snapshot so ports may register or leave while frames are handed out
        let recipients: Vec<(Arc<dyn Inbound>, Counter)> = {
            let registry = self.registry.lock().unwrap();
            match &frame.target {
                None => registry
                    .values()
                    .filter_map(|r| Some((r.inbound.upgrade()?, r.bytes_in.clone())))
                    .collect(),
                Some(mac) => registry
                    .get(mac)
                    .and_then(|r| Some((r.inbound.upgrade()?, r.bytes_in.clone())))
                    .into_iter()
                    .collect(),
            }
        };
        if recipients.is_empty() {
            debug!(
                segment = self.cfg.segment,
                origin = hex(&frame.origin),
                target = ?frame.target.as_deref().map(hex),
                reason = "no recipient",
                "dropping frame"
            );
            return;
        }
        for (inbound, bytes_in) in recipients {
            bytes_in.inc_by(frame.data.len() as u64);
            inbound.handle_incoming_data(frame.data.clone(), frame.origin.clone());
        }
    }
}

/// In-process broadcast medium shared by every [Port] created from it.
///
/// Frames are handed out by a single worker thread in the order they were sent. Frames sent
/// before [Link::start] wait for the worker.
#[derive(Clone)]
pub struct Link {
    inner: Arc<Inner>,
}

impl Link {
    pub fn new(cfg: Config) -> Result<Self, Error> {
        if cfg.segment == GLOBAL_SEGMENT {
            return Err(Error::InvalidSegment(cfg.segment));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                registry: Mutex::new(HashMap::new()),
                queue: Mailbox::default(),
                signal: Signal::new(),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn segment(&self) -> u16 {
        self.inner.cfg.segment
    }

    pub fn broadcast_mac(&self) -> Bytes {
        self.inner.cfg.broadcast_mac.clone()
    }

    /// Number of ports with a live registration.
    pub fn registered(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap();
        registry
            .values()
            .filter(|r| r.inbound.strong_count() > 0)
            .count()
    }

    /// Spawn the delivery worker. Calling it again while the worker runs has no effect.
    pub fn start(&self) -> Result<(), Error> {
        let mut worker = self.inner.worker.lock().unwrap();
        if worker.is_some() {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("link-{}", self.segment()))
            .spawn(move || inner.run())
            .inspect_err(|_| self.inner.running.store(false, Ordering::Release))?;
        *worker = Some(handle);
        debug!(segment = self.segment(), "link started");
        Ok(())
    }

    /// Stop the worker and drop undelivered frames.
    pub fn terminate(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.signal.notify();
        let worker = self.inner.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            return;
        };
        if worker.join().is_err() {
            error!(segment = self.segment(), "link worker panicked");
        }
        let dropped = self.inner.queue.clear();
        debug!(segment = self.segment(), dropped, "link terminated");
    }

    /// Create a port with sub-address `mac`. Nothing is registered until an engine attaches.
    pub fn port(&self, mac: impl Into<Bytes>) -> Port {
        Port::new(self.clone(), mac.into())
    }

    /// Create an engine on this link's segment behind a new port.
    ///
    /// The engine receives nothing until it is started.
    pub fn engine(
        &self,
        mac: impl Into<Bytes>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Arc<Engine<Port>>, Error> {
        let cfg = crate::engine::Config {
            segment: self.segment(),
            reporter,
        };
        Engine::new(cfg, self.port(mac))
    }

    pub(super) fn register(
        &self,
        mac: Bytes,
        inbound: Weak<dyn Inbound>,
        bytes_in: Counter,
    ) -> Result<(), Error> {
        if let Some(node) = inbound.upgrade() {
            if node.segment() != self.segment() {
                return Err(Error::WrongSegment {
                    expected: self.segment(),
                    actual: node.segment(),
                });
            }
        }
        let mut registry = self.inner.registry.lock().unwrap();
        if registry
            .get(&mac)
            .is_some_and(|existing| existing.inbound.strong_count() > 0)
        {
            return Err(Error::DuplicateMac(hex(&mac)));
        }
        debug!(segment = self.segment(), mac = hex(&mac), "registered");
        registry.insert(mac, Registration { inbound, bytes_in });
        Ok(())
    }

    pub(super) fn unregister(&self, mac: &Bytes) {
        if self.inner.registry.lock().unwrap().remove(mac).is_some() {
            debug!(segment = self.segment(), mac = hex(mac), "unregistered");
        }
    }

    pub(super) fn send(&self, origin: Bytes, transmission: Transmission) -> Result<(), Error> {
        let len = transmission.frame.len();
        if len > self.inner.cfg.max_frame_len {
            return Err(Error::FrameTooLarge(len));
        }
        let target = self.target(&transmission);
        self.inner.queue.push(Frame {
            origin,
            target,
            data: transmission.frame,
        });
        self.inner.signal.notify();
        Ok(())
    }

    /// Resolves the port a transmission is for. `None` means every port.
    fn target(&self, transmission: &Transmission) -> Option<Bytes> {
        if transmission.broadcast || transmission.recipient.is_global() {
            return None;
        }
        if let Some(router) = &transmission.router {
            return Some(router.clone());
        }
        match transmission.recipient.mac() {
            Some(mac) if *mac != self.inner.cfg.broadcast_mac => Some(mac.clone()),
            _ => None,
        }
    }
}
