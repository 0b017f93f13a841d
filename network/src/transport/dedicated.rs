//! One worker thread per engine.

use super::{Config, Dispatcher, Handler, Outgoing, Transport};
use crate::{
    medium::Medium,
    utils::{Mailbox, Signal},
    Engine, Error,
};
use bacnet_npdu::Envelope;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error};

struct Inner<M: Medium> {
    dispatcher: Dispatcher<M>,
    outgoing: Mailbox<Outgoing>,
    incoming: Mailbox<Envelope>,
    signal: Signal,
    running: AtomicBool,
    closed: AtomicBool,
    idle_wait: Duration,
}

impl<M: Medium> Inner<M> {
    fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            let mut idle = true;
            if let Some(outgoing) = self.outgoing.pop() {
                self.dispatcher.send(outgoing);
                idle = false;
            }
            if let Some(envelope) = self.incoming.pop() {
                self.dispatcher.dispatch(envelope);
                idle = false;
            }
            self.dispatcher.sweep(Instant::now());
            if idle {
                self.signal.wait(self.idle_wait);
            }
        }
    }
}

impl<M: Medium> Transport for Inner<M> {
    fn deliver(&self, envelope: Envelope) {
        if self.closed.load(Ordering::Acquire) {
            debug!(from = %envelope.from, reason = "closed", "dropping envelope");
            return;
        }
        self.incoming.push(envelope);
        self.signal.notify();
    }

    fn send(&self, outgoing: Outgoing) {
        if self.closed.load(Ordering::Acquire) {
            if let Outgoing::Request { response, .. } = outgoing {
                let _ = response.send(Err(Error::Closed));
            }
            return;
        }
        self.outgoing.push(outgoing);
        self.signal.notify();
    }
}

/// Transport that serves one engine from its own thread.
///
/// Work queued before [Dedicated::start] is processed once the worker runs.
pub struct Dedicated<M: Medium> {
    inner: Arc<Inner<M>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Medium> Dedicated<M> {
    /// Create a transport for `engine` and register it as the engine's consumer.
    pub fn new(cfg: &Config, engine: Arc<Engine<M>>, handler: Arc<dyn Handler>) -> Self {
        let inner = Arc::new(Inner {
            dispatcher: Dispatcher::new(engine.clone(), handler),
            outgoing: Mailbox::default(),
            incoming: Mailbox::default(),
            signal: Signal::new(),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            idle_wait: cfg.idle_wait,
        });
        engine.set_transport(&inner);
        Self {
            inner,
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<Engine<M>> {
        self.inner.dispatcher.engine()
    }

    /// Spawn the worker. Calling it again while the worker runs has no effect.
    pub fn start(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() || self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.running.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let segment = self.engine().segment();
        let handle = std::thread::Builder::new()
            .name(format!("transport-{segment}"))
            .spawn(move || inner.run())
            .inspect_err(|_| self.inner.running.store(false, Ordering::Release))?;
        *worker = Some(handle);
        debug!(segment, "transport started");
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Queued work is dropped and pending requests fail with [Error::Closed].
    pub fn terminate(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.running.store(false, Ordering::Release);
        self.inner.signal.notify();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(segment = self.engine().segment(), "transport worker panicked");
            }
        }
        let mut dropped = self.inner.incoming.clear();
        while let Some(outgoing) = self.inner.outgoing.pop() {
            if let Outgoing::Request { response, .. } = outgoing {
                let _ = response.send(Err(Error::Closed));
            }
            dropped += 1;
        }
        self.inner.dispatcher.close();
        debug!(segment = self.engine().segment(), dropped, "transport terminated");
    }
}

impl<M: Medium> Transport for Dedicated<M> {
    fn deliver(&self, envelope: Envelope) {
        self.inner.deliver(envelope);
    }

    fn send(&self, outgoing: Outgoing) {
        self.inner.send(outgoing);
    }
}

impl<M: Medium> Drop for Dedicated<M> {
    fn drop(&mut self) {
        self.terminate();
    }
}
