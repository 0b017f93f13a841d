//! Move envelopes between an [Engine] and the application.
//!
//! A transport consumes envelopes the engine delivers and executes sends requested by the
//! application. Two strategies sit behind the [Transport] contract:
//!
//! * [Dedicated]: one worker thread per engine.
//! * [Shared]: every send and every dispatch is a task on a [Pool] shared by many engines.
//!
//! Both strategies answer network-layer queries (who-is-router, what-is-network-number),
//! learn routers from announcements, and match replies to confirmed requests before handing
//! anything else to the application [Handler].

mod dedicated;
mod shared;

pub use dedicated::Dedicated;
pub use shared::{Pool, PoolConfig, Shared};

use crate::{medium::Medium, Engine, Error};
use bacnet_npdu::{Address, Envelope, IAmRouterToNetwork, MessageType, LOCAL_SEGMENT};
use bytes::Bytes;
use commonware_codec::DecodeExt;
use futures::channel::oneshot;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, error, warn};

/// Consumer of envelopes delivered by an engine.
pub trait Transport: Send + Sync {
    /// Queues an envelope addressed to this node.
    fn deliver(&self, envelope: Envelope);

    /// Queues a send.
    fn send(&self, outgoing: Outgoing);

    /// Sends a confirmed request and returns a receiver for the reply.
    ///
    /// The reply is the first envelope from `recipient` the [Handler] correlates with
    /// `invoke_id`. Fails with [Error::Timeout] if none arrives within `timeout`.
    fn request(
        &self,
        recipient: Address,
        router: Option<Address>,
        payload: Bytes,
        invoke_id: u8,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<Envelope, Error>> {
        let (response, receiver) = oneshot::channel();
        self.send(Outgoing::Request {
            recipient,
            router,
            payload,
            invoke_id,
            timeout,
            response,
        });
        receiver
    }
}

/// Application layer above a transport.
pub trait Handler: Send + Sync + 'static {
    /// Returns the invoke id if `envelope` answers a confirmed request.
    fn correlate(&self, _envelope: &Envelope) -> Option<u8> {
        None
    }

    /// Processes an envelope that answers no pending request.
    fn receive(&self, envelope: Envelope);
}

/// A send queued on a transport.
#[derive(Debug)]
pub enum Outgoing {
    Message {
        recipient: Address,
        router: Option<Address>,
        payload: Bytes,
        broadcast: bool,
        expects_reply: bool,
    },
    Request {
        recipient: Address,
        router: Option<Address>,
        payload: Bytes,
        invoke_id: u8,
        timeout: Duration,
        response: oneshot::Sender<Result<Envelope, Error>>,
    },
    Network {
        recipient: Address,
        router: Option<Address>,
        kind: MessageType,
        payload: Bytes,
        broadcast: bool,
        expects_reply: bool,
    },
}

/// Configuration for a transport.
#[derive(Clone, Debug)]
pub struct Config {
    /// Longest a dedicated worker sleeps when it has nothing to do.
    pub idle_wait: Duration,

    /// Period of the request timeout sweep on a shared pool.
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    peer: Address,
    invoke_id: u8,
}

struct Pending {
    deadline: Instant,
    response: oneshot::Sender<Result<Envelope, Error>>,
}

/// Processing shared by both strategies.
pub(crate) struct Dispatcher<M: Medium> {
    engine: Arc<Engine<M>>,
    handler: Arc<dyn Handler>,
    pending: Mutex<HashMap<Key, Pending>>,
}

impl<M: Medium> Dispatcher<M> {
    pub(crate) fn new(engine: Arc<Engine<M>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            engine,
            handler,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn engine(&self) -> &Arc<Engine<M>> {
        &self.engine
    }

    // Replies from this segment carry segment 0.
    fn peer(&self, address: &Address) -> Address {
        if self.engine.is_this_network(address) {
            address.with_segment(LOCAL_SEGMENT)
        } else {
            address.clone()
        }
    }

    /// Executes a queued send.
    pub(crate) fn send(&self, outgoing: Outgoing) {
        let result = match outgoing {
            Outgoing::Message {
                recipient,
                router,
                payload,
                broadcast,
                expects_reply,
            } => self.engine.send_message(
                &recipient,
                router.as_ref(),
                payload,
                broadcast,
                expects_reply,
            ),
            Outgoing::Network {
                recipient,
                router,
                kind,
                payload,
                broadcast,
                expects_reply,
            } => self.engine.send_network_message(
                &recipient,
                router.as_ref(),
                kind,
                payload,
                broadcast,
                expects_reply,
            ),
            Outgoing::Request {
                recipient,
                router,
                payload,
                invoke_id,
                timeout,
                response,
            } => {
                // Registered first so an immediate reply finds it
                let key = Key {
                    peer: self.peer(&recipient),
                    invoke_id,
                };
                self.pending.lock().unwrap().insert(
                    key.clone(),
                    Pending {
                        deadline: Instant::now() + timeout,
                        response,
                    },
                );
                let result =
                    self.engine
                        .send_message(&recipient, router.as_ref(), payload, false, true);
                if let Err(err) = result {
                    error!(%recipient, invoke_id, ?err, "request failed");
                    let pending = self.pending.lock().unwrap().remove(&key);
                    if let Some(pending) = pending {
                        let _ = pending.response.send(Err(err));
                    }
                }
                return;
            }
        };
        if let Err(err) = result {
            error!(segment = self.engine.segment(), ?err, "send failed");
        }
    }

    /// Processes an envelope delivered by the engine.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        match envelope.message {
            Some(MessageType::WhoIsRouterToNetwork) => {
                if let Err(err) = self.engine.handle_who_is_router(&envelope) {
                    warn!(from = %envelope.from, ?err, "unable to answer who-is-router");
                }
            }
            Some(MessageType::IAmRouterToNetwork) => {
                let body = match IAmRouterToNetwork::decode(envelope.payload.clone()) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(from = %envelope.from, ?err, "invalid router announcement");
                        return;
                    }
                };
                let router = envelope
                    .link
                    .clone()
                    .or_else(|| envelope.from.mac().cloned());
                match router {
                    Some(mac) => self.engine.learn_routers(mac, &body.segments),
                    None => debug!(from = %envelope.from, "announcement without sender"),
                }
            }
            Some(MessageType::WhatIsNetworkNumber) => {
                if let Err(err) = self.engine.handle_what_is_network_number(&envelope) {
                    warn!(from = %envelope.from, ?err, "unable to announce segment");
                }
            }
            _ => {
                if let Some(invoke_id) = self.handler.correlate(&envelope) {
                    let key = Key {
                        peer: self.peer(&envelope.from),
                        invoke_id,
                    };
                    let pending = self.pending.lock().unwrap().remove(&key);
                    if let Some(pending) = pending {
                        let _ = pending.response.send(Ok(envelope));
                        return;
                    }
                }
                self.handler.receive(envelope);
            }
        }
    }

    /// Fails every request whose deadline passed. Returns how many expired.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<Pending> = {
            let mut pending = self.pending.lock().unwrap();
            let keys: Vec<Key> = pending
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| pending.remove(key)).collect()
        };
        let count = expired.len();
        for pending in expired {
            let _ = pending.response.send(Err(Error::Timeout));
        }
        if count > 0 {
            debug!(segment = self.engine.segment(), count, "requests timed out");
        }
        count
    }

    /// Fails every pending request with [Error::Closed].
    pub(crate) fn close(&self) {
        let pending: Vec<Pending> = self.pending.lock().unwrap().drain().map(|(_, p)| p).collect();
        for pending in pending {
            let _ = pending.response.send(Err(Error::Closed));
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::Config as EngineConfig,
        mocks::{Collector, Recorder, Wire},
    };
    use commonware_codec::Encode;
    use futures::executor::block_on;

    fn dispatcher(handler: Arc<Recorder>) -> Dispatcher<Wire> {
        let engine = Engine::new(
            EngineConfig {
                segment: 1,
                ..Default::default()
            },
            Wire::new(vec![1]),
        )
        .unwrap();
        Dispatcher::new(engine, handler)
    }

    fn reply(from: Address, invoke_id: u8) -> Envelope {
        Envelope::new(from, None, Bytes::from(vec![invoke_id, 0xAA]))
    }

    #[test]
    fn test_request_correlation() {
        let recorder = Arc::new(Recorder::correlating());
        let dispatcher = dispatcher(recorder.clone());
        let (response, mut receiver) = oneshot::channel();
        dispatcher.send(Outgoing::Request {
            recipient: Address::new(1, Some(Bytes::from_static(&[2]))),
            router: None,
            payload: Bytes::from_static(&[7]),
            invoke_id: 7,
            timeout: Duration::from_secs(60),
            response,
        });
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(dispatcher.engine().medium().sent().len(), 1);

        // Wrong invoke id goes to the handler
        dispatcher.dispatch(reply(Address::local(Bytes::from_static(&[2])), 8));
        assert_eq!(recorder.envelopes().len(), 1);
        assert!(receiver.try_recv().unwrap().is_none());

        // Matching reply (segment 0 and our own segment are the same peer)
        dispatcher.dispatch(reply(Address::local(Bytes::from_static(&[2])), 7));
        let envelope = block_on(receiver).unwrap().unwrap();
        assert_eq!(&envelope.payload[..], &[7, 0xAA]);
        assert_eq!(recorder.envelopes().len(), 1);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_request_failure_returned() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        let (response, receiver) = oneshot::channel();
        dispatcher.send(Outgoing::Request {
            recipient: Address::new(9, Some(Bytes::from_static(&[2]))),
            router: None,
            payload: Bytes::new(),
            invoke_id: 1,
            timeout: Duration::from_secs(60),
            response,
        });
        assert!(matches!(
            block_on(receiver).unwrap(),
            Err(Error::Unroutable(9))
        ));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_sweep() {
        let dispatcher = dispatcher(Arc::new(Recorder::default()));
        let mut receivers = Vec::new();
        for (invoke_id, timeout) in [(1, Duration::ZERO), (2, Duration::from_secs(60))] {
            let (response, receiver) = oneshot::channel();
            dispatcher.send(Outgoing::Request {
                recipient: Address::local(Bytes::from_static(&[2])),
                router: None,
                payload: Bytes::new(),
                invoke_id,
                timeout,
                response,
            });
            receivers.push(receiver);
        }
        assert_eq!(dispatcher.sweep(Instant::now()), 1);
        let mut receivers = receivers.into_iter();
        assert!(matches!(
            block_on(receivers.next().unwrap()).unwrap(),
            Err(Error::Timeout)
        ));

        // Remaining requests fail on close
        dispatcher.close();
        assert!(matches!(
            block_on(receivers.next().unwrap()).unwrap(),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_router_announcement_learned() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(recorder.clone());
        let body = IAmRouterToNetwork {
            segments: vec![4, 5],
        };
        let mut envelope = Envelope::new(
            Address::local(Bytes::from_static(&[3])),
            None,
            body.encode().freeze(),
        );
        envelope.message = Some(MessageType::IAmRouterToNetwork);
        dispatcher.dispatch(envelope);

        let router = Address::local(Bytes::from_static(&[3]));
        assert_eq!(dispatcher.engine().router_for(4), Some(router.clone()));
        assert_eq!(dispatcher.engine().router_for(5), Some(router));
        assert!(recorder.envelopes().is_empty());
    }

    #[test]
    fn test_request_queued_as_outgoing() {
        let collector = Collector::default();
        let recipient = Address::new(4, Some(Bytes::from_static(&[2])));
        let _receiver = collector.request(
            recipient.clone(),
            None,
            Bytes::from_static(&[9]),
            9,
            Duration::from_secs(1),
        );
        let outgoing = collector.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert!(matches!(
            &outgoing[0],
            Outgoing::Request { recipient: r, invoke_id: 9, .. } if *r == recipient
        ));
    }

    #[test]
    fn test_upper_layer_to_handler() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(recorder.clone());
        let mut envelope = Envelope::new(
            Address::local(Bytes::from_static(&[3])),
            None,
            Bytes::from_static(b"apdu"),
        );
        dispatcher.dispatch(envelope.clone());

        // Network messages nobody answers here go up too
        envelope.message = Some(MessageType::RouterBusyToNetwork);
        dispatcher.dispatch(envelope);
        assert_eq!(recorder.envelopes().len(), 2);
    }
}
