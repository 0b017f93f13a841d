//! Routing engine attached to one segment.
//!
//! An [Engine] sends frames on its [Medium], receives frames from it, and forwards frames
//! to neighboring engines it holds routes to. Neighbors are other engines of the same
//! process (one per router port), reached directly rather than through a medium.
//!
//! # Sending
//!
//! * Global recipients get a copy relayed to every neighbor and a broadcast on this segment.
//!   Each neighbor passes its copy on to its own neighbors, except the one it came from.
//! * Recipients on this segment (segment `0` or our own) are reached directly.
//! * Remote recipients are relayed to the neighbor serving their segment, unless the caller
//!   names an external router, in which case the frame is emitted on this segment with full
//!   destination information and addressed to that router.
//!
//! # Receiving
//!
//! Frames are decoded, frames sent by this node are discarded, frames for this node are
//! delivered to its [Transport], and everything else is forwarded. Faults raised while
//! routing are handed to the [Reporter] and never returned to the medium.

mod metrics;
mod routes;

pub use metrics::Metrics;
pub use routes::{Routes, MAX_PORT};

use crate::{
    medium::{Inbound, Medium, Transmission},
    reporter::{Logger, Reporter},
    transport::Transport,
    Error,
};
use bacnet_npdu::{
    Address, Destination, Envelope, Header, IAmRouterToNetwork, MessageType, NetworkNumberIs,
    WhoIsRouterToNetwork, DEFAULT_HOP_COUNT, GLOBAL_SEGMENT, LOCAL_SEGMENT,
};
use bytes::Bytes;
use commonware_codec::{Encode, ReadExt};
use commonware_utils::hex;
use prometheus_client::registry::Registry;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::{debug, warn};

/// An engine reachable through a route.
pub trait Neighbor: Send + Sync {
    /// Segment the neighbor is attached to.
    fn segment(&self) -> u16;

    /// Puts an envelope relayed by the adjacent engine on segment `ingress` on the neighbor's
    /// segment.
    ///
    /// A global broadcast is also delivered to the neighbor itself and passed on to its other
    /// neighbors, never back to `ingress`. Faults are reported by the neighbor, not returned.
    fn relay(&self, ingress: u16, recipient: &Address, envelope: Envelope, broadcast: bool);

    /// Segments the neighbor has learned a router for.
    fn learned(&self) -> Vec<u16>;
}

/// Configuration for an [Engine].
pub struct Config {
    /// Segment the engine is attached to. `0` if unknown.
    pub segment: u16,

    /// Receives faults raised while routing frames.
    pub reporter: Arc<dyn Reporter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment: LOCAL_SEGMENT,
            reporter: Arc::new(Logger),
        }
    }
}

/// Routing engine of one segment.
pub struct Engine<M: Medium> {
    segment: u16,
    medium: M,
    routes: Routes,
    // Segment to sub-address of the router announcing it on our medium.
    routers: Mutex<BTreeMap<u16, Bytes>>,
    transport: Mutex<Option<Weak<dyn Transport>>>,
    reporter: Arc<dyn Reporter>,
    terminated: AtomicBool,
    metrics: Metrics,
}

impl<M: Medium> Engine<M> {
    /// Create a new engine attached to `medium`.
    ///
    /// The engine receives nothing until [Engine::start] is called.
    pub fn new(cfg: Config, medium: M) -> Result<Arc<Self>, Error> {
        if cfg.segment == GLOBAL_SEGMENT {
            return Err(Error::InvalidSegment(cfg.segment));
        }
        Ok(Arc::new(Self {
            segment: cfg.segment,
            medium,
            routes: Routes::new(cfg.segment),
            routers: Mutex::new(BTreeMap::new()),
            transport: Mutex::new(None),
            reporter: cfg.reporter,
            terminated: AtomicBool::new(false),
            metrics: Metrics::default(),
        }))
    }

    /// Attach to the medium.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let inbound = Arc::downgrade(self);
        self.medium.attach(inbound as Weak<dyn Inbound>)?;
        debug!(segment = self.segment, mac = hex(&self.medium.mac()), "started");
        Ok(())
    }

    /// Detach from the medium. Only the first call has any effect.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.medium.detach();
        debug!(segment = self.segment, "terminated");
    }

    /// Set the consumer of envelopes addressed to this node.
    pub fn set_transport<T: Transport + 'static>(&self, transport: &Arc<T>) {
        let transport = Arc::downgrade(transport);
        *self.transport.lock().unwrap() = Some(transport as Weak<dyn Transport>);
    }

    pub fn segment(&self) -> u16 {
        self.segment
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn register_metrics(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    pub fn local_address(&self) -> Address {
        Address::new(self.segment, Some(self.medium.mac()))
    }

    pub fn local_broadcast_address(&self) -> Address {
        Address::new(self.segment, Some(self.medium.broadcast_mac()))
    }

    /// Returns `true` if `address` is on this engine's segment.
    pub fn is_this_network(&self, address: &Address) -> bool {
        address.is_local() || address.segment() == self.segment
    }

    /// Returns `true` if `address` reaches this node.
    ///
    /// An address on this segment without a sub-address reaches every node, this one included.
    pub fn is_this_address(&self, address: &Address) -> bool {
        if !self.is_this_network(address) {
            return false;
        }
        match address.mac() {
            None => true,
            Some(mac) => self.medium.macs().iter().any(|own| own == mac),
        }
    }

    /// Add a route to `neighbor`, assigning it the next free port.
    ///
    /// Returns the port of the route. Adding the same segment twice keeps its port.
    pub fn add_route<N: Neighbor + 'static>(&self, neighbor: &Arc<N>) -> Result<u16, Error> {
        let segment = neighbor.segment();
        let weak = Arc::downgrade(neighbor);
        let port = self.routes.add(segment, weak as Weak<dyn Neighbor>)?;
        debug!(segment = self.segment, route = segment, port, "added route");
        Ok(port)
    }

    /// Add a route to `neighbor` on `port` (`1..=255`).
    pub fn add_route_at<N: Neighbor + 'static>(
        &self,
        port: u16,
        neighbor: &Arc<N>,
    ) -> Result<(), Error> {
        let segment = neighbor.segment();
        let weak = Arc::downgrade(neighbor);
        self.routes.add_at(port, segment, weak as Weak<dyn Neighbor>)?;
        debug!(segment = self.segment, route = segment, port, "added route");
        Ok(())
    }

    pub fn route_by_segment(&self, segment: u16) -> Option<Arc<dyn Neighbor>> {
        self.routes.by_segment(segment)
    }

    pub fn route_by_port(&self, port: u16) -> Option<Arc<dyn Neighbor>> {
        self.routes.by_port(port)
    }

    /// Send an upper-layer message.
    ///
    /// `router` names an external node that resolves the next hop for a remote recipient.
    /// Fails if a router is given for a recipient on this segment, or if a remote recipient
    /// has neither a router nor a route.
    pub fn send_message(
        &self,
        recipient: &Address,
        router: Option<&Address>,
        payload: Bytes,
        broadcast: bool,
        expects_reply: bool,
    ) -> Result<(), Error> {
        self.send(recipient, router, None, payload, broadcast, expects_reply)
    }

    /// Send a network-layer message of type `kind`.
    ///
    /// [MessageType::NetworkNumberIs] is never relayed to neighbors.
    pub fn send_network_message(
        &self,
        recipient: &Address,
        router: Option<&Address>,
        kind: MessageType,
        payload: Bytes,
        broadcast: bool,
        expects_reply: bool,
    ) -> Result<(), Error> {
        self.send(
            recipient,
            router,
            Some(kind),
            payload,
            broadcast,
            expects_reply,
        )
    }

    fn send(
        &self,
        recipient: &Address,
        router: Option<&Address>,
        message: Option<MessageType>,
        payload: Bytes,
        broadcast: bool,
        expects_reply: bool,
    ) -> Result<(), Error> {
        // Global: a copy for every neighbor, then a broadcast on this segment
        if recipient.is_global() {
            if message != Some(MessageType::NetworkNumberIs) {
                for neighbor in self.routes.snapshot() {
                    let mut envelope = Envelope::new(
                        self.local_address(),
                        Some(recipient.clone()),
                        payload.clone(),
                    );
                    envelope.expects_reply = expects_reply;
                    envelope.message = message;
                    debug!(
                        segment = self.segment,
                        neighbor = neighbor.segment(),
                        %recipient,
                        "relaying"
                    );
                    neighbor.relay(self.segment, recipient, envelope, broadcast);
                    self.metrics.forwarded.inc();
                }
            }
            let header = Header::local(message, expects_reply);
            return self.emit(recipient, None, &header, &payload, broadcast, expects_reply);
        }

        // This segment
        if self.is_this_network(recipient) {
            if router.is_some() {
                return Err(Error::RouterForLocalRecipient(recipient.clone()));
            }
            let header = Header::local(message, expects_reply);
            return self.emit(recipient, None, &header, &payload, broadcast, expects_reply);
        }

        // Remote segment
        match router.filter(|router| !self.is_this_address(router)) {
            None => {
                let neighbor = self
                    .routes
                    .by_segment(recipient.segment())
                    .ok_or(Error::Unroutable(recipient.segment()))?;
                let mut envelope =
                    Envelope::new(self.local_address(), Some(recipient.clone()), payload);
                envelope.expects_reply = expects_reply;
                envelope.message = message;
                debug!(
                    segment = self.segment,
                    neighbor = neighbor.segment(),
                    %recipient,
                    "relaying"
                );
                neighbor.relay(self.segment, recipient, envelope, broadcast);
                self.metrics.forwarded.inc();
                Ok(())
            }
            Some(router) => {
                let header = Header {
                    expects_reply,
                    destination: Some(Destination::new(recipient, DEFAULT_HOP_COUNT)),
                    message,
                    ..Default::default()
                };
                self.emit(
                    recipient,
                    router.mac().cloned(),
                    &header,
                    &payload,
                    broadcast,
                    expects_reply,
                )
            }
        }
    }

    fn emit(
        &self,
        recipient: &Address,
        router: Option<Bytes>,
        header: &Header,
        payload: &[u8],
        broadcast: bool,
        expects_reply: bool,
    ) -> Result<(), Error> {
        let frame = bacnet_npdu::encode(header, payload);
        debug!(
            segment = self.segment,
            %recipient,
            len = frame.len(),
            "transmitting"
        );
        self.medium.transmit(Transmission {
            recipient: recipient.clone(),
            router,
            frame,
            broadcast,
            expects_reply,
        })
    }

    /// Ask which router reaches `segment` (every router, if `None`).
    pub fn send_who_is_router_to_network(
        &self,
        recipient: &Address,
        segment: Option<u16>,
        broadcast: bool,
    ) -> Result<(), Error> {
        let body = WhoIsRouterToNetwork { segment }.encode().freeze();
        self.send_network_message(
            recipient,
            None,
            MessageType::WhoIsRouterToNetwork,
            body,
            broadcast,
            false,
        )
    }

    /// Answer a who-is-router query by announcing the matching segments on this segment.
    ///
    /// Neighbors are searched one hop further through the routers they learned.
    pub fn handle_who_is_router(&self, envelope: &Envelope) -> Result<(), Error> {
        let query = WhoIsRouterToNetwork::read(&mut envelope.payload.clone())
            .map_err(bacnet_npdu::Error::from)?;
        let neighbors = self.routes.snapshot();
        let mut segments = Vec::new();
        match query.segment {
            Some(wanted) => {
                let reachable = |neighbor: &Arc<dyn Neighbor>| {
                    neighbor.segment() == wanted || neighbor.learned().contains(&wanted)
                };
                if neighbors.iter().any(reachable) {
                    segments.push(wanted);
                }
            }
            None => {
                for neighbor in &neighbors {
                    let reachable = std::iter::once(neighbor.segment()).chain(neighbor.learned());
                    for segment in reachable {
                        if segment != self.segment && !segments.contains(&segment) {
                            segments.push(segment);
                        }
                    }
                }
            }
        }
        if segments.is_empty() {
            debug!(segment = self.segment, query = ?query.segment, "no route to announce");
            return Ok(());
        }

        debug!(segment = self.segment, ?segments, "announcing routes");
        let body = IAmRouterToNetwork { segments }.encode().freeze();
        self.send_network_message(
            &self.local_broadcast_address(),
            None,
            MessageType::IAmRouterToNetwork,
            body,
            true,
            false,
        )
    }

    /// Announce this segment's number in reply to a query that did not cross a router.
    pub fn handle_what_is_network_number(&self, envelope: &Envelope) -> Result<(), Error> {
        if self.segment == LOCAL_SEGMENT || !envelope.from.is_local() {
            return Ok(());
        }
        let body = NetworkNumberIs {
            segment: self.segment,
            configured: true,
        }
        .encode()
        .freeze();
        self.send_network_message(
            &self.local_broadcast_address(),
            None,
            MessageType::NetworkNumberIs,
            body,
            true,
            false,
        )
    }

    /// Record that the node with sub-address `mac` routes to `segments`.
    pub fn learn_routers(&self, mac: Bytes, segments: &[u16]) {
        let mut routers = self.routers.lock().unwrap();
        for segment in segments {
            if *segment == self.segment || *segment == LOCAL_SEGMENT || *segment == GLOBAL_SEGMENT {
                continue;
            }
            routers.insert(*segment, mac.clone());
        }
        debug!(segment = self.segment, router = hex(&mac), ?segments, "learned routers");
    }

    /// Returns the router announced for `segment`, usable as an explicit router when sending.
    pub fn router_for(&self, segment: u16) -> Option<Address> {
        let routers = self.routers.lock().unwrap();
        routers.get(&segment).map(|mac| Address::local(mac.clone()))
    }

    /// Decodes a frame received from `origin`.
    ///
    /// Returns `None` for frames this engine must ignore.
    fn parse(&self, frame: Bytes, origin: Bytes) -> Result<Option<Envelope>, Error> {
        let (header, payload) = bacnet_npdu::decode(frame)?;

        // Destination
        let mut to = None;
        let mut hop_count = DEFAULT_HOP_COUNT;
        if let Some(destination) = header.destination {
            if header.message == Some(MessageType::NetworkNumberIs) {
                debug!(
                    segment = self.segment,
                    reason = "routed segment announcement",
                    "dropping frame"
                );
                return Ok(None);
            }
            let segment = destination.segment;
            if segment != LOCAL_SEGMENT
                && segment != GLOBAL_SEGMENT
                && segment != self.segment
                && self.routes.by_segment(segment).is_none()
            {
                debug!(
                    segment = self.segment,
                    destination = segment,
                    reason = "foreign segment",
                    "dropping frame"
                );
                return Ok(None);
            }
            if segment != self.segment {
                to = Some(destination.address());
            }
            hop_count = destination.hop_count;
        }

        // Source
        let from = match header.source {
            Some(source) => source.address(),
            None => Address::local(origin.clone()),
        };
        let link = (!self.is_this_network(&from)).then_some(origin);

        Ok(Some(Envelope {
            from,
            to,
            link,
            payload,
            hop_count,
            expects_reply: header.expects_reply,
            priority: header.priority,
            message: header.message,
        }))
    }

    fn route(&self, frame: Bytes, origin: Bytes) -> Result<(), Error> {
        let envelope = match self.parse(frame, origin.clone()) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                self.metrics.dropped.inc();
                return Ok(());
            }
            Err(err) => {
                warn!(segment = self.segment, origin = hex(&origin), ?err, "invalid frame");
                return Err(err);
            }
        };

        // Broadcast media hand a sender its own frames
        if self.is_this_address(&envelope.from) {
            debug!(
                segment = self.segment,
                from = %envelope.from,
                reason = "sent by self",
                "dropping frame"
            );
            self.metrics.dropped.inc();
            return Ok(());
        }

        // Global broadcasts we relayed onto our medium were already delivered and passed on
        if envelope.to.as_ref().is_some_and(Address::is_global)
            && self.medium.macs().contains(&origin)
        {
            debug!(
                segment = self.segment,
                from = %envelope.from,
                reason = "relayed by self",
                "dropping frame"
            );
            self.metrics.dropped.inc();
            return Ok(());
        }

        let to = match envelope.to.clone() {
            Some(to) if !self.is_this_address(&to) => to,
            _ => {
                self.deliver(envelope);
                return Ok(());
            }
        };

        // Specific segment
        if !to.is_global() {
            let Some(neighbor) = self.routes.by_segment(to.segment()) else {
                debug!(
                    segment = self.segment,
                    %to,
                    reason = "no route",
                    "dropping frame"
                );
                self.metrics.dropped.inc();
                return Ok(());
            };
            let mut forward = envelope;
            if self.is_this_network(&forward.from) {
                forward.from = forward.from.with_segment(self.segment);
            }
            forward.link = None;
            debug!(segment = self.segment, neighbor = neighbor.segment(), %to, "forwarding");
            neighbor.relay(self.segment, &to, forward, false);
            self.metrics.forwarded.inc();
            return Ok(());
        }

        // Every segment but the one the frame came from
        self.flood(&envelope, &[envelope.from.segment()]);
        self.deliver(envelope);
        Ok(())
    }

    /// Passes a global broadcast to every neighbor not attached to a segment in `skip`.
    fn flood(&self, envelope: &Envelope, skip: &[u16]) {
        if envelope.hop_count == 0 {
            debug!(
                segment = self.segment,
                from = %envelope.from,
                "hop count exhausted"
            );
            return;
        }
        let mut from = envelope.from.clone();
        if from.is_local() {
            from = from.with_segment(self.segment);
        }
        let to = Address::global();
        for neighbor in self.routes.snapshot() {
            if skip.contains(&neighbor.segment()) {
                continue;
            }
            let mut copy = envelope.clone();
            copy.from = from.clone();
            copy.link = None;
            copy.hop_count = envelope.hop_count - 1;
            debug!(
                segment = self.segment,
                neighbor = neighbor.segment(),
                hop_count = copy.hop_count,
                "forwarding broadcast"
            );
            neighbor.relay(self.segment, &to, copy, true);
            self.metrics.forwarded.inc();
        }
    }

    fn deliver(&self, envelope: Envelope) {
        let transport = self.transport.lock().unwrap().as_ref().and_then(Weak::upgrade);
        let Some(transport) = transport else {
            debug!(
                segment = self.segment,
                from = %envelope.from,
                reason = "no transport",
                "dropping envelope"
            );
            self.metrics.dropped.inc();
            return;
        };
        self.metrics.delivered.inc();
        transport.deliver(envelope);
    }
}

impl<M: Medium> Inbound for Engine<M> {
    fn segment(&self) -> u16 {
        self.segment
    }

    fn handle_incoming_data(&self, frame: Bytes, origin: Bytes) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        self.metrics.received.inc();
        if let Err(err) = self.route(frame, origin) {
            self.metrics.dropped.inc();
            self.reporter.report(err);
        }
    }
}

impl<M: Medium> Neighbor for Engine<M> {
    fn segment(&self) -> u16 {
        self.segment
    }

    fn relay(&self, ingress: u16, recipient: &Address, mut envelope: Envelope, broadcast: bool) {
        if self.terminated.load(Ordering::Acquire) {
            debug!(segment = self.segment, reason = "terminated", "dropping relay");
            return;
        }

        // Our own copy of a global broadcast, and the segments behind us
        if recipient.is_global() {
            self.flood(&envelope, &[ingress, envelope.from.segment()]);
            self.deliver(envelope.clone());
        }

        // The final segment needs no destination
        if envelope
            .to
            .as_ref()
            .is_some_and(|to| self.is_this_network(to))
        {
            envelope.to = None;
        }
        let header = envelope.header();
        if let Err(err) = self.emit(
            recipient,
            None,
            &header,
            &envelope.payload,
            broadcast,
            envelope.expects_reply,
        ) {
            self.reporter.report(err);
        }
    }

    fn learned(&self) -> Vec<u16> {
        self.routers.lock().unwrap().keys().copied().collect()
    }
}
