//! Route addressed frames between segments.
//!
//! # Overview
//!
//! An [Engine] is attached to one segment through a [Medium]. It encodes outgoing envelopes
//! as frames, decodes incoming frames, and decides whether each one is delivered to this node,
//! forwarded to a neighboring engine, or dropped. Engines that share a process and hold routes
//! to each other act as a router between their segments.
//!
//! Envelopes addressed to a node are handed to its [Transport], which also executes the
//! application's sends. Two strategies are provided: [transport::Dedicated] (one worker thread
//! per engine) and [transport::Shared] (tasks on a [transport::Pool] shared by every engine).
//!
//! [simulated::Link] is an in-process broadcast medium for running whole topologies in tests.
//!
//! # Example
//!
//! ```rust
//! use bacnet_network::{
//!     mocks::{wait_until, Recorder},
//!     simulated::{Config, Link},
//!     transport::{Config as TransportConfig, Dedicated},
//!     Logger,
//! };
//! use bacnet_npdu::Address;
//! use bytes::Bytes;
//! use std::{sync::Arc, time::Duration};
//!
//! // Two segments joined by a router
//! let one = Link::new(Config { segment: 1, ..Default::default() }).unwrap();
//! let two = Link::new(Config { segment: 2, ..Default::default() }).unwrap();
//! one.start().unwrap();
//! two.start().unwrap();
//! let router_one = one.engine(vec![1], Arc::new(Logger)).unwrap();
//! let router_two = two.engine(vec![1], Arc::new(Logger)).unwrap();
//! router_one.add_route(&router_two).unwrap();
//! router_two.add_route(&router_one).unwrap();
//!
//! // A node on each segment
//! let sender = one.engine(vec![2], Arc::new(Logger)).unwrap();
//! let receiver = two.engine(vec![3], Arc::new(Logger)).unwrap();
//! let recorder = Arc::new(Recorder::new());
//! let transport = Dedicated::new(&TransportConfig::default(), receiver.clone(), recorder.clone());
//! transport.start().unwrap();
//! for engine in [&router_one, &router_two, &sender, &receiver] {
//!     engine.start().unwrap();
//! }
//!
//! // Reach segment 2 through the router's sub-address on segment 1
//! let recipient = Address::new(2, Some(Bytes::from_static(&[3])));
//! let router = Address::local(vec![1]);
//! sender
//!     .send_message(&recipient, Some(&router), Bytes::from_static(b"hello"), false, false)
//!     .unwrap();
//! assert!(wait_until(Duration::from_secs(5), || recorder.envelopes().len() == 1));
//! assert_eq!(recorder.envelopes()[0].from, Address::new(1, Some(Bytes::from_static(&[2]))));
//!
//! transport.terminate();
//! one.terminate();
//! two.terminate();
//! ```

pub mod engine;
mod error;
pub mod medium;
pub mod mocks;
pub mod reporter;
pub mod simulated;
pub mod transport;
pub mod utils;

pub use engine::{Engine, Neighbor};
pub use error::Error;
pub use medium::{Inbound, Medium, Transmission};
pub use reporter::{Logger, Reporter};
pub use transport::{Handler, Outgoing, Transport};
