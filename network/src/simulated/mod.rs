//! Simulated broadcast medium for running many engines in one process.
//!
//! A [Link] stands for one segment. Each engine attaches through its own [Port], identified
//! by a sub-address. A frame is delivered to every port when it is a broadcast (or addressed
//! to the global segment, the link's broadcast sub-address, or no sub-address at all), and
//! otherwise to the port of the router it names or, failing that, of its recipient.
//!
//! # Example
//!
//! ```rust
//! use bacnet_network::{simulated::{Config, Link}, Logger};
//! use std::sync::Arc;
//!
//! let link = Link::new(Config { segment: 1, ..Default::default() }).unwrap();
//! link.start().unwrap();
//! let engine = link.engine(vec![1], Arc::new(Logger)).unwrap();
//! engine.start().unwrap();
//! assert_eq!(link.registered(), 1);
//! engine.terminate();
//! link.terminate();
//! ```

mod link;
mod port;

pub use link::Link;
pub use port::Port;

use bacnet_npdu::LOCAL_SEGMENT;
use bytes::Bytes;
use std::time::Duration;

/// Configuration for a [Link].
#[derive(Clone, Debug)]
pub struct Config {
    /// Segment the link stands for.
    pub segment: u16,

    /// Sub-address that reaches every port.
    pub broadcast_mac: Bytes,

    /// Largest frame accepted for transmission.
    pub max_frame_len: usize,

    /// Longest the delivery worker sleeps when it has nothing to do.
    pub idle_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment: LOCAL_SEGMENT,
            broadcast_mac: Bytes::from_static(&[0xFF]),
            max_frame_len: 1500,
            idle_wait: Duration::from_millis(100),
        }
    }
}
