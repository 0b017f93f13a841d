//! Route table of a single engine: remote segment to neighbor, plus a port index.

use crate::{Error, Neighbor};
use bacnet_npdu::{GLOBAL_SEGMENT, LOCAL_SEGMENT};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

/// Highest port number a route can be given.
pub const MAX_PORT: u16 = 255;

#[derive(Default)]
struct Table {
    segments: HashMap<u16, Weak<dyn Neighbor>>,
    // Port `n` is stored at index `n - 1`.
    ports: Vec<Option<u16>>,
}

/// Neighbors reachable from one engine.
///
/// Every operation holds the same lock, so a lookup never observes a half-added route.
/// Neighbors are held weakly: the owner of the topology keeps engines alive.
pub struct Routes {
    local: u16,
    table: Mutex<Table>,
}

impl Routes {
    pub fn new(local: u16) -> Self {
        Self {
            local,
            table: Mutex::new(Table::default()),
        }
    }

    fn validate(&self, segment: u16) -> Result<(), Error> {
        if segment == LOCAL_SEGMENT || segment == GLOBAL_SEGMENT || segment == self.local {
            return Err(Error::InvalidSegment(segment));
        }
        Ok(())
    }

    /// Adds a route and assigns it the next port.
    ///
    /// A segment that already has a port keeps it.
    pub fn add(&self, segment: u16, neighbor: Weak<dyn Neighbor>) -> Result<u16, Error> {
        self.validate(segment)?;
        let mut table = self.table.lock().unwrap();
        if let Some(index) = table.ports.iter().position(|s| *s == Some(segment)) {
            table.segments.insert(segment, neighbor);
            return Ok(index as u16 + 1);
        }
        if table.ports.len() >= MAX_PORT as usize {
            return Err(Error::NoRoomForRoutes);
        }
        table.ports.push(Some(segment));
        table.segments.insert(segment, neighbor);
        Ok(table.ports.len() as u16)
    }

    /// Adds a route at `port`, replacing whatever segment held it.
    pub fn add_at(
        &self,
        port: u16,
        segment: u16,
        neighbor: Weak<dyn Neighbor>,
    ) -> Result<(), Error> {
        if port == 0 || port > MAX_PORT {
            return Err(Error::InvalidPort(port));
        }
        self.validate(segment)?;
        let mut table = self.table.lock().unwrap();
        let index = port as usize - 1;
        if table.ports.len() <= index {
            table.ports.resize(index + 1, None);
        }

        // A segment is reachable through one port only
        for slot in table.ports.iter_mut() {
            if *slot == Some(segment) {
                *slot = None;
            }
        }
        table.ports[index] = Some(segment);
        table.segments.insert(segment, neighbor);
        Ok(())
    }

    pub fn by_segment(&self, segment: u16) -> Option<Arc<dyn Neighbor>> {
        let table = self.table.lock().unwrap();
        table.segments.get(&segment).and_then(Weak::upgrade)
    }

    pub fn by_port(&self, port: u16) -> Option<Arc<dyn Neighbor>> {
        if port == 0 {
            return None;
        }
        let table = self.table.lock().unwrap();
        let segment = table.ports.get(port as usize - 1).copied().flatten()?;
        table.segments.get(&segment).and_then(Weak::upgrade)
    }

    /// Returns every live neighbor with a port, in port order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Neighbor>> {
        let table = self.table.lock().unwrap();
        table
            .ports
            .iter()
            .flatten()
            .filter_map(|segment| table.segments.get(segment).and_then(Weak::upgrade))
            .collect()
    }

    /// Returns the segments with a port, in port order.
    pub fn segments(&self) -> Vec<u16> {
        let table = self.table.lock().unwrap();
        table.ports.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacnet_npdu::{Address, Envelope};

    struct Stub(u16);

    impl Neighbor for Stub {
        fn segment(&self) -> u16 {
            self.0
        }

        fn relay(&self, _: u16, _: &Address, _: Envelope, _: bool) {}

        fn learned(&self) -> Vec<u16> {
            Vec::new()
        }
    }

    fn stub(segment: u16) -> Arc<dyn Neighbor> {
        Arc::new(Stub(segment))
    }

    #[test]
    fn test_ports_sequential() {
        let routes = Routes::new(1);
        let (two, three) = (stub(2), stub(3));
        assert_eq!(routes.add(2, Arc::downgrade(&two)).unwrap(), 1);
        assert_eq!(routes.add(3, Arc::downgrade(&three)).unwrap(), 2);
        assert_eq!(routes.add(2, Arc::downgrade(&two)).unwrap(), 1);
        assert_eq!(routes.segments(), vec![2, 3]);
        assert_eq!(routes.by_port(2).unwrap().segment(), 3);
        assert!(routes.by_port(0).is_none());
        assert!(routes.by_port(3).is_none());
    }

    #[test]
    fn test_invalid_segments() {
        let routes = Routes::new(1);
        let neighbor = stub(2);
        for segment in [LOCAL_SEGMENT, GLOBAL_SEGMENT, 1] {
            assert!(matches!(
                routes.add(segment, Arc::downgrade(&neighbor)),
                Err(Error::InvalidSegment(s)) if s == segment
            ));
            assert!(matches!(
                routes.add_at(1, segment, Arc::downgrade(&neighbor)),
                Err(Error::InvalidSegment(_))
            ));
        }
        assert!(routes.segments().is_empty());
    }

    #[test]
    fn test_explicit_ports() {
        let routes = Routes::new(1);
        let neighbor = stub(7);
        for port in [0, MAX_PORT + 1] {
            assert!(matches!(
                routes.add_at(port, 7, Arc::downgrade(&neighbor)),
                Err(Error::InvalidPort(p)) if p == port
            ));
        }

        // Unused slots stay empty
        routes.add_at(4, 7, Arc::downgrade(&neighbor)).unwrap();
        assert!(routes.by_port(1).is_none());
        assert_eq!(routes.by_port(4).unwrap().segment(), 7);

        // Automatic ports append after the highest slot
        let other = stub(8);
        assert_eq!(routes.add(8, Arc::downgrade(&other)).unwrap(), 5);

        // Moving a segment clears its old port
        routes.add_at(2, 7, Arc::downgrade(&neighbor)).unwrap();
        assert!(routes.by_port(4).is_none());
        assert_eq!(routes.segments(), vec![7, 8]);
    }

    #[test]
    fn test_no_room() {
        let routes = Routes::new(1);
        let neighbors: Vec<_> = (2..=257).map(stub).collect();
        for (i, neighbor) in neighbors.iter().enumerate().take(MAX_PORT as usize) {
            let port = routes.add(neighbor.segment(), Arc::downgrade(neighbor)).unwrap();
            assert_eq!(port as usize, i + 1);
        }
        let last = neighbors.last().unwrap();
        assert!(matches!(
            routes.add(last.segment(), Arc::downgrade(last)),
            Err(Error::NoRoomForRoutes)
        ));
        assert!(routes.by_segment(last.segment()).is_none());
    }

    #[test]
    fn test_dropped_neighbor() {
        let routes = Routes::new(1);
        let neighbor = stub(2);
        routes.add(2, Arc::downgrade(&neighbor)).unwrap();
        drop(neighbor);
        assert!(routes.by_segment(2).is_none());
        assert!(routes.snapshot().is_empty());
    }
}
