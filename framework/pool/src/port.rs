//! Port allocation for runners.
//!
//! Ports are probed against the real socket state so that listeners started outside the fleet
//! are avoided as well. Probing is not atomic with the runner binding the port, so the allocator
//! also never hands out a port at or below one it has already returned.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};

use crate::config::PortRange;
use crate::error::{FleetError, FleetResult};

/// Decides whether a port is currently free.
pub trait PortProbe {
    fn is_free(&self, port: u16) -> bool;
}

impl<F> PortProbe for F
where
    F: Fn(u16) -> bool,
{
    fn is_free(&self, port: u16) -> bool {
        self(port)
    }
}

/// Probes by binding a listener on all interfaces and dropping it straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }
}

/// Find the first free port in `range`, starting `offset` ports past the start of the range.
pub fn next_free_port<P: PortProbe>(range: PortRange, offset: usize, probe: &P) -> Option<u16> {
    let first = usize::from(range.start).checked_add(offset)?;
    (first..=usize::from(range.end))
        .filter_map(|port| u16::try_from(port).ok())
        .find(|port| probe.is_free(*port))
}

/// Hands out ports for one scale-up batch.
///
/// Every returned port moves the offset past it, so a port is never returned twice and a
/// candidate that was discarded after a conflict is never retried within the batch.
#[derive(Debug)]
pub struct PortAllocator<P = TcpPortProbe> {
    range: PortRange,
    offset: usize,
    reserved: BTreeSet<u16>,
    probe: P,
}

impl PortAllocator<TcpPortProbe> {
    pub fn new(range: PortRange) -> Self {
        Self::with_probe(range, TcpPortProbe)
    }
}

impl<P: PortProbe> PortAllocator<P> {
    pub fn with_probe(range: PortRange, probe: P) -> Self {
        Self {
            range,
            offset: 0,
            reserved: BTreeSet::new(),
            probe,
        }
    }

    /// Ports that must not be returned even if they probe as free, such as those of runners that
    /// already exist but have not bound their port yet.
    pub fn reserve(&mut self, ports: impl IntoIterator<Item = u16>) {
        self.reserved.extend(ports);
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn next_free_port(&mut self) -> FleetResult<u16> {
        let reserved = &self.reserved;
        let probe = &self.probe;
        let port = next_free_port(self.range, self.offset, &|port: u16| {
            !reserved.contains(&port) && probe.is_free(port)
        })
        .ok_or(FleetError::PortsExhausted {
            start: self.range.start,
            end: self.range.end,
        })?;

        self.offset = usize::from(port - self.range.start) + 1;
        log::debug!("Allocated port {port}");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn returns_first_free_port_after_offset() {
        let range = PortRange::new(9000, 9005);
        let probe = |port: u16| port != 9001;
        assert_eq!(next_free_port(range, 0, &probe), Some(9000));
        assert_eq!(next_free_port(range, 1, &probe), Some(9002));
        assert_eq!(next_free_port(range, 6, &probe), None);
    }

    #[test]
    fn never_returns_the_same_port_twice() {
        for seed in 0..50 {
            let rng = std::cell::RefCell::new(StdRng::seed_from_u64(seed));
            let probe = |_port: u16| rng.borrow_mut().gen_bool(0.6);
            let mut allocator = PortAllocator::with_probe(PortRange::new(10000, 10063), probe);

            let mut seen = HashSet::new();
            while let Ok(port) = allocator.next_free_port() {
                assert!(seen.insert(port), "port {port} returned twice with seed {seed}");
            }
        }
    }

    #[test]
    fn always_free_probe_still_advances() {
        let mut allocator = PortAllocator::with_probe(PortRange::new(9000, 9002), |_| true);
        assert_eq!(allocator.next_free_port().unwrap(), 9000);
        assert_eq!(allocator.next_free_port().unwrap(), 9001);
        assert_eq!(allocator.next_free_port().unwrap(), 9002);
        assert!(matches!(
            allocator.next_free_port(),
            Err(FleetError::PortsExhausted {
                start: 9000,
                end: 9002
            })
        ));
    }

    #[test]
    fn reserved_ports_are_skipped() {
        let mut allocator = PortAllocator::with_probe(PortRange::new(9000, 9003), |_| true);
        allocator.reserve([9000, 9002]);
        assert_eq!(allocator.next_free_port().unwrap(), 9001);
        assert_eq!(allocator.next_free_port().unwrap(), 9003);
        assert!(allocator.next_free_port().is_err());
    }

    #[test]
    fn bound_listener_is_avoided() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();
        assert!(!TcpPortProbe.is_free(taken));

        let range = PortRange::new(taken, taken);
        let mut allocator = PortAllocator::new(range);
        assert!(allocator.next_free_port().is_err());
    }

    #[test]
    fn range_end_at_u16_max_does_not_overflow() {
        let mut allocator = PortAllocator::with_probe(PortRange::new(u16::MAX, u16::MAX), |_| true);
        assert_eq!(allocator.next_free_port().unwrap(), u16::MAX);
        assert!(allocator.next_free_port().is_err());
    }
}
