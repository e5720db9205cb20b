//! Loopback port allocator.
//!
//! Hands out unique ports in `[4100, 4999]` on `127.0.0.1`. Reservations are
//! tracked in memory, but the only authoritative "is this free" check is a
//! real bind attempt, since another process on the host may already hold a
//! port we think is free.

use std::collections::HashMap;
use std::net::TcpListener;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

const RANGE_START: u16 = 4100;
const RANGE_END: u16 = 4999;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free port available in the configured range")]
    NoPortAvailable,
}

struct State {
    /// key -> last-assigned port, retained across release() so a restart
    /// of the same key tends to land back on the same port.
    reservations: HashMap<String, u16>,
    in_use: std::collections::HashSet<u16>,
}

/// Bounded, conflict-safe loopback port allocator.
pub struct PortAllocator {
    range: std::ops::RangeInclusive<u16>,
    state: Mutex<State>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::with_range(RANGE_START, RANGE_END)
    }

    /// Same allocator, but over a caller-chosen range (the `system.port_range`
    /// config override).
    pub fn with_range(start: u16, end: u16) -> Self {
        Self {
            range: start..=end,
            state: Mutex::new(State {
                reservations: HashMap::new(),
                in_use: std::collections::HashSet::new(),
            }),
        }
    }

    /// Allocate a port for `key`, preferring to reuse a prior reservation
    /// if it still binds. Otherwise returns the lowest free, OS-confirmed
    /// bindable port in the range.
    pub fn allocate(&self, key: &str) -> Result<u16, PortError> {
        if let Some(candidate) = {
            let state = self.state.lock();
            state.reservations.get(key).copied()
        } {
            if !self.state.lock().in_use.contains(&candidate) && Self::bind_probe(candidate) {
                let mut state = self.state.lock();
                state.in_use.insert(candidate);
                state.reservations.insert(key.to_string(), candidate);
                debug!(key, port = candidate, "reused prior port reservation");
                return Ok(candidate);
            }
        }

        for port in self.range.clone() {
            let already_in_use = self.state.lock().in_use.contains(&port);
            if already_in_use {
                continue;
            }
            if Self::bind_probe(port) {
                let mut state = self.state.lock();
                // Re-validate: another racer may have taken it between the
                // probe and reacquiring the lock.
                if state.in_use.contains(&port) {
                    continue;
                }
                state.in_use.insert(port);
                state.reservations.insert(key.to_string(), port);
                debug!(key, port, "allocated port");
                return Ok(port);
            }
        }

        Err(PortError::NoPortAvailable)
    }

    /// Release the port held by `key`. The key -> port mapping is retained
    /// so a subsequent `allocate` for the same key can reuse it.
    pub fn release(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(port) = state.reservations.get(key).copied() {
            state.in_use.remove(&port);
            debug!(key, port, "released port");
        }
    }

    /// The port currently held by `key`, if any.
    pub fn port_of(&self, key: &str) -> Option<u16> {
        let state = self.state.lock();
        let port = *state.reservations.get(key)?;
        if state.in_use.contains(&port) {
            Some(port)
        } else {
            None
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Public bind-probe, used by callers (e.g. `restart`) that need to
    /// wait for a just-released port to actually free up on the OS side.
    pub fn is_bindable(port: u16) -> bool {
        Self::bind_probe(port)
    }

    /// A real bind attempt on 127.0.0.1, dropped immediately. This is the
    /// only trustworthy signal that a port is free on this host.
    fn bind_probe(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ports() {
        let allocator = PortAllocator::new();
        let a = allocator.allocate("a:global").unwrap();
        let b = allocator.allocate("b:global").unwrap();
        assert_ne!(a, b);
        assert!((RANGE_START..=RANGE_END).contains(&a));
        assert!((RANGE_START..=RANGE_END).contains(&b));
    }

    #[test]
    fn reuses_released_port_for_same_key() {
        let allocator = PortAllocator::new();
        let first = allocator.allocate("a:global").unwrap();
        allocator.release("a:global");
        let second = allocator.allocate("a:global").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn release_frees_port_for_other_keys() {
        let allocator = PortAllocator::new();
        let first = allocator.allocate("a:global").unwrap();
        assert_eq!(allocator.in_use_count(), 1);
        allocator.release("a:global");
        assert_eq!(allocator.in_use_count(), 0);
        assert_eq!(allocator.port_of("a:global"), None);
        let _ = first;
    }

    #[test]
    fn concurrent_allocate_never_collides() {
        use std::sync::Arc;
        use std::thread;

        let allocator = Arc::new(PortAllocator::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let allocator = allocator.clone();
                thread::spawn(move || allocator.allocate(&format!("k{i}")).unwrap())
            })
            .collect();

        let mut ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ports.sort_unstable();
        let before = ports.len();
        ports.dedup();
        assert_eq!(before, ports.len(), "duplicate ports allocated concurrently");
    }
}
