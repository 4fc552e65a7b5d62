//! Ephemeral port selection (spec.md §4.3): pick pseudo-randomly in the
//! configured range, confirm availability with a bind-then-close probe.

use std::net::{SocketAddr, TcpListener};

use rand::Rng;

use crate::error::{CacheError, Result};

pub fn select_port(range_start: u16, range_end: u16, max_retries: u32) -> Result<u16> {
    let mut rng = rand::thread_rng();
    for _ in 0..max_retries {
        let candidate = rng.gen_range(range_start..=range_end);
        if is_available(candidate) {
            return Ok(candidate);
        }
    }
    Err(CacheError::PortExhaustion)
}

fn is_available(port: u16) -> bool {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    TcpListener::bind(addr).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_a_port_within_range() {
        let port = select_port(49152, 65535, 20).unwrap();
        assert!((49152..=65535).contains(&port));
    }

    #[test]
    fn exhausts_when_range_is_occupied() {
        // A single-port range held open for the duration of the probe
        // always fails the bind-then-close check.
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let result = select_port(port, port, 3);
        assert!(matches!(result, Err(CacheError::PortExhaustion)));
    }
}
