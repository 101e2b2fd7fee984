//! Admission control (spec.md §4.4 "Admission control", §5 "Resource policy")
//!
//! Grounded directly on the teacher's `server::device::DeviceRegistry`:
//! an `Arc<Self>` holding a lock-guarded map, with a register/deregister
//! pair that guarantees cleanup on disconnect. The only state shared across
//! sessions besides immutable configuration.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::errors::RelayError;

/// Global + per-address connection accounting.
pub struct ConnectionRegistry {
    max_connections: usize,
    max_connections_per_ip: usize,
    by_address: RwLock<HashMap<IpAddr, usize>>,
    total: RwLock<usize>,
}

/// RAII guard returned by `register`; deregisters on drop so a panicking
/// or early-returning handler can never leak a slot.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    address: IpAddr,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize, max_connections_per_ip: usize) -> Arc<Self> {
        Arc::new(Self {
            max_connections,
            max_connections_per_ip,
            by_address: RwLock::new(HashMap::new()),
            total: RwLock::new(0),
        })
    }

    /// Admit a new connection from `address`, or reject with an admission
    /// error if either cap is already at capacity.
    pub async fn register(self: &Arc<Self>, address: IpAddr) -> Result<ConnectionGuard, RelayError> {
        let mut total = self.total.write().await;
        if *total >= self.max_connections {
            return Err(RelayError::AdmissionDenied {
                reason: "global connection limit reached",
            });
        }

        let mut by_address = self.by_address.write().await;
        let count = by_address.entry(address).or_insert(0);
        if *count >= self.max_connections_per_ip {
            return Err(RelayError::AdmissionDenied {
                reason: "per-address connection limit reached",
            });
        }

        *count += 1;
        *total += 1;

        Ok(ConnectionGuard {
            registry: Arc::clone(self),
            address,
        })
    }

    async fn deregister(&self, address: IpAddr) {
        let mut total = self.total.write().await;
        *total = total.saturating_sub(1);

        let mut by_address = self.by_address.write().await;
        if let Some(count) = by_address.get_mut(&address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                by_address.remove(&address);
            }
        }
    }

    #[cfg(test)]
    async fn total_connections(&self) -> usize {
        *self.total.read().await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let address = self.address;
        tokio::spawn(async move {
            registry.deregister(address).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[tokio::test]
    async fn rejects_beyond_global_cap() {
        let registry = ConnectionRegistry::new(1, 5);
        let _first = registry.register(addr(1)).await.unwrap();
        let second = registry.register(addr(2)).await;
        assert!(matches!(second, Err(RelayError::AdmissionDenied { .. })));
    }

    #[tokio::test]
    async fn rejects_beyond_per_address_cap() {
        let registry = ConnectionRegistry::new(50, 1);
        let _first = registry.register(addr(1)).await.unwrap();
        let second = registry.register(addr(1)).await;
        assert!(matches!(second, Err(RelayError::AdmissionDenied { .. })));
        // A different address is unaffected.
        let third = registry.register(addr(2)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn drop_releases_the_slot() {
        let registry = ConnectionRegistry::new(1, 5);
        {
            let _guard = registry.register(addr(1)).await.unwrap();
            assert_eq!(registry.total_connections().await, 1);
        }
        // Deregister runs on a spawned task; yield until it lands.
        for _ in 0..100 {
            if registry.total_connections().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.total_connections().await, 0);
    }
}
