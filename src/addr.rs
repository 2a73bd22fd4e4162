//! Overlay address allocation
//!
//! This module maps container ids to addresses inside the fixed
//! `10.10.0.0/16` overlay network.
//!
//! # Address Layout
//!
//! The third and fourth octets are derived from the container id with a
//! 255-based split, which the deployed fleet already depends on:
//!
//! ```text
//! 10.10.{id / 255}.{id % 255}
//! ```
//!
//! The high octet 255 is reserved for the overlay gateway
//! (`10.10.255.254`), so ids that would land there are rejected as
//! exhausted rather than allowed to collide.

use std::net::Ipv4Addr;

use crate::error::ProvisionError;

/// First two octets of the overlay network
pub const OVERLAY_NET: [u8; 2] = [10, 10];

/// High octet reserved for the gateway
pub const GATEWAY_OCTET: u8 = 255;

/// Overlay gateway address
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 10, 255, 254);

/// Ids at or above this can never be addressed
pub const MAX_CONTAINER_ID: i64 = 65534;

/// Maps container ids to overlay addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressAllocator;

impl AddressAllocator {
    /// Create a new allocator for the overlay network
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compute the overlay address for a container id
    ///
    /// The mapping is injective: distinct ids always produce distinct
    /// addresses.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::AddressExhausted` for negative ids, ids at
    /// or above `MAX_CONTAINER_ID`, and ids whose high octet would collide
    /// with the reserved gateway octet. Exhaustion is fatal for the caller.
    pub fn allocate(&self, id: i64) -> Result<Ipv4Addr, ProvisionError> {
        if id < 0 || id >= MAX_CONTAINER_ID {
            return Err(ProvisionError::AddressExhausted { id });
        }

        let hi = id / 255;
        let lo = id % 255;
        if hi >= i64::from(GATEWAY_OCTET) {
            return Err(ProvisionError::AddressExhausted { id });
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let address = Ipv4Addr::new(OVERLAY_NET[0], OVERLAY_NET[1], hi as u8, lo as u8);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_ids_land_in_first_subnet() {
        let alloc = AddressAllocator::new();
        assert_eq!(alloc.allocate(0).unwrap(), Ipv4Addr::new(10, 10, 0, 0));
        assert_eq!(alloc.allocate(42).unwrap(), Ipv4Addr::new(10, 10, 0, 42));
        assert_eq!(alloc.allocate(254).unwrap(), Ipv4Addr::new(10, 10, 0, 254));
    }

    #[test]
    fn test_255_split_boundary() {
        let alloc = AddressAllocator::new();
        // 255 wraps to the next high octet, not to .0.255
        assert_eq!(alloc.allocate(255).unwrap(), Ipv4Addr::new(10, 10, 1, 0));
        assert_eq!(alloc.allocate(256).unwrap(), Ipv4Addr::new(10, 10, 1, 1));
        assert_eq!(alloc.allocate(510).unwrap(), Ipv4Addr::new(10, 10, 2, 0));
    }

    #[test]
    fn test_injectivity_over_sample() {
        let alloc = AddressAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for id in 0..10_000 {
            let addr = alloc.allocate(id).unwrap();
            assert!(seen.insert(addr), "duplicate address for id {id}");
        }
    }

    #[test]
    fn test_exhaustion_at_id_bound() {
        let alloc = AddressAllocator::new();
        assert!(matches!(
            alloc.allocate(MAX_CONTAINER_ID),
            Err(ProvisionError::AddressExhausted { .. })
        ));
        assert!(matches!(
            alloc.allocate(MAX_CONTAINER_ID + 1),
            Err(ProvisionError::AddressExhausted { .. })
        ));
        assert!(matches!(
            alloc.allocate(-1),
            Err(ProvisionError::AddressExhausted { .. })
        ));
    }

    #[test]
    fn test_gateway_octet_is_reserved() {
        let alloc = AddressAllocator::new();
        // 255 * 255 = 65025 is the first id whose high octet is 255
        assert_eq!(
            alloc.allocate(65024).unwrap(),
            Ipv4Addr::new(10, 10, 254, 254)
        );
        assert!(matches!(
            alloc.allocate(65025),
            Err(ProvisionError::AddressExhausted { .. })
        ));
    }

    #[test]
    fn test_never_allocates_the_gateway() {
        let alloc = AddressAllocator::new();
        for id in 0..MAX_CONTAINER_ID {
            if let Ok(addr) = alloc.allocate(id) {
                assert_ne!(addr, GATEWAY);
            }
        }
    }
}
