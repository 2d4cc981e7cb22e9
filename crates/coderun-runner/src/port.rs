// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port allocation for project dev servers.
//!
//! Ports are drawn at random from [`PORT_RANGE`], skipping the platform's own
//! listening ports and any port the caller reports as taken. A port is assigned
//! once, when the project is created, and never re-validated afterwards.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

use rand::Rng;
use thiserror::Error;

/// Range that project ports are drawn from.
pub const PORT_RANGE: RangeInclusive<u16> = 3000..=9999;

/// Ports the platform itself listens on.
pub const DEFAULT_RESERVED_PORTS: [u16; 2] = [3000, 5000];

/// Random draws before falling back to a linear scan.
const MAX_RANDOM_ATTEMPTS: usize = 1024;

/// Errors from port allocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PortError {
    /// Every port in the range is reserved or taken.
    #[error("No free port left in {min}-{max}")]
    Exhausted {
        /// Lower bound of the range.
        min: u16,
        /// Upper bound of the range.
        max: u16,
    },
}

/// Random port allocator.
///
/// Holds no mutable state; concurrent callers only share the thread-local RNG.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    reserved: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Allocator over [`PORT_RANGE`] with [`DEFAULT_RESERVED_PORTS`].
    pub fn new() -> Self {
        Self::with_reserved(DEFAULT_RESERVED_PORTS)
    }

    /// Allocator over [`PORT_RANGE`] with a custom reserved set.
    pub fn with_reserved(reserved: impl IntoIterator<Item = u16>) -> Self {
        Self {
            range: PORT_RANGE,
            reserved: reserved.into_iter().collect(),
        }
    }

    /// Whether the port is never handed out.
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.contains(&port)
    }

    /// Draw a port that is not reserved.
    pub fn allocate(&self) -> Result<u16, PortError> {
        self.allocate_excluding(&HashSet::new())
    }

    /// Draw a port that is neither reserved nor in `taken`.
    pub fn allocate_excluding(&self, taken: &HashSet<u16>) -> Result<u16, PortError> {
        let available = |port: &u16| !self.reserved.contains(port) && !taken.contains(port);

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let port = rng.gen_range(self.range.clone());
            if available(&port) {
                return Ok(port);
            }
        }

        self.range
            .clone()
            .find(available)
            .ok_or(PortError::Exhausted {
                min: *self.range.start(),
                max: *self.range.end(),
            })
    }
}

/// Whether nothing is currently listening on `port` on the host.
///
/// Best-effort probe; the answer can change as soon as it is returned.
pub fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}
