// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Port Detector
//!
//! Hands out free local TCP ports from an inclusive range for executor
//! control servers. An issued port is leased for `lease_duration` so two
//! concurrent launches never receive the same port before the first executor
//! has had a chance to bind it.
//!
//! The lease table lock is held for the whole scan, which makes `get_port`
//! linearizable across tasks. Each lease carries an id so a holder can only
//! release its own lease, never a later one issued for the same port.

use crate::domain::config::PortRangeConfig;
use crate::domain::supervisor::PortError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Answers whether a port is currently taken on this host.
pub trait PortCheck: Send + Sync {
    fn is_in_use(&self, port: u16) -> bool;
}

/// Checks by binding `0.0.0.0:<port>` and immediately releasing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindCheck;

impl PortCheck for BindCheck {
    fn is_in_use(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_err()
    }
}

/// A port handed out by [`PortDetector::lease_port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortLease {
    pub port: u16,
    id: u64,
}

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    id: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct LeaseTable {
    entries: HashMap<u16, LeaseEntry>,
    next_id: u64,
}

pub struct PortDetector {
    min_port: u16,
    max_port: u16,
    lease_duration: Duration,
    check: Arc<dyn PortCheck>,
    leases: Mutex<LeaseTable>,
}

impl PortDetector {
    pub fn new(min_port: u16, max_port: u16, lease_duration: Duration) -> Result<Self, PortError> {
        Self::with_check(min_port, max_port, lease_duration, Arc::new(BindCheck))
    }

    pub fn with_check(
        min_port: u16,
        max_port: u16,
        lease_duration: Duration,
        check: Arc<dyn PortCheck>,
    ) -> Result<Self, PortError> {
        if min_port == 0 || min_port > max_port {
            return Err(PortError::InvalidRange { min_port, max_port });
        }
        Ok(Self {
            min_port,
            max_port,
            lease_duration,
            check,
            leases: Mutex::new(LeaseTable::default()),
        })
    }

    pub fn from_config(config: &PortRangeConfig) -> Result<Self, PortError> {
        Self::new(config.min_port, config.max_port, config.lease_duration)
    }

    /// First port in range that is free and not under an unexpired lease.
    pub fn get_port(&self) -> Result<u16, PortError> {
        self.lease_port().map(|lease| lease.port)
    }

    pub fn lease_port(&self) -> Result<PortLease, PortError> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        leases.entries.retain(|_, entry| entry.expires_at > now);

        for port in self.min_port..=self.max_port {
            if leases.entries.contains_key(&port) || self.check.is_in_use(port) {
                continue;
            }
            leases.next_id += 1;
            let id = leases.next_id;
            leases.entries.insert(
                port,
                LeaseEntry {
                    id,
                    expires_at: now + self.lease_duration,
                },
            );
            debug!(port, lease_id = id, "Leased executor port");
            return Ok(PortLease { port, id });
        }

        metrics::counter!("jobvisor_port_exhausted_total").increment(1);
        warn!(
            min_port = self.min_port,
            max_port = self.max_port,
            "No free port left in range"
        );
        Err(PortError::Exhausted {
            min_port: self.min_port,
            max_port: self.max_port,
        })
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        self.check.is_in_use(port)
    }

    /// Drops whatever lease is held on `port`.
    pub fn release(&self, port: u16) {
        self.leases.lock().entries.remove(&port);
    }

    /// Drops `lease` early, e.g. when the executor failed to launch. A no-op
    /// once the port has been leased again to someone else.
    pub fn release_lease(&self, lease: &PortLease) -> bool {
        let mut leases = self.leases.lock();
        match leases.entries.get(&lease.port) {
            Some(entry) if entry.id == lease.id => {
                leases.entries.remove(&lease.port);
                true
            }
            _ => false,
        }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min_port, self.max_port)
    }
}
