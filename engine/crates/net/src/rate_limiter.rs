use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Admission limits for new WebSocket connections and inbound frames.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    /// Inbound text frames longer than this are dropped unparsed.
    pub max_input_length: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 5,
            max_input_length: 4096,
        }
    }
}

/// Reason a connection was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionRejection {
    #[error("server at max connections")]
    TotalLimitReached,
    #[error("too many connections from this IP")]
    IpLimitReached,
}

/// Tracks connection counts per IP and total.
/// Shared across server tasks via Arc<Mutex>.
#[derive(Debug)]
pub struct ConnectionLimiter {
    limits: ConnectionLimits,
    total: usize,
    per_ip: BTreeMap<IpAddr, usize>,
}

impl ConnectionLimiter {
    pub fn new(limits: ConnectionLimits) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            limits,
            total: 0,
            per_ip: BTreeMap::new(),
        }))
    }

    /// Try to admit a new connection.
    pub fn try_admit(&mut self, ip: IpAddr) -> Result<(), AdmissionRejection> {
        if self.total >= self.limits.max_connections_total {
            return Err(AdmissionRejection::TotalLimitReached);
        }
        let count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.limits.max_connections_per_ip {
            return Err(AdmissionRejection::IpLimitReached);
        }
        *count += 1;
        self.total += 1;
        Ok(())
    }

    /// Release a connection slot when a client disconnects.
    pub fn release(&mut self, ip: IpAddr) {
        if let Some(count) = self.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_ip.remove(&ip);
            }
        }
        self.total = self.total.saturating_sub(1);
    }

    pub fn total_connections(&self) -> usize {
        self.total
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }
}
