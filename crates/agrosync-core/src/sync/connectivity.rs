//! Bounded reachability check against the remote store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::remote::RemoteStore;
use crate::error::RemoteError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ConnectivityProbe {
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the probe, mapping a deadline overrun to [`RemoteError::Timeout`].
    pub async fn check(&self) -> Result<(), RemoteError> {
        match tokio::time::timeout(self.timeout, self.remote.probe()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    /// `true` only if the probe completed successfully within the timeout.
    pub async fn is_reachable(&self) -> bool {
        match self.check().await {
            Ok(()) => {
                debug!("remote store reachable");
                true
            }
            Err(err) => {
                warn!(error = %err, "remote store unreachable");
                false
            }
        }
    }
}
