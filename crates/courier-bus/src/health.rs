//! # Health Check
//!
//! Round-trip liveness probe: the bus emits a nonce on the reserved
//! [`HEALTH_CHECK_EVENT`] and waits for its own copy to come back through the
//! transport.
//!
//! Each call owns its listener, nonce and timer, so concurrent checks on one
//! bus are independent. Replies carrying another nonce are ignored, and once
//! a call has an outcome its listener is gone.

use crate::bus::EventBus;
use crate::envelope::Envelope;
use crate::error::HealthCheckError;
use crate::HEALTH_CHECK_EVENT;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of a successful health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Publish-to-receive round trip.
    pub latency: Duration,
    /// Nonce that came back.
    pub nonce: String,
}

impl EventBus {
    /// Probe the transport round trip.
    ///
    /// # Errors
    ///
    /// - `HealthCheckError::NotConnected` - no open connection
    /// - `HealthCheckError::Publish` - the probe could not be published
    /// - `HealthCheckError::TimedOut` - no matching reply within the timeout
    pub async fn health_check(&self) -> Result<HealthReport, HealthCheckError> {
        if !self.is_connected() {
            return Err(HealthCheckError::NotConnected);
        }

        let after = self.health_check_timeout();
        let nonce = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel::<Instant>();
        let pending = Mutex::new(Some(reply_tx));

        let expected = nonce.clone();
        let probe = self.on(HEALTH_CHECK_EVENT, move |args: &[Value]| {
            if args.first().and_then(Value::as_str) != Some(expected.as_str()) {
                return;
            }
            if let Some(reply) = pending.lock().take() {
                let _ = reply.send(Instant::now());
            }
        });

        let started = Instant::now();
        let envelope = Envelope::new(HEALTH_CHECK_EVENT, vec![Value::String(nonce.clone())]);
        let outcome = tokio::time::timeout(after, async {
            self.publish_envelope(&envelope)
                .await
                .map_err(HealthCheckError::Publish)?;
            // The sender only goes away with the listener, which outlives this future.
            reply_rx
                .await
                .map_err(|_| HealthCheckError::TimedOut { after })
        })
        .await;

        self.remove_listener(HEALTH_CHECK_EVENT, probe);

        match outcome {
            Ok(Ok(received_at)) => {
                let latency = received_at.saturating_duration_since(started);
                self.metrics().record_health_check(Some(latency));
                debug!(
                    nonce = %nonce,
                    latency_us = latency.as_micros() as u64,
                    "Health check passed"
                );
                Ok(HealthReport { latency, nonce })
            }
            Ok(Err(error)) => {
                warn!(nonce = %nonce, error = %error, "Health check failed");
                Err(error)
            }
            Err(_) => {
                self.metrics().record_health_check(None);
                warn!(nonce = %nonce, ?after, "Health check timed out");
                Err(HealthCheckError::TimedOut { after })
            }
        }
    }
}
