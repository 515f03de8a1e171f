//! Scheduled leaf certificate rotation scan (§4.2)

use crate::certificate_issuer::CertificateIssuer;
use crate::traits::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// How often the monitor scans registered generators in production use.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Scans the issuer's generators on a fixed schedule and rotates any whose
/// certificate has entered its rotation window.
pub struct ExpiryMonitor {
    issuer: Arc<CertificateIssuer>,
    clock: Arc<dyn Clock>,
}

impl ExpiryMonitor {
    /// Build a monitor over `issuer`, using the system clock.
    pub fn new(issuer: Arc<CertificateIssuer>) -> Self {
        Self {
            issuer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build a monitor with an injected clock (for rotation-window tests).
    pub fn with_clock(issuer: Arc<CertificateIssuer>, clock: Arc<dyn Clock>) -> Self {
        Self { issuer, clock }
    }

    /// `rotateAt = notAfter - max(ceil(validity / 2), 1 day)` (§4.2).
    pub fn rotate_at(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> DateTime<Utc> {
        let validity = not_after - not_before;
        let half = chrono::Duration::seconds((validity.num_seconds() + 1) / 2);
        let window = half.max(chrono::Duration::days(1));
        not_after - window
    }

    /// Scan every registered generator once, rotating those whose window has
    /// opened. A single generator's failure is logged and does not stop the
    /// scan of the rest (§4.2).
    pub async fn scan_once(&self) {
        let now = self.clock.now();
        for id in self.issuer.generator_ids() {
            let Some(cert) = self.issuer.current_certificate(id) else {
                continue;
            };
            let Ok(validation) =
                crate::crypto::rfc5280::validate_certificate(cert.certificate_pem.as_bytes())
            else {
                warn!("expiry monitor could not parse a generator's own certificate");
                continue;
            };
            let Some(metadata) = validation.metadata else {
                continue;
            };
            let rotate_at = Self::rotate_at(metadata.not_before, metadata.not_after);
            if now >= rotate_at {
                info!(rotate_at = %rotate_at, "leaf certificate entering rotation window");
                if let Err(e) = self.issuer.rotate(id).await {
                    warn!(error = %e, "scheduled certificate rotation failed, keeping existing certificate");
                }
            }
        }
    }

    /// Re-invoke every generator regardless of remaining validity, in
    /// response to a CA rotation.
    pub async fn on_ca_changed(&self) {
        self.issuer.rotate_all().await;
    }

    /// Run the scan loop on `interval` until `shutdown` is set to `true`.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.scan_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rotate_at_uses_half_validity_for_long_lived_certs() {
        let not_before = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let not_after = not_before + chrono::Duration::days(10);
        let rotate_at = ExpiryMonitor::rotate_at(not_before, not_after);
        assert_eq!(rotate_at, not_after - chrono::Duration::days(5));
    }

    #[test]
    fn rotate_at_floors_at_one_day_for_short_lived_certs() {
        let not_before = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let not_after = not_before + chrono::Duration::hours(2);
        let rotate_at = ExpiryMonitor::rotate_at(not_before, not_after);
        assert_eq!(rotate_at, not_after - chrono::Duration::days(1));
    }
}
