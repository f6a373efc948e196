//! Health gate for remotely managed systemd units

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Error;
use crate::transport::Transport;

/// Delay between `is-active` probes
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Block until `unit` on `host` reports `active`, or the deadline elapses
///
/// Polls `sudo systemctl is-active <unit>` every 5 seconds. Probe failures
/// (the unit not existing yet, a transient transport error) count as "not
/// active" and the gate keeps polling until the deadline.
pub(crate) async fn wait_for_service(
    transport: &dyn Transport,
    host: &str,
    unit: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;
    let probe = format!("sudo systemctl is-active {unit}");
    while Instant::now() < deadline {
        match transport.execute(host, &probe).await {
            Ok(output) if output.trim() == "active" => {
                info!(unit, host, "service is healthy");
                return Ok(());
            }
            Ok(output) => debug!(unit, state = output.trim(), "service not active yet"),
            Err(e) => debug!(unit, error = %e, "health probe failed"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(Error::unhealthy(unit, timeout))
}
