//! Protocol session establishment.
//!
//! Chrome's target list only becomes queryable once its startup completes,
//! which cannot be observed from outside, so connecting is a bounded loop of
//! list-and-attach attempts.

use std::time::Duration;

use {
    tokio::time::Instant,
    tracing::{debug, info},
};

use crate::{
    error::{EnvError, Result},
    session::{ProtocolSession, SessionConnector},
};

/// Retry budget for [`connect_devtools`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_secs(1),
        }
    }
}

/// Open a session on the first attachable page of `host`.
///
/// Gives up after `policy.attempts` failures or when `deadline` passes,
/// whichever comes first. The deadline also bounds each attempt.
pub async fn connect_devtools(
    connector: &dyn SessionConnector,
    host: &str,
    policy: ConnectPolicy,
    deadline: Instant,
) -> Result<Box<dyn ProtocolSession>> {
    let mut last_err = EnvError::ProtocolConnect("no connection attempts made".into());

    for attempt in 1..=policy.attempts {
        let attempted = tokio::time::timeout_at(deadline, attempt_devtools(connector, host)).await;
        let Ok(attempted) = attempted else {
            return Err(deadline_exceeded(host));
        };
        match attempted {
            Ok(session) => {
                info!(host, attempt, "connected to devtools");
                return Ok(session);
            },
            Err(e) => {
                debug!(host, attempt, error = %e, "devtools connection attempt failed");
                last_err = e;
            },
        }
        if attempt == policy.attempts {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(policy.interval) => {},
            () = tokio::time::sleep_until(deadline) => return Err(deadline_exceeded(host)),
        }
    }

    Err(match last_err {
        e @ EnvError::ProtocolConnect(_) => e,
        other => EnvError::ProtocolConnect(other.to_string()),
    })
}

fn deadline_exceeded(host: &str) -> EnvError {
    EnvError::Timeout(format!("waiting for devtools at {host}"))
}

async fn attempt_devtools(
    connector: &dyn SessionConnector,
    host: &str,
) -> Result<Box<dyn ProtocolSession>> {
    let targets = connector.list_targets(host).await?;
    let target = targets
        .iter()
        .find(|t| t.is_attachable_page())
        .ok_or_else(|| EnvError::ProtocolConnect("no Chrome page endpoint".into()))?;
    connector.connect(host, target).await
}
