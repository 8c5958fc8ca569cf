//! Crash-safety channel.
//!
//! The sandbox image runs a listener on a dedicated port and kills its own
//! container when that connection drops. Holding the connection open ties the
//! container's lifetime to this process. The channel must only be released
//! after the container has been killed: the in-container supervisor treats
//! the close as a liveness loss and races an explicit kill.

use {
    tokio::{io::AsyncWriteExt, net::TcpStream},
    tracing::debug,
};

use crate::error::{EnvError, Result};

#[derive(Debug)]
pub struct LivenessChannel {
    addr: String,
    stream: Option<TcpStream>,
}

impl LivenessChannel {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            EnvError::Provisioning(format!("failed to connect to kill socket {addr}: {e}"))
        })?;
        debug!(addr, "crash-safety channel open");
        Ok(Self {
            addr: addr.to_string(),
            stream: Some(stream),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Release the channel. Closing an already-closed channel is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        // The peer may have already gone away with its container.
        if let Err(e) = stream.shutdown().await {
            debug!(addr = %self.addr, error = %e, "crash-safety channel shutdown");
        }
        Ok(())
    }
}
