// Signal handling for graceful server shutdown

use crate::error::{QuarryError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signal that asked the server to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    Hangup,
}

impl ShutdownSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
        }
    }
}

/// Listens for SIGTERM, SIGINT and SIGHUP
pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Wait for the next shutdown signal
    pub async fn wait(&mut self) -> ShutdownSignal {
        let received = tokio::select! {
            _ = self.sigterm.recv() => ShutdownSignal::Terminate,
            _ = self.sigint.recv() => ShutdownSignal::Interrupt,
            _ = self.sighup.recv() => ShutdownSignal::Hangup,
        };
        tracing::info!("Received {}", received.as_str());
        received
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| QuarryError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}
