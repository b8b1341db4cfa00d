//! Termination signals received while waiting or running setup.

use std::io;

#[cfg(unix)]
pub struct Shutdown {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Shutdown {
    /// Registers the handlers up front so a failure surfaces before any waiting.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves with the signal number once SIGINT or SIGTERM arrives.
    pub async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
        }
    }
}

#[cfg(not(unix))]
pub struct Shutdown;

#[cfg(not(unix))]
impl Shutdown {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    /// Ctrl-C is reported as SIGINT (2).
    pub async fn recv(&mut self) -> i32 {
        match tokio::signal::ctrl_c().await {
            Ok(()) => 2,
            Err(err) => {
                tracing::warn!("Ctrl-C handler unavailable: {err}");
                std::future::pending().await
            }
        }
    }
}

impl Shutdown {
    /// A signal that already arrived, without waiting for a new one.
    pub async fn pending(&mut self) -> Option<i32> {
        // Lets the runtime drain signals delivered since it last polled.
        tokio::task::yield_now().await;
        tokio::select! {
            biased;
            signo = self.recv() => Some(signo),
            () = std::future::ready(()) => None,
        }
    }
}
