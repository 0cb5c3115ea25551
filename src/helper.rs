//! Helper utilities for Tlssocks
//!
//! Small pieces shared by the server, the forwarder and the relay.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default absolute session lifetime in seconds
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;

/// Upper bound for flushing and closing one write half during teardown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Shut down a write half, ignoring every error.
///
/// Closing an already closed or reset connection is not a failure.
pub async fn silent_shutdown<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "shutdown failed"),
        Err(_) => debug!("shutdown timed out"),
    }
}

/// Run a connection task, converting a panic into a logged error
///
/// Other sessions and the accept loop keep running.
pub async fn guard_panics<F>(peer: SocketAddr, task: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
        error!(
            peer = %peer,
            error = %panic_message(panic.as_ref()),
            "Panic occurred in serve task"
        );
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_SECS, 30);
        assert_eq!(DEFAULT_SESSION_TIMEOUT_SECS, 3600);
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(5), Duration::from_secs(5));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_guard_panics_swallows_panic() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        guard_panics(peer, async {
            panic!("boom");
        })
        .await;
    }

    #[tokio::test]
    async fn test_guard_panics_runs_task() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        guard_panics(peer, async move {
            tx.send(7u8).unwrap();
        })
        .await;
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_silent_shutdown_is_idempotent() {
        let (mut a, mut b) = duplex(64);
        silent_shutdown(&mut a).await;
        silent_shutdown(&mut a).await;

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
    }
}
