use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::QuartzError;
use crate::error::QuartzErrorCode::RequestCancelled;

/// A cooperative cancellation token.
///
/// Cloning the token yields another handle to the same cancellation
/// state. Every suspending point in the driver (the HTTP send, rate
/// limiter waits, retry back-off, table poll delays) observes the token
/// and returns a [`RequestCancelled`](crate::QuartzErrorCode::RequestCancelled)
/// failure once it fires. Cancellation does not guarantee the server did
/// not execute the request.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        CancellationToken {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // The sender can only drop with the last token, so getting here
        // means cancellation can never fire; park forever.
        std::future::pending::<()>().await;
    }

    pub(crate) fn check(&self) -> Result<(), QuartzError> {
        if self.is_cancelled() {
            return Err(QuartzError::new(RequestCancelled, "operation cancelled"));
        }
        Ok(())
    }
}

// Sleep for the given duration, waking early with an error if the token
// fires first.
pub(crate) async fn sleep_honoring(
    d: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), QuartzError> {
    match cancel {
        Some(tok) => {
            tok.check()?;
            tokio::select! {
                _ = tokio::time::sleep(d) => Ok(()),
                _ = tok.cancelled() => {
                    Err(QuartzError::new(RequestCancelled, "operation cancelled"))
                }
            }
        }
        None => {
            tokio::time::sleep(d).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_sleep() {
        let tok = CancellationToken::new();
        let tok2 = tok.clone();
        let h = tokio::spawn(async move {
            sleep_honoring(Duration::from_secs(60), Some(&tok2)).await
        });
        tok.cancel();
        let res = h.await.unwrap();
        assert!(res.is_err());
        assert_eq!(
            res.unwrap_err().code,
            crate::error::QuartzErrorCode::RequestCancelled
        );
    }

    #[tokio::test]
    async fn test_uncancelled_sleep_completes() {
        let tok = CancellationToken::new();
        let res = sleep_honoring(Duration::from_millis(5), Some(&tok)).await;
        assert!(res.is_ok());
        assert!(!tok.is_cancelled());
    }
}
