//! Utils is shared functions and types for the operator
#[cfg(test)]
pub mod test;

use std::{fmt, future::Future, time::Duration};

use k8s_openapi::chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Provides the current time.
pub trait Clock {
    /// Report the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Provides the current time using real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;
impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reason a scoped wait stopped before its future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The scope's token was cancelled.
    Cancelled,
    /// The scope's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "context canceled"),
            Interrupted::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Cancellation token paired with an optional deadline.
///
/// Every wait performed on behalf of a caller goes through a scope so that the caller's
/// cancellation and the operation's timeout end it in the same way. A scope built with
/// [`Scope::detached`] shares nothing with any caller and is what cleanup work runs under.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// Scope governed by the given token and no deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Fresh scope that no caller can cancel.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Same cancellation, with the deadline tightened to `timeout` from now when given.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let deadline = match (self.deadline, deadline) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };
        Self {
            token: self.token.clone(),
            deadline,
        }
    }

    /// Scope that is cancelled with this one but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this scope and all of its children.
    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Drive `fut` to completion unless the scope ends first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = sleep_until(self.deadline) => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration` unless the scope ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_completes_within_deadline() {
        let scope = Scope::detached().with_timeout(Some(Duration::from_secs(10)));
        let out = scope.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_past_deadline_is_interrupted() {
        let scope = Scope::detached().with_timeout(Some(Duration::from_secs(3)));
        assert_eq!(
            scope.sleep(Duration::from_secs(5)).await,
            Err(Interrupted::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn cancelled_parent_cancels_child() {
        let parent = Scope::detached();
        let child = parent.child();
        parent.cancel();
        assert_eq!(
            child.sleep(Duration::from_secs(60)).await,
            Err(Interrupted::Cancelled)
        );
    }

    #[tokio::test]
    async fn cancelled_child_leaves_parent() {
        let parent = Scope::detached();
        let child = parent.child();
        child.cancel();
        assert_eq!(parent.run(async { "done" }).await, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_keeps_earliest_deadline() {
        let scope = Scope::detached()
            .with_timeout(Some(Duration::from_secs(2)))
            .with_timeout(Some(Duration::from_secs(20)));
        assert_eq!(
            scope.sleep(Duration::from_secs(5)).await,
            Err(Interrupted::DeadlineExceeded)
        );
    }
}
