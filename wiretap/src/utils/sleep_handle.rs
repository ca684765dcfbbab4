use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A cancellable timer for use in `select!` loops.
///
/// The handle starts out idle and never resolves until [`set`](Self::set) arms
/// it with a deadline. Once the deadline passes the handle resolves and flips
/// back to idle, so a service loop can keep polling it unconditionally.
#[derive(Debug, Default)]
pub struct SleepHandle {
    sleep: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl SleepHandle {
    /// Returns an idle handle that does not resolve.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Disarms the timer and puts the handle back to idle.
    pub fn reset(&mut self) {
        self.sleep = None;
    }

    /// Arms the timer to resolve after `duration`.
    ///
    /// Overwrites any previously set deadline.
    pub fn set(&mut self, duration: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(duration)));
    }

    /// Returns `true` if the timer is not armed.
    pub fn is_idle(&self) -> bool {
        self.sleep.is_none()
    }
}

impl Future for SleepHandle {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &mut this.sleep {
            Some(sleep) => {
                let poll = sleep.as_mut().poll(cx);
                if poll.is_ready() {
                    this.reset();
                }
                poll
            }
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_once_and_returns_to_idle() {
        let mut handle = SleepHandle::idle();
        assert!(handle.is_idle());

        handle.set(Duration::from_secs(1));
        assert!(!handle.is_idle());

        (&mut handle).await;
        assert!(handle.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_disarms() {
        let mut handle = SleepHandle::idle();
        handle.set(Duration::from_secs(1));
        handle.reset();
        assert!(handle.is_idle());

        tokio::select! {
            () = &mut handle => panic!("idle handle resolved"),
            () = tokio::time::sleep(Duration::from_secs(2)) => (),
        }
    }
}
