//! Cancellable delayed and recurring tasks.
//!
//! A task owns the receiving side of a cancellation token; dropping or
//! cancelling the token stops it before its next firing. Recurring tasks are a
//! single loop that asks for the next delay each round rather than tasks that
//! re-schedule themselves.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Cancels the task it was handed out with. Dropping it cancels too.
#[derive(Debug)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Resolves once the token is cancelled or dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run `fut` after `delay` unless cancelled first.
pub fn delay<F>(delay: Duration, fut: F) -> CancelToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let (token, mut rx) = CancelToken::new();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancelled(&mut rx) => {}
            _ = tokio::time::sleep(delay) => fut.await,
        }
    });
    token
}

/// Repeatedly wait `next_delay(round)` then run `tick()`, until cancelled.
///
/// `round` starts at 0, so the first delay can differ from the rest.
pub fn recurring<D, T, Fut>(mut next_delay: D, mut tick: T) -> CancelToken
where
    D: FnMut(u64) -> Duration + Send + 'static,
    T: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (token, mut rx) = CancelToken::new();
    tokio::spawn(async move {
        let mut round = 0u64;
        loop {
            let d = next_delay(round);
            tokio::select! {
                biased;
                _ = cancelled(&mut rx) => return,
                _ = tokio::time::sleep(d) => {}
            }
            if *rx.borrow() {
                return;
            }
            tick().await;
            round += 1;
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn delay_fires_once() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let _t = delay(Duration::from_secs(30), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delay_never_fires() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let t = delay(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        t.cancel();
        assert!(t.is_cancelled());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_token_cancels() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        drop(delay(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_uses_startup_then_steady_delay() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let t = recurring(
            |round| {
                if round == 0 {
                    Duration::from_secs(10)
                } else {
                    Duration::from_secs(3)
                }
            },
            move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await; // t=11
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(6)).await; // t=17: ticks at 13, 16
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        t.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
