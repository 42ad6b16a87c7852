use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::events::{EventEmitter, SessionEvent};

/// A fixed-period task whose events go through a gate.
///
/// Closing the gate and emitting both take the same lock, so once `stop`
/// (or drop) returns no further event from this ticker reaches listeners,
/// even if the task is mid-tick on another worker.
pub(crate) struct Ticker {
    open: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn a ticker whose first tick fires one `period` from now.
    pub(crate) fn spawn<F, Fut>(period: Duration, emitter: EventEmitter, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<SessionEvent>> + Send + 'static,
    {
        let open = Arc::new(Mutex::new(true));
        let gate = open.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(event) = tick().await else {
                    continue;
                };
                if !emit_if_open(&gate, &emitter, event) {
                    break;
                }
            }
        });
        Self { open, handle }
    }

    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.handle.abort();
    }
}

fn emit_if_open(gate: &Mutex<bool>, emitter: &EventEmitter, event: SessionEvent) -> bool {
    let open = gate.lock().unwrap_or_else(PoisonError::into_inner);
    if *open {
        emitter.emit(event);
    }
    *open
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEventListener;
    use crate::events::tests::EventCapture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());

        let ticker = Ticker::spawn(Duration::from_millis(100), emitter, || async {
            Some(SessionEvent::Error("tick".into()))
        });
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(capture.events().len(), 3);

        ticker.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(capture.events().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ticks_emit_nothing() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());

        let _ticker = Ticker::spawn(Duration::from_millis(100), emitter, || async { None });
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(capture.events().is_empty());
    }

    /// Takes 50 ms per event and signals when the first one arrives.
    struct SlowListener {
        seen: AtomicUsize,
        entered: Notify,
    }

    impl SessionEventListener for SlowListener {
        fn on_event(&self, _event: SessionEvent) {
            if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_event_in_flight() {
        let emitter = EventEmitter::new();
        let listener = Arc::new(SlowListener {
            seen: AtomicUsize::new(0),
            entered: Notify::new(),
        });
        emitter.add_listener(listener.clone());

        let ticker = Ticker::spawn(Duration::from_millis(10), emitter, || async {
            Some(SessionEvent::Error("tick".into()))
        });
        listener.entered.notified().await;

        ticker.stop();
        let at_stop = listener.seen.load(Ordering::SeqCst);
        assert!(at_stop >= 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.seen.load(Ordering::SeqCst), at_stop);
    }
}
