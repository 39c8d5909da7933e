use std::time::Duration;
use tokio::sync::mpsc;

/// Default quiet period before a burst of triggers is delivered.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// One reason to re-evaluate the watch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// A bookmark was created.
    pub had_creation: bool,
    /// Deliver without waiting for the debounce window.
    pub immediate: bool,
}

impl Trigger {
    pub fn changed() -> Self {
        Self {
            had_creation: false,
            immediate: false,
        }
    }

    pub fn created() -> Self {
        Self {
            had_creation: true,
            immediate: false,
        }
    }

    pub fn flush() -> Self {
        Self {
            had_creation: false,
            immediate: true,
        }
    }
}

/// Triggers coalesced by the [`Debouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerBatch {
    pub had_creation: bool,
    pub triggers: usize,
}

impl TriggerBatch {
    fn absorb(&mut self, trigger: Trigger) {
        self.had_creation |= trigger.had_creation;
        self.triggers += 1;
    }
}

/// Coalesces triggers arriving within `window` of each other.
///
/// Every trigger restarts the window; the batch is delivered once the window
/// passes without a new trigger, or right away when an immediate trigger
/// arrives.
pub struct Debouncer {
    rx: mpsc::Receiver<Trigger>,
    window: Duration,
}

impl Debouncer {
    pub fn new(rx: mpsc::Receiver<Trigger>, window: Duration) -> Self {
        Self { rx, window }
    }

    /// Wait for the next batch. Returns `None` once all senders are gone and
    /// nothing is pending.
    pub async fn next(&mut self) -> Option<TriggerBatch> {
        let first = self.rx.recv().await?;
        let mut batch = TriggerBatch {
            had_creation: false,
            triggers: 0,
        };
        batch.absorb(first);

        if first.immediate {
            return Some(batch);
        }

        loop {
            match tokio::time::timeout(self.window, self.rx.recv()).await {
                Ok(Some(trigger)) => {
                    batch.absorb(trigger);
                    if trigger.immediate {
                        return Some(batch);
                    }
                }
                // Window elapsed, or the inputs closed with a batch pending
                Err(_) | Ok(None) => return Some(batch),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> (mpsc::Sender<Trigger>, Debouncer) {
        let (tx, rx) = mpsc::channel(16);
        (tx, Debouncer::new(rx, DEFAULT_DEBOUNCE_WINDOW))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced() {
        let (tx, mut debouncer) = debouncer();
        tx.send(Trigger::changed()).await.unwrap();
        tx.send(Trigger::created()).await.unwrap();
        tx.send(Trigger::changed()).await.unwrap();

        let batch = debouncer.next().await.unwrap();
        assert_eq!(
            batch,
            TriggerBatch {
                had_creation: true,
                triggers: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_restarts_on_each_trigger() {
        let (tx, mut debouncer) = debouncer();
        let sender = tokio::spawn(async move {
            for i in 0..3 {
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(900)).await;
                }
                tx.send(Trigger::changed()).await.unwrap();
            }
            // Keep the input open until the batch is delivered
            tx
        });

        let start = tokio::time::Instant::now();
        let batch = debouncer.next().await.unwrap();
        assert_eq!(batch.triggers, 3);
        assert!(!batch.had_creation);
        // Last trigger at 1.8s plus a full window
        assert!(start.elapsed() >= Duration::from_millis(2800));
        drop(sender.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_stay_separate() {
        let (tx, mut debouncer) = debouncer();
        tx.send(Trigger::created()).await.unwrap();
        let first = debouncer.next().await.unwrap();

        tx.send(Trigger::changed()).await.unwrap();
        let second = debouncer.next().await.unwrap();

        assert!(first.had_creation);
        assert!(!second.had_creation);
        assert_eq!(second.triggers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_bypasses_window() {
        let (tx, mut debouncer) = debouncer();
        tx.send(Trigger::created()).await.unwrap();
        tx.send(Trigger::flush()).await.unwrap();

        let start = tokio::time::Instant::now();
        let batch = debouncer.next().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(batch.had_creation);
        assert_eq!(batch.triggers, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_ends_stream() {
        let (tx, mut debouncer) = debouncer();
        tx.send(Trigger::changed()).await.unwrap();
        drop(tx);

        assert_eq!(debouncer.next().await.map(|b| b.triggers), Some(1));
        assert_eq!(debouncer.next().await, None);
    }
}
