use crate::model::PendingCommand;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Default number of commands kept per device
pub const DEFAULT_CAPACITY: usize = 20;

/// Outbound command queues, one bounded FIFO per device identifier.
///
/// The map is sharded, and every operation on a device goes through that
/// device's entry guard, so append-and-trim and drain-and-clear are atomic
/// per identifier while unrelated devices proceed in parallel.
#[derive(Debug)]
pub struct CommandQueues {
    queues: DashMap<String, VecDeque<PendingCommand>>,
    capacity: usize,
}

impl CommandQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a command stamped with the current time.
    /// Returns how many old commands were evicted to stay within capacity.
    pub fn enqueue(&self, device_id: &str, payload: impl Into<String>) -> usize {
        let mut queue = self.queues.entry(device_id.to_string()).or_default();
        queue.push_back(PendingCommand {
            payload: payload.into(),
            enqueued_at: Utc::now(),
        });

        let overflow = queue.len().saturating_sub(self.capacity);
        if overflow > 0 {
            queue.drain(..overflow);
            debug!(
                "Queue for {} over capacity, evicted {} oldest commands",
                device_id, overflow
            );
        }
        overflow
    }

    /// Takes every pending command for the device, oldest first, and leaves
    /// its queue empty. Unknown devices yield an empty list.
    pub fn drain(&self, device_id: &str) -> Vec<PendingCommand> {
        match self.queues.get_mut(device_id) {
            Some(mut queue) => std::mem::take(&mut *queue).into(),
            None => Vec::new(),
        }
    }
}

impl Default for CommandQueues {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;

    fn payloads(commands: &[PendingCommand]) -> Vec<String> {
        commands.iter().map(|c| c.payload.clone()).collect()
    }

    #[test]
    fn test_drain_returns_insertion_order() {
        let queues = CommandQueues::default();
        for i in 0..5 {
            queues.enqueue("0771", format!("cmd-{}", i));
        }

        let drained = queues.drain("0771");
        assert_eq!(
            payloads(&drained),
            vec!["cmd-0", "cmd-1", "cmd-2", "cmd-3", "cmd-4"]
        );
    }

    #[test]
    fn test_drain_is_destructive() {
        let queues = CommandQueues::default();
        queues.enqueue("0771", "cmd=get_status");

        assert_eq!(queues.drain("0771").len(), 1);
        assert!(queues.drain("0771").is_empty());
    }

    #[test]
    fn test_drain_unknown_device_is_empty() {
        let queues = CommandQueues::default();
        assert!(queues.drain("never-seen").is_empty());
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let queues = CommandQueues::default();
        let mut evicted = 0;
        for i in 0..25 {
            evicted += queues.enqueue("0771", format!("cmd-{}", i));
        }

        assert_eq!(evicted, 5);
        let drained = queues.drain("0771");
        let expected: Vec<String> = (5..25).map(|i| format!("cmd-{}", i)).collect();
        assert_eq!(payloads(&drained), expected);
    }

    #[test]
    fn test_random_counts_respect_capacity() {
        let mut rng = rand::thread_rng();
        let queues = CommandQueues::default();

        for round in 0..50 {
            let device = format!("dev-{}", round);
            let count: usize = rng.gen_range(0..60);
            for i in 0..count {
                queues.enqueue(&device, i.to_string());
            }

            let drained = queues.drain(&device);
            let kept = count.min(DEFAULT_CAPACITY);
            assert_eq!(drained.len(), kept);
            let expected: Vec<String> = (count - kept..count).map(|i| i.to_string()).collect();
            assert_eq!(payloads(&drained), expected);
            assert!(queues.drain(&device).is_empty());
        }
    }

    #[test]
    fn test_custom_capacity() {
        let queues = CommandQueues::new(2);
        queues.enqueue("a", "1");
        queues.enqueue("a", "2");
        queues.enqueue("a", "3");
        assert_eq!(payloads(&queues.drain("a")), vec!["2", "3"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queues = CommandQueues::new(0);
        queues.enqueue("a", "1");
        queues.enqueue("a", "2");
        assert_eq!(payloads(&queues.drain("a")), vec!["2"]);
    }

    #[test]
    fn test_devices_are_isolated() {
        let queues = CommandQueues::default();
        queues.enqueue("a", "for-a");
        queues.enqueue("b", "for-b");

        assert_eq!(payloads(&queues.drain("a")), vec!["for-a"]);
        assert_eq!(payloads(&queues.drain("b")), vec!["for-b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_distinct_devices() {
        let queues = Arc::new(CommandQueues::new(1000));
        let mut handles = Vec::new();

        for device in ["a", "b", "c", "d"] {
            let queues = queues.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200 {
                    queues.enqueue(device, format!("{}-{}", device, i));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for device in ["a", "b", "c", "d"] {
            let drained = queues.drain(device);
            assert_eq!(drained.len(), 200);
            let expected: Vec<String> = (0..200).map(|i| format!("{}-{}", device, i)).collect();
            assert_eq!(payloads(&drained), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drains_never_share_a_batch() {
        let queues = Arc::new(CommandQueues::new(10_000));
        let producer = {
            let queues = queues.clone();
            tokio::spawn(async move {
                for i in 0..2000 {
                    queues.enqueue("shared", i.to_string());
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let queues = queues.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    seen.extend(payloads(&queues.drain("shared")));
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        producer.await.unwrap();
        let mut delivered = Vec::new();
        for consumer in consumers {
            delivered.extend(consumer.await.unwrap());
        }
        delivered.extend(payloads(&queues.drain("shared")));

        assert_eq!(delivered.len(), 2000);
        let mut numbers: Vec<usize> = delivered.iter().map(|p| p.parse().unwrap()).collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 2000);
    }
}
