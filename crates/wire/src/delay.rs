use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug)]
struct DelayedPacket {
    due: Instant,
    data: Vec<u8>,
}

/// FIFO of packets held back until their release time. Only the head is
/// ever released, so a short delay queued behind a long one waits for it.
#[derive(Debug, Default)]
pub struct DelayQueue {
    packets: VecDeque<DelayedPacket>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_packet(&mut self, data: &[u8], delay: Duration) {
        self.add_packet_at(data, delay, Instant::now());
    }

    pub fn add_packet_at(&mut self, data: &[u8], delay: Duration, now: Instant) {
        self.packets.push_back(DelayedPacket {
            due: now + delay,
            data: data.to_vec(),
        });
    }

    pub fn get_packet(&mut self) -> Option<Vec<u8>> {
        self.get_packet_at(Instant::now())
    }

    pub fn get_packet_at(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.packets.front()?.due > now {
            return None;
        }
        self.packets.pop_front().map(|packet| packet.data)
    }

    /// Seconds until the head packet is due, zero if it already is and
    /// infinity when the queue is empty.
    pub fn next_packet_time(&self) -> f64 {
        self.next_packet_time_at(Instant::now())
    }

    pub fn next_packet_time_at(&self, now: Instant) -> f64 {
        match self.packets.front() {
            Some(packet) => packet.due.saturating_duration_since(now).as_secs_f64(),
            None => f64::INFINITY,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

/// Artificial lag and loss applied before packets enter a [`DelayQueue`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl LatencySimulation {
    pub fn should_drop(&self) -> bool {
        self.should_drop_with(&mut rand::thread_rng())
    }

    pub fn should_drop_with<R: Rng>(&self, rng: &mut R) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.gen_range(0.0..100.0) < self.loss_percent
    }

    pub fn delay(&self) -> Duration {
        self.delay_with(&mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng>(&self, rng: &mut R) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let base = self.min_latency_ms.min(self.max_latency_ms);
        let spread = rng.gen_range(base..=self.max_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(spread as u64 + jitter as u64)
    }

    /// Queues `data` with a fresh delay unless the packet is dropped.
    /// Returns whether it was queued.
    pub fn submit(&self, queue: &mut DelayQueue, data: &[u8]) -> bool {
        let mut rng = rand::thread_rng();
        if self.should_drop_with(&mut rng) {
            return false;
        }
        queue.add_packet(data, self.delay_with(&mut rng));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_empty_queue() {
        let mut queue = DelayQueue::new();
        assert!(queue.get_packet().is_none());
        assert_eq!(queue.next_packet_time(), f64::INFINITY);
    }

    #[test]
    fn test_packet_released_when_due() {
        let start = Instant::now();
        let mut queue = DelayQueue::new();
        queue.add_packet_at(b"abc", Duration::from_millis(100), start);

        assert!(queue.get_packet_at(start).is_none());
        assert!((queue.next_packet_time_at(start) - 0.1).abs() < 1e-9);
        assert!(queue.get_packet_at(start + Duration::from_millis(99)).is_none());

        let later = start + Duration::from_millis(100);
        assert_eq!(queue.next_packet_time_at(later), 0.0);
        assert_eq!(queue.get_packet_at(later), Some(b"abc".to_vec()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order_is_kept() {
        let start = Instant::now();
        let mut queue = DelayQueue::new();
        queue.add_packet_at(b"slow", Duration::from_millis(50), start);
        queue.add_packet_at(b"fast", Duration::ZERO, start);

        assert!(queue.get_packet_at(start).is_none());
        let later = start + Duration::from_millis(50);
        assert_eq!(queue.get_packet_at(later), Some(b"slow".to_vec()));
        assert_eq!(queue.get_packet_at(later), Some(b"fast".to_vec()));
    }

    #[test]
    fn test_queue_copies_data() {
        let mut data = vec![1, 2, 3];
        let mut queue = DelayQueue::new();
        queue.add_packet(&data, Duration::ZERO);
        data[0] = 9;
        assert_eq!(queue.get_packet(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_disabled_simulation() {
        let sim = LatencySimulation {
            enabled: false,
            loss_percent: 100.0,
            max_latency_ms: 500,
            ..Default::default()
        };
        assert!(!sim.should_drop());
        assert_eq!(sim.delay(), Duration::ZERO);
    }

    #[test]
    fn test_delay_range() {
        let sim = LatencySimulation {
            enabled: true,
            min_latency_ms: 20,
            max_latency_ms: 40,
            jitter_ms: 5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let delay = sim.delay_with(&mut rng);
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(45));
        }
    }

    #[test]
    fn test_total_loss() {
        let sim = LatencySimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        let mut queue = DelayQueue::new();
        assert!(!sim.submit(&mut queue, b"x"));
        assert!(queue.is_empty());

        let lossless = LatencySimulation {
            enabled: true,
            ..Default::default()
        };
        assert!(lossless.submit(&mut queue, b"x"));
        assert_eq!(queue.len(), 1);
    }
}
