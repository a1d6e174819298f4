//! Chaos link between a store and its proxies
//!
//! Simulates a hostile push transport:
//! - Loss (single and burst)
//! - Reordering
//! - Duplication
//!
//! Only update events are lost. A sync response is the answer to a request
//! nobody retries, so it is reordered and duplicated but always delivered.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strand_core::{EventSender, StoreEvent};

/// Link chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Update loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Burst loss probability
    pub burst_loss_prob: f64,
    /// Burst loss length range
    pub burst_length: (u32, u32),
    /// Reorder probability
    pub reorder_prob: f64,
    /// Reorder depth (max events an event may jump ahead of)
    pub reorder_depth: u32,
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.02,
            burst_loss_prob: 0.02,
            burst_length: (2, 4),
            reorder_prob: 0.1,
            reorder_depth: 3,
            duplicate_prob: 0.05,
        }
    }
}

impl ChaosConfig {
    /// Nothing lost, nothing reordered
    pub fn calm() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    /// Reorders and duplicates, never loses
    pub fn shuffled() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.3,
            reorder_depth: 5,
            duplicate_prob: 0.1,
        }
    }

    /// Hostile conditions
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.1,
            burst_loss_prob: 0.05,
            burst_length: (2, 6),
            reorder_prob: 0.3,
            reorder_depth: 8,
            duplicate_prob: 0.1,
        }
    }
}

/// Link statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub events_sent: u64,
    pub events_delivered: u64,
    pub events_lost: u64,
    pub events_reordered: u64,
    pub events_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.events_sent == 0 {
            0.0
        } else {
            self.events_lost as f64 / self.events_sent as f64
        }
    }
}

/// Seeded, reproducible chaos over batches of pushed events
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    burst_remaining: u32,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            config,
            rng: StdRng::seed_from_u64(seed),
            burst_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Mangle a batch of events and return what arrives, in arrival order
    pub fn transmit<T: Clone>(&mut self, events: Vec<(T, StoreEvent)>) -> Vec<(T, StoreEvent)> {
        let mut arrived: Vec<(T, StoreEvent)> = Vec::with_capacity(events.len());

        for (target, event) in events {
            self.stats.events_sent += 1;

            if matches!(event, StoreEvent::Update(_)) && self.should_drop() {
                self.stats.events_lost += 1;
                continue;
            }

            if self.rng.gen::<f64>() < self.config.duplicate_prob {
                self.stats.events_duplicated += 1;
                arrived.push((target.clone(), event.clone()));
            }

            if !arrived.is_empty() && self.rng.gen::<f64>() < self.config.reorder_prob {
                let depth = self.config.reorder_depth.min(arrived.len() as u32);
                let jump = self.rng.gen_range(0..=depth) as usize;
                arrived.insert(arrived.len() - jump, (target, event));
                self.stats.events_reordered += 1;
            } else {
                arrived.push((target, event));
            }
        }

        self.stats.events_delivered += arrived.len() as u64;
        arrived
    }

    /// Mangle a batch and deliver it to the listeners it was addressed to
    pub fn deliver(&mut self, events: Vec<(EventSender, StoreEvent)>) -> usize {
        let arrived = self.transmit(events);
        let count = arrived.len();
        for (listener, event) in arrived {
            if listener.send(event).is_err() {
                tracing::debug!("listener gone, chaos delivery dropped");
            }
        }
        count
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max).saturating_sub(1);
            return true;
        }

        self.rng.gen::<f64>() < self.config.loss_rate
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ChaosStats::default();
    }
}
