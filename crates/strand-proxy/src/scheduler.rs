//! Notification scheduler
//!
//! Decouples store event application from particle callbacks. Events are
//! queued per particle, then per handle, and drained in one pass: every
//! handle sees its events in the order they were enqueued, and events
//! enqueued by a callback during the pass are drained by the same pass.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use strand_core::{ParticleId, StoreRequest, StrandError};

use crate::{Handle, Notification, SchedulerConfig, StoreChannel};

/// Queued events of one particle, per handle in registration order
#[derive(Default)]
struct ParticleQueue {
    handles: Vec<(Arc<Handle>, VecDeque<Notification>)>,
}

impl ParticleQueue {
    fn push(&mut self, handle: &Arc<Handle>, notification: Notification) {
        match self.handles.iter_mut().find(|(h, _)| Arc::ptr_eq(h, handle)) {
            Some((_, queue)) => queue.push_back(notification),
            None => self
                .handles
                .push((Arc::clone(handle), VecDeque::from([notification]))),
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    queues: HashMap<ParticleId, ParticleQueue>,
    /// A dispatch has been requested and not yet completed
    scheduled: bool,
    /// A dispatch pass is draining the queues
    dispatching: bool,
}

/// Delivery statistics
#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dispatch_passes: u64,
}

/// Batched, per-handle FIFO notification delivery
pub struct Scheduler {
    config: SchedulerConfig,
    /// Where callback failures are reported
    reporter: Option<StoreChannel>,
    state: Mutex<SchedulerState>,
    stats: Mutex<SchedulerStats>,
    idle: Notify,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Self::with_config(SchedulerConfig::default(), None)
    }

    pub fn with_config(config: SchedulerConfig, reporter: Option<StoreChannel>) -> Arc<Self> {
        Arc::new(Scheduler {
            config,
            reporter,
            state: Mutex::new(SchedulerState::default()),
            stats: Mutex::new(SchedulerStats::default()),
            idle: Notify::new(),
        })
    }

    /// Queue `notification` for `handle` and make sure a dispatch is pending
    pub fn enqueue(self: &Arc<Self>, handle: &Arc<Handle>, notification: Notification) {
        tracing::trace!(
            particle = %handle.particle_id(),
            handle = handle.name(),
            method = notification.method_name(),
            "enqueue notification"
        );

        let schedule = {
            let mut state = self.state.lock();
            state
                .queues
                .entry(handle.particle_id().clone())
                .or_default()
                .push(handle, notification);
            !std::mem::replace(&mut state.scheduled, true)
        };
        self.stats.lock().enqueued += 1;

        if schedule && self.config.auto_dispatch {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let scheduler = Arc::clone(self);
                runtime.spawn(async move { scheduler.dispatch() });
            }
        }
    }

    /// True while any notification is queued
    pub fn busy(&self) -> bool {
        !self.state.lock().queues.is_empty()
    }

    /// Drain every queue. Returns immediately if another pass is running;
    /// that pass picks up anything enqueued meanwhile.
    pub fn dispatch(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        self.stats.lock().dispatch_passes += 1;

        loop {
            let next = {
                let mut state = self.state.lock();
                let particle = state.queues.keys().next().cloned();
                match particle {
                    Some(particle) => state.queues.remove(&particle),
                    None => {
                        state.dispatching = false;
                        state.scheduled = false;
                        None
                    }
                }
            };
            let Some(queue) = next else { break };

            for (handle, events) in queue.handles {
                for notification in events {
                    self.deliver(&handle, &notification);
                }
            }
        }

        self.idle.notify_waiters();
    }

    fn deliver(&self, handle: &Handle, notification: &Notification) {
        match handle.notify(notification) {
            Ok(()) => self.stats.lock().delivered += 1,
            Err(source) => {
                let err = StrandError::Callback(source.to_string());
                self.stats.lock().failed += 1;
                tracing::error!(
                    particle = %handle.particle_id(),
                    handle = handle.name(),
                    method = notification.method_name(),
                    error = %err,
                    "particle callback failed"
                );
                if let Some(reporter) = &self.reporter {
                    let report = StoreRequest::RaiseSystemException {
                        exception: source.to_string(),
                        method: notification.method_name().to_string(),
                        particle: handle.particle_id().clone(),
                    };
                    if reporter.send(report).is_err() {
                        tracing::warn!("failure report dropped, store channel closed");
                    }
                }
            }
        }
    }

    /// Resolves once every queued notification has been delivered
    pub async fn idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let dispatching = {
                let state = self.state.lock();
                if state.queues.is_empty() && !state.dispatching {
                    return;
                }
                state.dispatching
            };

            if dispatching {
                notified.await;
            } else {
                self.dispatch();
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }
}
