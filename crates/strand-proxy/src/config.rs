//! Proxy and scheduler configuration

use serde::{Deserialize, Serialize};

/// Storage proxy configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base for generated ids; each proxy appends its store id and a counter
    pub id_base: String,
    /// Page size used by big-collection streams when the caller passes 0
    pub default_page_size: usize,
    /// Log dropped stale events at warn (otherwise debug)
    pub warn_on_stale: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            id_base: format!("!{:016x}", rand::random::<u64>()),
            default_page_size: 64,
            warn_on_stale: true,
        }
    }
}

impl ProxyConfig {
    /// Configuration with a fixed id base, for reproducible ids
    pub fn with_id_base(id_base: impl Into<String>) -> Self {
        ProxyConfig {
            id_base: id_base.into(),
            ..ProxyConfig::default()
        }
    }
}

/// Notification scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Spawn a dispatch task on the current tokio runtime when events are
    /// enqueued. When off, delivery happens in `dispatch()` or `idle()`.
    pub auto_dispatch: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            auto_dispatch: true,
        }
    }
}

impl SchedulerConfig {
    /// Deliver only when explicitly driven
    pub fn manual() -> Self {
        SchedulerConfig {
            auto_dispatch: false,
        }
    }
}
