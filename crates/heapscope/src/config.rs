//! Runtime configuration.
//!
//! Read from the environment once and cached:
//! - `HEAPSCOPE_RELEASE_ORDER`: order in which one frame or one tag batch is
//!   destructed. `lifo` (default) releases the most recently registered
//!   record first, mirroring acquisition order; `fifo` releases in
//!   registration order.
//! - `HEAPSCOPE_REGISTRY_CAPACITY`: initial slot reservation for the tag
//!   registry (default 16).

use std::sync::OnceLock;

use serde::Serialize;

/// Environment variable selecting the release order.
pub const RELEASE_ORDER_ENV: &str = "HEAPSCOPE_RELEASE_ORDER";
/// Environment variable selecting the registry's initial capacity.
pub const REGISTRY_CAPACITY_ENV: &str = "HEAPSCOPE_REGISTRY_CAPACITY";

/// Default registry reservation.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 16;

/// Destruction order within one released batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseOrder {
    /// Most recently registered first.
    #[default]
    Lifo,
    /// Registration order.
    Fifo,
}

impl ReleaseOrder {
    /// Parse from string (case-insensitive). Unknown values fall back to LIFO.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" | "forward" | "registration" => Self::Fifo,
            "lifo" | "reverse" | "stack" | "default" => Self::Lifo,
            _ => Self::Lifo,
        }
    }

    /// Drains `items` (held in registration order) in this order.
    pub(crate) fn drain<T>(self, items: &mut Vec<T>, mut f: impl FnMut(T)) {
        match self {
            Self::Lifo => {
                while let Some(item) = items.pop() {
                    f(item);
                }
            }
            Self::Fifo => items.drain(..).for_each(f),
        }
    }
}

/// Effective lifecycle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleConfig {
    pub release_order: ReleaseOrder,
    pub registry_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            release_order: ReleaseOrder::default(),
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

impl LifecycleConfig {
    /// Builds a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let release_order = lookup(RELEASE_ORDER_ENV)
            .map(|v| ReleaseOrder::from_str_loose(&v))
            .unwrap_or(defaults.release_order);
        let registry_capacity = lookup(REGISTRY_CAPACITY_ENV)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.registry_capacity);
        Self {
            release_order,
            registry_capacity,
        }
    }
}

static GLOBAL_CONFIG: OnceLock<LifecycleConfig> = OnceLock::new();

/// Get the process configuration (reads the environment on first call,
/// caches thereafter).
#[must_use]
pub fn config() -> &'static LifecycleConfig {
    GLOBAL_CONFIG.get_or_init(LifecycleConfig::from_env)
}
