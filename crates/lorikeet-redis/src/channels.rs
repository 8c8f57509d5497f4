//! Channel names for scatter-gather queries
//!
//! Channel grammar: `{prefix}:Query` carries the broadcast question, and
//! each query key gets its own pair of response channels,
//! `{prefix}:Response:{key}:Success` and `{prefix}:Response:{key}:Fail`.
//!
//! Distinct (prefix, key) pairs derive distinct channel triples, which is
//! what keeps concurrent queries with distinct keys from ever seeing each
//! other's replies.

/// Query channel for a prefix
pub fn query(prefix: &str) -> String {
    format!("{}:Query", prefix)
}

/// Success response channel for a key under a prefix
pub fn success(prefix: &str, key: &str) -> String {
    format!("{}:Response:{}:Success", prefix, key)
}

/// Decline response channel for a key under a prefix
pub fn fail(prefix: &str, key: &str) -> String {
    format!("{}:Response:{}:Fail", prefix, key)
}

/// Well-known channels shared between the shards and the config service
pub mod known {
    /// Scatter-gather prefix for guild configuration lookups
    pub const CONFIG: &str = "Lorikeet:Config";

    /// Broadcast channel announcing that a guild's stored config changed
    pub const CONFIG_REFRESH: &str = "Lorikeet:ConfigRefresh";
}
