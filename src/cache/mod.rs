//! Distributed cache with broadcast invalidation.
//!
//! Each cache kind is a [`DistributedCache`] storing opaque bytes under
//! `{prefix}:cache:{kind}:{key}` with a TTL. Writes land in the backing store
//! and in a process-local copy; reads try the store first. Invalidations are
//! published on `{prefix}:cache:{kind}:invalidate` so every instance purges
//! its local copy.
//!
//! # Configuration
//!
//! ```toml
//! [cache]
//! namespace = 1
//! ttl_seconds = 300
//! sweep_interval_seconds = 600
//!
//! [cache.kinds.site]
//! ttl_seconds = 60
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let sites = coordinator.cache("site").await?;
//! if let Some(page) = sites.get("acme:home").await.into_inner() {
//!     return Ok(page);
//! }
//! let page = render_home("acme").await?;
//! sites.set("acme:home", page.clone()).await;
//!
//! // after an edit
//! sites.invalidate("acme").await;
//! ```

mod distributed;
mod error;
mod sweep;

pub use distributed::{CacheStats, DistributedCache, InvalidationPayload, InvalidationScope};
pub use error::CacheError;
pub use sweep::SweepScheduler;

/// A kind becomes one key segment, so it may not contain the `:` separator,
/// whitespace or glob characters.
pub fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && !kind
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '*' | '?' | '[' | ']' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_kind() {
        assert!(is_valid_kind("site"));
        assert!(is_valid_kind("image-search"));
        assert!(!is_valid_kind(""));
        assert!(!is_valid_kind("site:x"));
        assert!(!is_valid_kind("pa*ge"));
        assert!(!is_valid_kind("a b"));
    }
}
