//! Connection management for the shared backing store.
//!
//! - [`ConnectionManager`]: lazily pooled Redis handles, one per logical
//!   database (namespace), plus dedicated subscriber connections
//! - [`BackingHandle`]: timeout-bounded commands against one namespace
//! - [`FallbackStore`]: the in-process map used when the store is absent
//!
//! Nothing in this module returns an error to request paths: connection
//! failures are logged and surface as `None`.

mod error;
#[cfg(test)]
pub(crate) mod fake;
mod fallback;
mod handle;
mod manager;

pub use error::StoreError;
pub use fallback::{CacheEntry, FallbackStore};
pub use handle::BackingHandle;
pub use manager::{ConnectionManager, Subscriber};

/// Logical database index.
pub type Namespace = u8;

/// Escape Redis glob metacharacters so a caller key matches literally.
pub fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^' | '-') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
