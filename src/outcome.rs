//! Result tagging for fail-open operations.
//!
//! Nothing in this crate returns an error to request-serving code. Instead,
//! every public operation reports whether its answer came from the backing
//! store (`Live`) or from local state only (`Degraded`).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Outcome<T> {
    /// The backing store was reachable and took part in the operation.
    Live(T),
    /// The store was absent or failed; the value reflects local state only.
    Degraded(T),
}

impl<T> Outcome<T> {
    pub fn from_parts(value: T, live: bool) -> Self {
        if live {
            Outcome::Live(value)
        } else {
            Outcome::Degraded(value)
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Outcome::Live(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Live(v) | Outcome::Degraded(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Outcome::Live(v) | Outcome::Degraded(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Live(v) => Outcome::Live(f(v)),
            Outcome::Degraded(v) => Outcome::Degraded(f(v)),
        }
    }

    /// Downgrade to `Degraded` unless `live` holds.
    pub fn and_live(self, live: bool) -> Self {
        match self {
            Outcome::Live(v) if live => Outcome::Live(v),
            other => Outcome::Degraded(other.into_inner()),
        }
    }
}
