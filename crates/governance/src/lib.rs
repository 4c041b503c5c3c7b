// SPDX-License-Identifier: Apache-2.0

//! The governance extension.
//!
//! Governance owns the authoritative processor registry and everything that
//! stands between a proposed [`phoenix_control::ConfigPatch`] and a live
//! parameter change: TTL and target validation, the sliding-window rate
//! limit with per-target cooldowns, the safe-mode state machine, and the
//! patch history used for dedup and accounting. It also watches the policy
//! file and re-seeds initial parameters on reload and on safe-mode exit.
//!
//! Governance does not sit on the data path; it consumes patches from the
//! pipeline's patch tap over a queue drained by [`Governance::run`] on its
//! own scheduler.

pub mod extension;
pub mod history;
pub mod rate_limit;
pub mod watcher;

pub use extension::{Governance, HealthStatus};
pub use history::{HistoryEntry, PatchHistory, PatchOutcomeClass};
pub use rate_limit::RateLimiter;
