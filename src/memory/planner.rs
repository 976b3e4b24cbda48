//! Eviction planning: pure candidate selection, no side effects.
//!
//! Protected models form a soft-protected tier. Ordinary admissions never
//! evict them; a protected admission may evict other protected models only
//! when they are clearly idle. Recency plus use count approximates LRU+LFU
//! without an access-history log.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use super::tracked::LoadedModel;

/// A protected candidate is evictable by a protected target only below this
/// use count.
pub const PROTECTED_USE_CEILING: u64 = 5;

/// ...and only when idle longer than this.
pub const PROTECTED_IDLE_GRACE: Duration = Duration::from_secs(5 * 60);

/// Recency differences below this are ties; smaller gaps fall through to
/// use count so near-simultaneous timestamps do not cause thrashing.
pub const RECENCY_TIEBREAK: Duration = Duration::from_secs(60);

/// Ordered eviction plan. May be insufficient; the caller decides success.
#[derive(Debug, Clone, Default)]
pub struct EvictionPlan {
    /// Victims in eviction order.
    pub victims: Vec<LoadedModel>,
    /// Sum of victim size estimates.
    pub bytes: u64,
}

/// Produce an eviction plan to admit `target` needing `required_bytes`.
///
/// Victims are accumulated in preference order until their sizes cover
/// `required_bytes + min_free_bytes` or candidates run out.
pub fn plan(
    loaded: &[LoadedModel],
    target: &str,
    required_bytes: u64,
    target_protected: bool,
    min_free_bytes: u64,
    now: Instant,
) -> EvictionPlan {
    let mut candidates: Vec<&LoadedModel> = loaded
        .iter()
        .filter(|entry| entry.name != target && is_evictable(entry, target_protected, now))
        .collect();

    candidates.sort_by(|a, b| compare_candidates(a, b, target_protected, now));

    // Saturate so absurd registry-supplied sizes cannot overflow.
    let needed = required_bytes.saturating_add(min_free_bytes);
    let mut plan = EvictionPlan::default();
    for candidate in candidates {
        if plan.bytes >= needed {
            break;
        }
        plan.bytes = plan.bytes.saturating_add(candidate.size_bytes);
        plan.victims.push((*candidate).clone());
    }
    plan
}

fn is_evictable(entry: &LoadedModel, target_protected: bool, now: Instant) -> bool {
    if !entry.protected {
        return true;
    }
    // Protected candidates: only a protected target may claim them, and only
    // when they are clearly idle.
    target_protected
        && entry.use_count < PROTECTED_USE_CEILING
        && entry.idle_for(now) > PROTECTED_IDLE_GRACE
}

/// Eviction preference: earlier in the ordering means evicted first.
///
/// Recency is compared in [`RECENCY_TIEBREAK`]-wide idle bands rather than
/// raw timestamps, which keeps the comparator a total order: entries in the
/// same band are always less than `RECENCY_TIEBREAK` apart and fall through
/// to use count.
fn compare_candidates(
    a: &LoadedModel,
    b: &LoadedModel,
    target_protected: bool,
    now: Instant,
) -> Ordering {
    if !target_protected {
        // Sacrifice non-protected models before protected ones.
        match a.protected.cmp(&b.protected) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    // Longer idle sorts first.
    match idle_band(b, now).cmp(&idle_band(a, now)) {
        Ordering::Equal => {}
        ord => return ord,
    }

    match a.use_count.cmp(&b.use_count) {
        Ordering::Equal => {}
        ord => return ord,
    }

    a.priority_level().cmp(&b.priority_level())
}

fn idle_band(entry: &LoadedModel, now: Instant) -> u64 {
    entry.idle_for(now).as_secs() / RECENCY_TIEBREAK.as_secs()
}
