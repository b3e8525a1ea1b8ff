//! Presence resolution: "is this archive currently considered present?"
//!
//! The resolver answers from the cache's last-seen timestamp when it is
//! fresh enough, and otherwise attempts a sync first. It never turns
//! staleness or an in-flight job into a false "absent": an undeterminable
//! answer is reported as `Retryable`.

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::sync::{SyncOptions, vault_sync};
use icebox_cache::CacheError;
use icebox_core::Reference;

/// Terminal outcome of a presence query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    /// The archive is considered present; carries the stable reference
    /// token the caller asked about.
    Present { reference: String },
    /// The archive is not known. `after_sync` distinguishes "not known even
    /// after consulting a fresh inventory" from "not known locally and no
    /// sync was attempted" — a recently-stored archive may simply not be in
    /// any inventory yet.
    NotFound { after_sync: bool },
    /// The archive is known but has not been confirmed recently enough to
    /// call it present.
    NotConfirmedRecently,
    /// An inventory job is queued or in flight; re-invoke later.
    Retryable(String),
}

/// One presence query.
#[derive(Debug, Clone)]
pub struct PresenceRequest<'a> {
    pub vault: &'a str,
    /// The caller's reference token, echoed back on `Present`.
    pub raw: &'a str,
    /// Freshness window in hours. `None` accepts any known record;
    /// `Some(0)` is never satisfied and thus always forces a sync attempt.
    pub max_age_hours: Option<u64>,
    /// Block on inventory jobs instead of reporting `Retryable`.
    pub wait: bool,
}

/// Resolve a presence query, syncing first if the local answer is stale.
pub async fn check_present(
    ctx: &AppContext,
    req: &PresenceRequest<'_>,
) -> AppResult<PresenceOutcome> {
    let reference = Reference::parse(req.raw);

    let mut last_seen = match ctx.cache.last_seen(req.vault, &reference).await {
        Ok(seen) => Some(seen),
        Err(CacheError::NotFound(_)) if !req.wait => {
            return Ok(PresenceOutcome::NotFound { after_sync: false });
        }
        Err(CacheError::NotFound(_)) => None,
        Err(err) => return Err(err.into()),
    }
    .flatten();

    if too_old(last_seen, req.max_age_hours, ctx.now()) {
        let sync_opts = SyncOptions {
            max_age_hours: req
                .max_age_hours
                .unwrap_or(ctx.config.sync.checkpresent_max_age_hours),
            fix: false,
            wait: req.wait,
        };
        match vault_sync(ctx, req.vault, &sync_opts).await {
            Ok(_) => {}
            Err(AppError::Retryable(message)) => {
                return Ok(PresenceOutcome::Retryable(message));
            }
            Err(err) => {
                // A transient upstream failure leaves the question open, not
                // answered; report it as retryable rather than failing the
                // query.
                if let Some(upstream) = err.transient_upstream() {
                    return Ok(PresenceOutcome::Retryable(upstream.to_string()));
                }
                return Err(err);
            }
        }

        last_seen = match ctx.cache.last_seen(req.vault, &reference).await {
            Ok(seen) => seen,
            Err(CacheError::NotFound(_)) => {
                return Ok(PresenceOutcome::NotFound { after_sync: true });
            }
            Err(err) => return Err(err.into()),
        };

        if too_old(last_seen, req.max_age_hours, ctx.now()) {
            return Ok(PresenceOutcome::NotConfirmedRecently);
        }
    }

    Ok(PresenceOutcome::Present {
        reference: req.raw.to_string(),
    })
}

/// Whether a last-seen timestamp fails the caller's freshness window.
fn too_old(last_seen: Option<i64>, max_age_hours: Option<u64>, now: i64) -> bool {
    match (last_seen, max_age_hours) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(seen), Some(hours)) => hours == 0 || seen < now - (hours as i64) * 3600,
    }
}

#[cfg(test)]
mod tests {
    use super::too_old;

    const NOW: i64 = 1_000_000;

    #[test]
    fn unknown_is_always_stale() {
        assert!(too_old(None, None, NOW));
        assert!(too_old(None, Some(1), NOW));
    }

    #[test]
    fn no_window_accepts_any_known_record() {
        assert!(!too_old(Some(0), None, NOW));
    }

    #[test]
    fn zero_window_is_never_satisfied() {
        assert!(too_old(Some(NOW), Some(0), NOW));
    }

    #[test]
    fn window_compares_against_now() {
        let hour = 3600;
        assert!(!too_old(Some(NOW - hour), Some(2), NOW));
        assert!(too_old(Some(NOW - 3 * hour), Some(2), NOW));
    }
}
