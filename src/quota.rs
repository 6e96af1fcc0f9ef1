//! Quota Monitor (C4): tracks rate-limit and quota snapshots per provider,
//! computes warning levels and an advisable pre-call delay.

use crate::provider::Provider;
use crate::store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use geoffrussy_common::{QuotaInfo, RateLimitInfo, WarningLevel};

const STALE_AFTER: ChronoDuration = ChronoDuration::minutes(1);

#[derive(Debug, Clone)]
pub struct QuotaStatus {
    pub rate_limit: Option<RateLimitInfo>,
    pub quota: Option<QuotaInfo>,
    pub rate_limit_warning: WarningLevel,
    pub quota_warning: WarningLevel,
    pub should_delay: bool,
    pub recommended_delay: Option<std::time::Duration>,
    pub stale: bool,
}

fn rate_limit_percent_used(info: &RateLimitInfo) -> f64 {
    if info.requests_limit <= 0 {
        return 0.0;
    }
    (1.0 - info.requests_remaining as f64 / info.requests_limit as f64) * 100.0
}

fn quota_percent_used(info: &QuotaInfo) -> f64 {
    if let (Some(remaining), Some(limit)) = (info.tokens_remaining, info.tokens_limit) {
        if limit > 0 {
            return (1.0 - remaining as f64 / limit as f64) * 100.0;
        }
    }
    if let (Some(remaining), Some(limit)) = (info.cost_remaining, info.cost_limit) {
        if limit > 0.0 {
            return (1.0 - remaining / limit) * 100.0;
        }
    }
    0.0
}

fn delay_if_needed(rate_limit: &Option<RateLimitInfo>, warning: WarningLevel) -> (bool, Option<std::time::Duration>) {
    if !matches!(warning, WarningLevel::Exceeded | WarningLevel::Critical) {
        return (false, None);
    }
    let Some(info) = rate_limit else {
        return (false, None);
    };
    let remaining = info.reset_at - Utc::now();
    (true, remaining.to_std().ok())
}

/// Pull fresh rate-limit and quota info from the provider, persist
/// snapshots, and compute the warning assessment for both.
pub async fn check_provider(store: &Store, provider: &dyn Provider) -> anyhow::Result<QuotaStatus> {
    let name = provider.name().to_string();

    let rate_limit = provider.get_rate_limit_info().await?;
    if let Some(info) = &rate_limit {
        store
            .insert_rate_limit(&name, info.requests_remaining, info.requests_limit, info.reset_at)
            .await?;
    }
    let quota = provider.get_quota_info().await?;
    if let Some(info) = &quota {
        store
            .insert_quota(
                &name,
                info.tokens_remaining,
                info.tokens_limit,
                info.cost_remaining,
                info.cost_limit,
                info.reset_at,
            )
            .await?;
    }

    let rate_limit_warning = rate_limit
        .as_ref()
        .map(|i| WarningLevel::from_percent_used(rate_limit_percent_used(i)))
        .unwrap_or(WarningLevel::None);
    let quota_warning = quota
        .as_ref()
        .map(|i| WarningLevel::from_percent_used(quota_percent_used(i)))
        .unwrap_or(WarningLevel::None);

    let (should_delay, recommended_delay) = delay_if_needed(&rate_limit, rate_limit_warning);

    Ok(QuotaStatus {
        rate_limit,
        quota,
        rate_limit_warning,
        quota_warning,
        should_delay,
        recommended_delay,
        stale: false,
    })
}

/// Read the latest persisted snapshots for `provider`; mark stale (with an
/// info-level floor on the warning) if older than a minute, but still
/// return an assessment.
pub async fn get_cached_status(store: &Store, provider: &str) -> anyhow::Result<QuotaStatus> {
    let rate_limit = store.get_latest_rate_limit(provider).await?;
    let quota = store.get_latest_quota(provider).await?;

    let now = Utc::now();
    let stale = rate_limit.as_ref().map(|r| now - r.checked_at > STALE_AFTER).unwrap_or(false)
        || quota.as_ref().map(|q| now - q.checked_at > STALE_AFTER).unwrap_or(false);

    let mut rate_limit_warning = rate_limit
        .as_ref()
        .map(|i| WarningLevel::from_percent_used(rate_limit_percent_used(i)))
        .unwrap_or(WarningLevel::None);
    let mut quota_warning = quota
        .as_ref()
        .map(|i| WarningLevel::from_percent_used(quota_percent_used(i)))
        .unwrap_or(WarningLevel::None);

    if stale {
        rate_limit_warning = rate_limit_warning.max(WarningLevel::Info);
        quota_warning = quota_warning.max(WarningLevel::Info);
    }

    let (should_delay, recommended_delay) = delay_if_needed(&rate_limit, rate_limit_warning);

    Ok(QuotaStatus {
        rate_limit,
        quota,
        rate_limit_warning,
        quota_warning,
        should_delay,
        recommended_delay,
        stale,
    })
}

pub async fn should_delay_request(store: &Store, provider: &str) -> anyhow::Result<(bool, Option<std::time::Duration>)> {
    let status = get_cached_status(store, provider).await?;
    Ok((status.should_delay, status.recommended_delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoffrussy_common::{QuotaInfo, RateLimitInfo};

    fn rate_limit(remaining: i64, limit: i64) -> RateLimitInfo {
        RateLimitInfo {
            id: 0,
            provider: "anthropic".into(),
            requests_remaining: remaining,
            requests_limit: limit,
            reset_at: Utc::now() + ChronoDuration::minutes(10),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn rate_limit_warning_boundaries_match_scenario_s2() {
        let limit = 1000;
        assert_eq!(WarningLevel::from_percent_used(rate_limit_percent_used(&rate_limit(900, limit))), WarningLevel::Info);
        assert_eq!(WarningLevel::from_percent_used(rate_limit_percent_used(&rate_limit(250, limit))), WarningLevel::Caution);
        assert_eq!(WarningLevel::from_percent_used(rate_limit_percent_used(&rate_limit(100, limit))), WarningLevel::Warning);
        assert_eq!(WarningLevel::from_percent_used(rate_limit_percent_used(&rate_limit(30, limit))), WarningLevel::Critical);
        assert_eq!(WarningLevel::from_percent_used(rate_limit_percent_used(&rate_limit(0, limit))), WarningLevel::Exceeded);
    }

    #[test]
    fn exceeded_rate_limit_recommends_delay_until_reset() {
        let info = rate_limit(0, 1000);
        let (should_delay, delay) = delay_if_needed(&Some(info), WarningLevel::Exceeded);
        assert!(should_delay);
        assert!(delay.is_some());
    }

    #[test]
    fn quota_percent_used_prefers_tokens_over_cost() {
        let q = QuotaInfo {
            id: 0,
            provider: "anthropic".into(),
            tokens_remaining: Some(200),
            tokens_limit: Some(1000),
            cost_remaining: Some(999.0),
            cost_limit: Some(1000.0),
            reset_at: Utc::now(),
            checked_at: Utc::now(),
        };
        assert!((quota_percent_used(&q) - 80.0).abs() < f64::EPSILON);
    }
}
