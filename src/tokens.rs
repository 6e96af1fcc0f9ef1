//! Token/Cost Counter (C3): records usage, aggregates with a write-through
//! cache, estimates tokens for text not yet sent to a provider, and checks
//! project budgets.

use crate::store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use geoffrussy_common::{Timestamp, TokenStatsCache};
use std::collections::HashMap;

const CACHE_TTL: ChronoDuration = ChronoDuration::minutes(5);
const DEFAULT_WARNING_LEVEL: f64 = 0.8;

pub async fn record_usage(
    store: &Store,
    project_id: &str,
    phase_id: Option<&str>,
    task_id: Option<&str>,
    provider: &str,
    model: &str,
    tokens_in: i64,
    tokens_out: i64,
    cost: f64,
) -> anyhow::Result<i64> {
    let id = store
        .record_token_usage(project_id, phase_id, task_id, provider, model, tokens_in, tokens_out, cost)
        .await?;
    store.invalidate_token_stats_cache(project_id).await?;
    Ok(id)
}

pub async fn get_total_tokens(store: &Store, project_id: &str) -> anyhow::Result<(i64, i64)> {
    let cache = get_cached_stats(store, project_id).await?;
    Ok((cache.total_input, cache.total_output))
}

/// Returns the cached aggregate if it is still within `CACHE_TTL`,
/// otherwise recomputes and writes through.
async fn get_cached_stats(store: &Store, project_id: &str) -> anyhow::Result<TokenStatsCache> {
    if let Some(cache) = store.get_token_stats_cache(project_id).await? {
        if let Some(last_updated) = cache.last_updated {
            if Utc::now() - last_updated < CACHE_TTL {
                return Ok(cache);
            }
        }
    }
    recompute_cache(store, project_id).await
}

async fn recompute_cache(store: &Store, project_id: &str) -> anyhow::Result<TokenStatsCache> {
    let (total_input, total_output, _cost) = store.sum_token_usage(project_id).await?;
    let by_provider = store.sum_token_usage_by_provider(project_id).await?;
    let by_phase = store.sum_token_usage_by_phase(project_id).await?;
    let cache = TokenStatsCache {
        project_id: project_id.to_string(),
        total_input,
        total_output,
        by_provider,
        by_phase,
        last_updated: Some(Utc::now()),
    };
    store.upsert_token_stats_cache(&cache).await?;
    Ok(cache)
}

pub async fn get_tokens_by_provider(store: &Store, project_id: &str) -> anyhow::Result<HashMap<String, i64>> {
    Ok(get_cached_stats(store, project_id).await?.by_provider)
}

pub async fn get_tokens_by_phase(store: &Store, project_id: &str) -> anyhow::Result<HashMap<String, i64>> {
    Ok(get_cached_stats(store, project_id).await?.by_phase)
}

/// Rough estimate blending a chars-per-token heuristic (~4) with a
/// word-count heuristic; minimum 1 for non-empty text. Exact per-model
/// tokenization is a non-goal — this is a pluggable strategy, not the
/// production tokenizer.
pub fn count_tokens(text: &str, _model: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let by_chars = (text.chars().count() as f64 / 4.0).ceil();
    let by_words = text.split_whitespace().count() as f64 * 0.75;
    (((by_chars + by_words) / 2.0).round() as u32).max(1)
}

pub fn calculate_cost(tokens_in: i64, tokens_out: i64, price_in: f64, price_out: f64) -> f64 {
    (tokens_in as f64 / 1000.0) * price_in + (tokens_out as f64 / 1000.0) * price_out
}

pub enum BudgetCheck {
    Ok,
    Warning(String),
    Exceeded,
}

pub async fn check_budget(store: &Store, project_id: &str, limit: Option<f64>) -> anyhow::Result<BudgetCheck> {
    let Some(limit) = limit else {
        return Ok(BudgetCheck::Ok);
    };
    let (_, _, total) = store.sum_token_usage(project_id).await?;
    if total >= limit {
        Ok(BudgetCheck::Exceeded)
    } else if total >= limit * DEFAULT_WARNING_LEVEL {
        Ok(BudgetCheck::Warning(format!(
            "project {project_id} has used {total:.2} of its {limit:.2} budget"
        )))
    } else {
        Ok(BudgetCheck::Ok)
    }
}

pub async fn get_cost_trends(
    store: &Store,
    project_id: &str,
    start: Timestamp,
    end: Timestamp,
) -> anyhow::Result<HashMap<String, f64>> {
    Ok(store.cost_by_day(project_id, start, end).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoffrussy_common::{Project, ProjectStage};

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_project(&Project {
                id: "proj-1".into(),
                name: "demo".into(),
                created_at: Utc::now(),
                current_stage: ProjectStage::Develop,
                current_phase_id: None,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn count_tokens_minimum_one_for_nonempty() {
        assert_eq!(count_tokens("hi", "anything"), 1);
        assert_eq!(count_tokens("", "anything"), 0);
    }

    #[test]
    fn calculate_cost_matches_per_thousand_pricing() {
        let cost = calculate_cost(2000, 1000, 3.0, 15.0);
        assert!((cost - 21.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cache_is_invalidated_after_record_usage() {
        let store = seeded_store().await;
        record_usage(&store, "proj-1", None, None, "anthropic", "sonnet", 100, 50, 0.1)
            .await
            .unwrap();
        let (input, output) = get_total_tokens(&store, "proj-1").await.unwrap();
        assert_eq!(input, 100);
        assert_eq!(output, 50);

        record_usage(&store, "proj-1", None, None, "anthropic", "sonnet", 10, 10, 0.01)
            .await
            .unwrap();
        let (input2, output2) = get_total_tokens(&store, "proj-1").await.unwrap();
        assert_eq!(input2, 110);
        assert_eq!(output2, 60);
    }

    #[tokio::test]
    async fn tokens_by_provider_reads_through_the_same_cache() {
        let store = seeded_store().await;
        record_usage(&store, "proj-1", None, None, "anthropic", "sonnet", 100, 50, 0.1)
            .await
            .unwrap();
        let by_provider = get_tokens_by_provider(&store, "proj-1").await.unwrap();
        assert_eq!(by_provider.get("anthropic"), Some(&150));

        let cache = store.get_token_stats_cache("proj-1").await.unwrap().unwrap();
        assert!(cache.last_updated.is_some());
    }

    #[tokio::test]
    async fn budget_check_thresholds() {
        let store = seeded_store().await;
        record_usage(&store, "proj-1", None, None, "anthropic", "sonnet", 1, 1, 85.0)
            .await
            .unwrap();
        match check_budget(&store, "proj-1", Some(100.0)).await.unwrap() {
            BudgetCheck::Warning(_) => {}
            _ => panic!("expected warning at 85% of budget"),
        }
        record_usage(&store, "proj-1", None, None, "anthropic", "sonnet", 1, 1, 20.0)
            .await
            .unwrap();
        match check_budget(&store, "proj-1", Some(100.0)).await.unwrap() {
            BudgetCheck::Exceeded => {}
            _ => panic!("expected exceeded once total passes the limit"),
        }
    }
}
