//! The LLM provider interface (§6.1). Out of scope beyond this surface —
//! real providers (Anthropic, OpenAI, ...) are external collaborators; the
//! spine only depends on this trait.

use async_trait::async_trait;
use futures::Stream;
use geoffrussy_common::{QuotaInfo, RateLimitInfo};
use std::pin::Pin;

#[derive(Debug, Clone)]
pub struct CallResult {
    pub content: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub model: String,
    pub provider: String,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn authenticate(&self, api_key: &str) -> anyhow::Result<()>;
    fn is_authenticated(&self) -> bool;
    async fn list_models(&self) -> anyhow::Result<Vec<String>>;
    async fn discover_models(&self) -> anyhow::Result<Vec<String>>;
    async fn call(&self, model: &str, prompt: &str) -> anyhow::Result<CallResult>;
    async fn stream(&self, model: &str, prompt: &str) -> anyhow::Result<ChunkStream>;
    async fn get_rate_limit_info(&self) -> anyhow::Result<Option<RateLimitInfo>>;
    async fn get_quota_info(&self) -> anyhow::Result<Option<QuotaInfo>>;
    fn supports_coding_plan(&self) -> bool;
}
