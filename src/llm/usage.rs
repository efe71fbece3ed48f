use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Request and token accounting for one or more model calls.
///
/// `details` holds backend-specific counters (for example the reasoning and
/// execution share of a composite call). Merging sums every field, details
/// key by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub requests: u32,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, u64>,
}

impl Usage {
    /// Usage of a single request.
    pub fn single(request_tokens: u64, response_tokens: u64) -> Self {
        Self {
            requests: 1,
            request_tokens,
            response_tokens,
            total_tokens: request_tokens + response_tokens,
            details: BTreeMap::new(),
        }
    }

    /// Add another usage record into this one.
    pub fn incr(&mut self, other: &Usage) {
        self.requests += other.requests;
        self.request_tokens += other.request_tokens;
        self.response_tokens += other.response_tokens;
        self.total_tokens += other.total_tokens;
        for (key, value) in &other.details {
            *self.details.entry(key.clone()).or_insert(0) += value;
        }
    }

    /// Record this usage's totals as `{prefix}_*` detail counters on `target`.
    pub(crate) fn record_breakdown(&self, prefix: &str, target: &mut BTreeMap<String, u64>) {
        target.insert(format!("{prefix}_requests"), u64::from(self.requests));
        target.insert(format!("{prefix}_request_tokens"), self.request_tokens);
        target.insert(format!("{prefix}_response_tokens"), self.response_tokens);
        target.insert(format!("{prefix}_total_tokens"), self.total_tokens);
    }

    /// Parse an OpenAI-style `usage` object.
    ///
    /// Nested `*_tokens_details` counters (reasoning tokens, cached tokens) are
    /// flattened into `details`.
    pub(crate) fn from_openai(value: &serde_json::Value) -> Self {
        let prompt = value["prompt_tokens"].as_u64().unwrap_or(0);
        let completion = value["completion_tokens"].as_u64().unwrap_or(0);
        let total = value["total_tokens"].as_u64().unwrap_or(prompt + completion);

        let mut details = BTreeMap::new();
        for section in ["prompt_tokens_details", "completion_tokens_details"] {
            if let Some(map) = value[section].as_object() {
                for (key, count) in map {
                    if let Some(count) = count.as_u64() {
                        details.insert(key.clone(), count);
                    }
                }
            }
        }

        Self {
            requests: 1,
            request_tokens: prompt,
            response_tokens: completion,
            total_tokens: total,
            details,
        }
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, rhs: &Usage) {
        self.incr(rhs);
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(mut self, rhs: Usage) -> Usage {
        self.incr(&rhs);
        self
    }
}
