//! Model selection and token accounting

use serde::{Deserialize, Serialize};

/// Models that accept `response_format: json_object`.
const JSON_MODE_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini"];

/// Which model a call runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Localization and edit generation.
    Repair,
    /// One-sentence file descriptions for the repository map.
    Summarize,
}

impl Model {
    /// API identifier for this model.
    pub fn id(&self) -> &'static str {
        match self {
            Model::Repair => "gpt-4o",
            Model::Summarize => "gpt-4o-mini",
        }
    }

    /// Completion-token ceiling per request.
    pub fn max_tokens(&self) -> u32 {
        match self {
            Model::Repair => 8192,
            Model::Summarize => 256,
        }
    }

    pub fn supports_json_mode(&self) -> bool {
        JSON_MODE_MODELS.contains(&self.id())
    }
}

/// Token usage reported by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Fold a per-call usage report into a running total.
pub fn merge_usage(total: &mut Option<Usage>, delta: Option<&Usage>) {
    if let Some(delta) = delta {
        match total {
            Some(t) => t.add(delta),
            None => *total = Some(delta.clone()),
        }
    }
}
