//! HTTP client for an OpenAI-compatible chat completions API
//!
//! Handles retries with exponential backoff, JSON-mode requests, and
//! salvage parsing of structured content the model wraps in fences or
//! prose. All calls record token usage into a running total.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::models::{merge_usage, Model, Usage};
use super::prompts;
use super::{Oracle, ProblemLocation};
use crate::config::Config;
use crate::edit::CandidateSet;
use crate::pipeline::MAX_RELEVANT_FILES;
use crate::util::truncate;

/// Temperature for localization and summary calls.
const DETERMINISTIC_TEMPERATURE: f32 = 0.0;
/// Temperature for independent repair attempts; high so samples diverge.
const SAMPLING_TEMPERATURE: f32 = 0.9;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum length for response content quoted in error messages.
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// At most this many balanced JSON fragments are salvaged per candidate.
const MAX_JSON_CANDIDATES: usize = 4;

/// Sanitize API response content for error messages to prevent credential
/// leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-", // OpenAI key prefix
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

fn push_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return None;
    }
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

/// Peel one redundant brace/bracket layer off mildly malformed wrappers
/// like `{{…}}`.
fn unwrap_outer_wrapper(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 3 {
        return None;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let inner_trimmed = inner.trim_start();
        if inner_trimmed.starts_with('{') || inner_trimmed.starts_with('[') {
            return Some(inner.trim().to_string());
        }
    } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let inner_trimmed = inner.trim_start();
        if inner_trimmed.starts_with('[')
            || inner_trimmed.starts_with('{')
            || inner_trimmed.starts_with('"')
        {
            return Some(inner.trim().to_string());
        }
    }
    None
}

/// Scan forward from `start` for one balanced JSON object or array.
/// String contents are skipped so braces inside values never unbalance
/// the scan.
fn extract_balanced_json(content: &str, start: usize) -> Option<String> {
    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.pop() != Some(ch) {
                    return None;
                }
                if expected.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    if max_candidates == 0 {
        return out;
    }
    for (idx, ch) in content.char_indices() {
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced_json(content, idx) {
                push_candidate(&mut out, candidate);
                if out.len() >= max_candidates {
                    break;
                }
            }
        }
    }
    out
}

/// Parse JSON out of model output that may carry fences, leading prose, or
/// stray wrapper braces. Tries the raw content first, then progressively
/// salvaged fragments; fails only when no candidate deserializes.
pub(crate) fn parse_structured<T>(content: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_candidate(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_candidate(&mut candidates, stripped);
    }

    let mut idx = 0usize;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_json_candidates(&current, MAX_JSON_CANDIDATES) {
            push_candidate(&mut candidates, extracted);
        }
        if let Some(unwrapped) = unwrap_outer_wrapper(&current) {
            push_candidate(&mut candidates, unwrapped);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(anyhow!(
        "Failed to parse structured response: {}\nContent: {}",
        last_err.unwrap_or_else(|| "unknown parse error".to_string()),
        sanitize_api_response(content)
    ))
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    if let Some(pos) = text_lower.find("retry") {
        let after_retry = &text_lower[pos..];
        for word in after_retry.split_whitespace().skip(1).take(5) {
            if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
                if secs > 0 && secs < 300 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let secs = ms / 1000;
    if secs == 0 {
        1
    } else {
        secs
    }
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_network_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow!("Request timed out after {REQUEST_TIMEOUT_SECS}s.")
    } else {
        anyhow!("Could not reach the API: {err}")
    }
}

fn create_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Null in some API responses, e.g. when a refusal occurs.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Errors can arrive in the body with a 200 status when an upstream proxy
/// swallows the real code.
#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct FilesReply {
    file_paths: Vec<String>,
}

#[derive(Deserialize)]
struct LocationsReply {
    locations: Vec<ProblemLocation>,
}

#[derive(Deserialize)]
struct EditsReply {
    edits: CandidateSet,
}

/// Oracle implementation backed by an OpenAI-compatible HTTP API.
pub struct OracleClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    usage: Mutex<Option<Usage>>,
}

impl OracleClient {
    /// Build a client from the saved configuration. Fails when no API key
    /// is configured.
    pub fn new() -> Result<Self> {
        let mut config = Config::load();
        let api_key = config.get_api_key().ok_or_else(|| {
            anyhow!("No API key configured. Run 'codemend --setup' to get started.")
        })?;
        Ok(Self {
            http: create_http_client(REQUEST_TIMEOUT_SECS)?,
            api_key,
            endpoint: config.chat_completions_url(),
            usage: Mutex::new(None),
        })
    }

    /// Tokens consumed so far across every call on this client.
    pub fn total_usage(&self) -> Option<Usage> {
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_usage(&self, delta: Option<&Usage>) {
        let mut guard = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        merge_usage(&mut guard, delta);
    }

    /// Send a chat request with automatic retry on transient failures:
    /// network errors, 429s, 5xx, and error bodies hiding behind a 200.
    async fn send_with_retry<B: Serialize>(&self, request_body: &B) -> Result<String> {
        let mut last_error = String::new();
        let mut retry_count = 0;

        while retry_count <= MAX_RETRIES {
            let response = match self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(request_body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_error = err.to_string();
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let wait = backoff_secs(retry_count);
                        warn!("network error, retrying in {wait}s: {last_error}");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    return Err(map_network_error(err));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    last_error = err.to_string();
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let wait = backoff_secs(retry_count);
                        warn!("failed reading response, retrying in {wait}s: {last_error}");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    return Err(map_network_error(err));
                }
            };

            if status.is_success() {
                if let Ok(err_resp) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
                    let is_retryable = matches!(
                        err_resp.error.kind.as_deref(),
                        None | Some("server_error") | Some("rate_limit_exceeded")
                    );
                    if is_retryable && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let wait = backoff_secs(retry_count);
                        warn!("API returned an error body, retrying in {wait}s");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    return Err(anyhow!(
                        "API error: {}",
                        truncate(&err_resp.error.message, MAX_ERROR_CONTENT_LEN)
                    ));
                }
                return Ok(text);
            }

            last_error = text.clone();

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                warn!("rate limited, retrying in {wait}s");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status.is_server_error() && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = backoff_secs(retry_count);
                warn!("server error {status}, retrying in {wait}s");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Run 'codemend --setup' to update it.".to_string(),
                429 => format!(
                    "Rate limited after {retry_count} retries. Try again in a few minutes."
                ),
                500..=599 => format!(
                    "API server error ({status}). The service may be temporarily unavailable."
                ),
                _ => format!("API error {status}: {}", sanitize_api_response(&text)),
            };
            return Err(anyhow!("{error_msg}"));
        }

        Err(anyhow!("{last_error}"))
    }

    /// One chat completion round trip. Returns the assistant content.
    async fn chat(
        &self,
        model: Model,
        system: &str,
        user: &str,
        temperature: f32,
        json_mode: bool,
    ) -> Result<String> {
        if json_mode && !model.supports_json_mode() {
            return Err(anyhow!(
                "JSON mode isn't supported for {}. Try a different model.",
                model.id()
            ));
        }

        let response_format = json_mode.then(|| ResponseFormat {
            format_type: "json_object".to_string(),
        });

        let request = ChatRequest {
            model: model.id().to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: model.max_tokens(),
            temperature,
            stream: false,
            response_format,
        };

        debug!(
            "calling {} (temperature {temperature}, {} prompt chars)",
            model.id(),
            system.len() + user.len()
        );

        let text = self.send_with_retry(&request).await?;

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow!(
                "Failed to parse API response: {e}\n{}",
                sanitize_api_response(&text)
            )
        })?;

        let choice = parsed.choices.first();

        if let Some(c) = choice {
            if let Some(refusal) = &c.message.refusal {
                return Err(anyhow!(
                    "Request was refused: {}",
                    truncate(refusal, MAX_ERROR_CONTENT_LEN)
                ));
            }
        }

        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(anyhow!(
                "API returned an empty response. The model may have been rate limited or failed to generate content."
            ));
        }

        self.record_usage(parsed.usage.as_ref());
        Ok(content)
    }

    async fn chat_structured<T>(
        &self,
        model: Model,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let content = self.chat(model, system, user, temperature, true).await?;
        parse_structured(&content)
    }
}

impl Oracle for OracleClient {
    async fn relevant_files(&self, problem: &str, structure: &str) -> Result<Vec<String>> {
        let system = prompts::relevant_files_system(MAX_RELEVANT_FILES);
        let user = prompts::relevant_files_user(problem, structure);
        let reply: FilesReply = self
            .chat_structured(Model::Repair, &system, &user, DETERMINISTIC_TEMPERATURE)
            .await?;
        Ok(reply.file_paths)
    }

    async fn problem_locations(
        &self,
        problem: &str,
        skeleton: &str,
    ) -> Result<Vec<ProblemLocation>> {
        let user = prompts::problem_locations_user(problem, skeleton);
        let reply: LocationsReply = self
            .chat_structured(
                Model::Repair,
                prompts::PROBLEM_LOCATIONS_SYSTEM,
                &user,
                DETERMINISTIC_TEMPERATURE,
            )
            .await?;
        Ok(reply.locations)
    }

    async fn candidate_edits(
        &self,
        problem: &str,
        skeleton: &str,
        locations: &[ProblemLocation],
    ) -> Result<CandidateSet> {
        let user = prompts::candidate_edits_user(problem, skeleton, locations);
        let reply: EditsReply = self
            .chat_structured(
                Model::Repair,
                prompts::CANDIDATE_EDITS_SYSTEM,
                &user,
                SAMPLING_TEMPERATURE,
            )
            .await?;
        Ok(reply.edits)
    }

    async fn file_summary(&self, path: &str, content: &str) -> Result<String> {
        let user = prompts::file_summary_user(path, content);
        let text = self
            .chat(
                Model::Summarize,
                prompts::FILE_SUMMARY_SYSTEM,
                &user,
                DETERMINISTIC_TEMPERATURE,
                false,
            )
            .await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Reply {
        file_paths: Vec<String>,
    }

    #[test]
    fn test_parse_structured_plain_json() {
        let reply: Reply = parse_structured(r#"{"file_paths": ["a.py", "b.py"]}"#).unwrap();
        assert_eq!(reply.file_paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_parse_structured_strips_fences() {
        let content = "```json\n{\"file_paths\": [\"a.py\"]}\n```";
        let reply: Reply = parse_structured(content).unwrap();
        assert_eq!(reply.file_paths, vec!["a.py"]);
    }

    #[test]
    fn test_parse_structured_salvages_from_prose() {
        let content = "Here is the result: {\"file_paths\": [\"a.py\"]} and nothing else.";
        let reply: Reply = parse_structured(content).unwrap();
        assert_eq!(reply.file_paths, vec!["a.py"]);
    }

    #[test]
    fn test_parse_structured_unwraps_double_braces() {
        let content = "{{\"file_paths\": []}}";
        let reply: Reply = parse_structured(content).unwrap();
        assert!(reply.file_paths.is_empty());
    }

    #[test]
    fn test_parse_structured_rejects_garbage() {
        assert!(parse_structured::<Reply>("not json at all").is_err());
    }

    #[test]
    fn test_balanced_scan_skips_braces_inside_strings() {
        let content = "noise {\"file_paths\": [\"we{ird}.py\"]} trailing";
        let reply: Reply = parse_structured(content).unwrap();
        assert_eq!(reply.file_paths, vec!["we{ird}.py"]);
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let sanitized = sanitize_api_response("error: invalid key sk-abc123");
        assert_eq!(
            sanitized,
            "(response details redacted - may contain sensitive data)"
        );
    }

    #[test]
    fn test_sanitize_truncates_long_content() {
        let long = "x".repeat(500);
        let sanitized = sanitize_api_response(&long);
        assert!(sanitized.chars().count() <= MAX_ERROR_CONTENT_LEN + 3);
    }

    #[test]
    fn test_backoff_doubles_each_retry() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn test_parse_retry_after_reads_seconds() {
        assert_eq!(
            parse_retry_after("Rate limit reached. Please retry after 12 seconds."),
            Some(12)
        );
        assert_eq!(parse_retry_after("please retry later"), None);
        // Implausibly large hints are ignored.
        assert_eq!(parse_retry_after("retry after 999 seconds"), None);
    }
}
