//! Language-model gateway: chat completion, translation helpers, and
//! primary/fallback provider failover.
//!
//! Mirrors the retry-with-backoff shape of [`crate::database::create_pool_with_retries`]
//! but at the level of a single HTTP call rather than a connection: each
//! helper first tries the primary provider, then the fallback, with a short
//! backoff between attempts, and surfaces a [`BackendError`] only once both
//! are exhausted.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::LmProviderConfig;
use crate::domain::Language;
use crate::error::BackendError;

/// Clue tokens for a handful of common romanized (Latin-script) renderings
/// of non-English queries, consulted before falling back to the LM for
/// language detection. Approximate by design — a user typing "naa fever
/// vachindi" in romanized Telugu should still route to the right language.
const ROMANIZED_CLUES: &[(Language, &[&str])] = &[
    (Language::Hi, &["hai", "kya", "kaise", "mujhe", "nahi"]),
    (Language::Ta, &["irukku", "vanakkam", "enakku", "illai"]),
    (Language::Te, &["vachindi", "undi", "cheyali", "ledu"]),
    (Language::Kn, &["ide", "barali", "illa", "yake"]),
    (Language::Ml, &["und", "venam", "alla", "entha"]),
];

#[derive(Clone, Copy)]
enum ProviderSlot {
    Primary,
    Fallback,
}

pub struct LmGateway {
    primary: Option<LmProviderConfig>,
    fallback: Option<LmProviderConfig>,
    client: reqwest::Client,
}

impl LmGateway {
    pub fn new(primary: Option<LmProviderConfig>, fallback: Option<LmProviderConfig>) -> Self {
        Self {
            primary,
            fallback,
            client: reqwest::Client::new(),
        }
    }

    fn provider(&self, slot: ProviderSlot) -> Option<&LmProviderConfig> {
        match slot {
            ProviderSlot::Primary => self.primary.as_ref(),
            ProviderSlot::Fallback => self.fallback.as_ref(),
        }
    }

    /// Issue a chat-completion call against both configured providers in
    /// order, falling over to the next on any failure. Backs off `0.5s *
    /// attempt` between provider attempts.
    async fn complete_messages(&self, messages: serde_json::Value) -> Result<String, BackendError> {
        let slots = [ProviderSlot::Primary, ProviderSlot::Fallback];
        let mut last_error = None;

        for (attempt, slot) in slots.into_iter().enumerate() {
            let Some(provider) = self.provider(slot) else {
                continue;
            };

            match self.call_provider(provider, &messages).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "language model provider call failed");
                    last_error = Some(e);
                    if attempt > 0 {
                        tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::connection("llm", "no language model provider configured")))
    }

    async fn call_provider(
        &self,
        provider: &LmProviderConfig,
        messages: &serde_json::Value,
    ) -> Result<String, BackendError> {
        self.call_provider_with_retries(provider, messages, provider.max_retries)
            .await
    }

    async fn call_provider_with_retries(
        &self,
        provider: &LmProviderConfig,
        messages: &serde_json::Value,
        max_retries: u32,
    ) -> Result<String, BackendError> {
        let mut attempt = 0;
        loop {
            match self.call_provider_once(provider, messages).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < max_retries && e.is_retriable() => {
                    attempt += 1;
                    let delay = Duration::from_millis(300) * attempt;
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying lm call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_provider_once(
        &self,
        provider: &LmProviderConfig,
        messages: &serde_json::Value,
    ) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&provider.api_key)
            .json(&json!({
                "model": provider.model,
                "messages": messages,
                "temperature": 0.3,
            }))
            .timeout(Duration::from_secs(provider.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::timeout("llm", e.to_string())
                } else {
                    BackendError::connection("llm", e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::rate_limited("llm", "rate limited by provider"));
        }
        if !response.status().is_success() {
            return Err(BackendError::other(
                "llm",
                format!("provider returned status {}", response.status()),
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::other("llm", e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BackendError::other("llm", "empty completion response"))
    }

    /// Human-readable label for readiness reporting: which provider slots are configured.
    pub fn active_provider_label(&self) -> String {
        match (&self.primary, &self.fallback) {
            (Some(p), Some(f)) => format!("primary: {} / fallback: {}", p.model, f.model),
            (Some(p), None) => format!("primary only: {}", p.model),
            (None, Some(f)) => format!("fallback only: {}", f.model),
            (None, None) => "no provider configured".to_string(),
        }
    }

    /// Detect the language of `text`. Tries Unicode-block detection for the
    /// five supported native scripts first (deterministic, no network call),
    /// then a small romanized clue-token table, defaulting to English.
    pub fn detect_language(&self, text: &str) -> Language {
        if let Some(lang) = detect_by_script(text) {
            return lang;
        }
        detect_by_romanized_clues(text).unwrap_or(Language::En)
    }

    /// Translate `text` (in `from`) to English.
    pub async fn translate_to_english(&self, text: &str, from: Language) -> Result<String, BackendError> {
        if from.is_english() {
            return Ok(text.to_string());
        }
        let messages = json!([
            {"role": "system", "content": "Translate the user's message to English. Reply with only the translation."},
            {"role": "user", "content": text},
        ]);
        self.complete_messages(messages).await
    }

    /// Translate `text` (assumed English) back to `target`.
    pub async fn translate_back(&self, text: &str, target: Language) -> Result<String, BackendError> {
        if target.is_english() {
            return Ok(text.to_string());
        }
        let messages = json!([
            {"role": "system", "content": format!(
                "Translate the following English text to the language with ISO code '{}'. Reply with only the translation.",
                target.as_str()
            )},
            {"role": "user", "content": text},
        ]);
        self.complete_messages(messages).await
    }

    /// Generate the final answer given an assembled context and a system prompt.
    pub async fn generate_answer(&self, system_prompt: &str, context: &str, question: &str) -> Result<String, BackendError> {
        let messages = json!([
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": format!("Context:\n{}\n\nQuestion: {}", context, question)},
        ]);
        self.complete_messages(messages).await
    }

    /// Same as [`Self::generate_answer`] but splits the completed answer into
    /// incremental chunks suitable for SSE emission. There is no true
    /// token-level streaming client in this gateway; chunks are produced by
    /// splitting the completed text, which preserves the observable
    /// chunk/translated/done event shape the streaming endpoint promises.
    pub async fn generate_answer_stream(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
    ) -> Result<Vec<String>, BackendError> {
        let full = self.generate_answer(system_prompt, context, question).await?;
        Ok(chunk_words(&full, 8))
    }
}

fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words
        .chunks(words_per_chunk.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

fn detect_by_script(text: &str) -> Option<Language> {
    for ch in text.chars() {
        let code = ch as u32;
        match code {
            0x0900..=0x097F => return Some(Language::Hi),
            0x0B80..=0x0BFF => return Some(Language::Ta),
            0x0C00..=0x0C7F => return Some(Language::Te),
            0x0C80..=0x0CFF => return Some(Language::Kn),
            0x0D00..=0x0D7F => return Some(Language::Ml),
            _ => continue,
        }
    }
    None
}

fn detect_by_romanized_clues(text: &str) -> Option<Language> {
    let lower = text.to_lowercase();
    let words: std::collections::HashSet<&str> = lower.split_whitespace().collect();

    let mut best: Option<(Language, usize)> = None;
    for (lang, clues) in ROMANIZED_CLUES {
        let count = clues.iter().filter(|clue| words.contains(**clue)).count();
        if count > 0 && best.map(|(_, best_count)| count > best_count).unwrap_or(true) {
            best = Some((*lang, count));
        }
    }
    best.map(|(lang, _)| lang)
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_recognizes_tamil_script() {
        let gateway = LmGateway::new(None, None);
        let lang = gateway.detect_language("எனக்கு காய்ச்சல் வருகிறது");
        assert_eq!(lang, Language::Ta);
    }

    #[test]
    fn detect_language_recognizes_romanized_hindi() {
        let gateway = LmGateway::new(None, None);
        let lang = gateway.detect_language("mujhe fever hai aur sir dard kya kare");
        assert_eq!(lang, Language::Hi);
    }

    #[test]
    fn detect_language_defaults_to_english() {
        let gateway = LmGateway::new(None, None);
        let lang = gateway.detect_language("I have a fever and body ache");
        assert_eq!(lang, Language::En);
    }

    #[tokio::test]
    async fn translate_to_english_is_identity_for_english() {
        let gateway = LmGateway::new(None, None);
        let result = gateway.translate_to_english("hello", Language::En).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn generate_answer_errors_without_configured_provider() {
        let gateway = LmGateway::new(None, None);
        let result = gateway.generate_answer("system", "context", "question").await;
        assert!(result.is_err());
    }

    #[test]
    fn chunk_words_splits_into_groups() {
        let chunks = chunk_words("one two three four five six seven eight nine", 4);
        assert_eq!(chunks.len(), 3);
    }
}
