//! Domain types for the health-assist chat pipeline.
//!
//! These are plain data records shared by the gateway modules ([`crate::graph`],
//! [`crate::vector`], [`crate::llm`]), the pipeline ([`crate::pipeline`]) and the
//! orchestrator ([`crate::orchestrator`]). Boundary sanitization of user-supplied
//! profile data happens once, in [`Profile::from_request`], rather than being
//! re-checked at every call site.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Self-reported sex, used only to tailor condition phrasing; absent is common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Other,
}

/// Sanitized, boundary-checked user health profile.
///
/// Constructed once per request via [`Profile::from_request`]; every field has
/// already been range-checked and every string lowercased/truncated, so the
/// rest of the pipeline can trust it without re-validating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub diabetes: bool,
    #[serde(default)]
    pub hypertension: bool,
    #[serde(default)]
    pub pregnancy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default)]
    pub medical_conditions: BTreeSet<String>,
}

impl Profile {
    /// Maximum accepted age; inputs outside 0..=130 are dropped rather than rejected.
    const MAX_AGE: u8 = 130;
    const MAX_CITY_LEN: usize = 100;

    /// Build a sanitized profile from a raw, wire-format request payload.
    ///
    /// Age outside the plausible human range is dropped to `None` rather than
    /// clamped, since a clamped value would silently misrepresent the user.
    /// City is lowercased and truncated; medical condition tokens are
    /// lowercased and deduplicated via the `BTreeSet`.
    pub fn from_raw(raw: RawProfile) -> Self {
        let age = raw.age.filter(|&a| a <= Self::MAX_AGE);
        let city = raw.city.map(|c| {
            let trimmed = c.trim();
            let truncated: String = trimmed.chars().take(Self::MAX_CITY_LEN).collect();
            truncated.to_lowercase()
        });
        let medical_conditions = raw
            .medical_conditions
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            age,
            sex: raw.sex,
            diabetes: raw.diabetes,
            hypertension: raw.hypertension,
            pregnancy: raw.pregnancy,
            city,
            medical_conditions,
        }
    }

    /// The set of condition names implied by both the boolean flags and the
    /// free-form `medical_conditions` set, lowercase and deduplicated.
    pub fn conditions(&self) -> BTreeSet<String> {
        let mut conditions = self.medical_conditions.clone();
        if self.diabetes {
            conditions.insert("diabetes".to_string());
        }
        if self.hypertension {
            conditions.insert("hypertension".to_string());
        }
        if self.pregnancy {
            conditions.insert("pregnancy".to_string());
        }
        conditions
    }
}

/// Wire-format profile as received on the request body, before sanitization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfile {
    pub age: Option<u8>,
    pub sex: Option<Sex>,
    #[serde(default)]
    pub diabetes: bool,
    #[serde(default)]
    pub hypertension: bool,
    #[serde(default)]
    pub pregnancy: bool,
    pub city: Option<String>,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
}

/// Supported request/response language tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Ta,
    Te,
    Kn,
    Ml,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Hi => "hi",
            Self::Ta => "ta",
            Self::Te => "te",
            Self::Kn => "kn",
            Self::Ml => "ml",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Self::En),
            "hi" => Some(Self::Hi),
            "ta" => Some(Self::Ta),
            "te" => Some(Self::Te),
            "kn" => Some(Self::Kn),
            "ml" => Some(Self::Ml),
            _ => None,
        }
    }

    pub fn is_english(&self) -> bool {
        matches!(self, Self::En)
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::En
    }
}

/// The `/chat` and `/chat/stream` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default)]
    pub lang: Language,
    #[serde(default)]
    pub profile: RawProfile,
    #[serde(default)]
    pub debug: bool,
    pub session_id: Option<Uuid>,
}

/// Which backend produced the facts behind an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Graph,
    Vector,
}

/// A retrieved or derived source citation attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// The kind of structured fact attached to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    RedFlags,
    Contraindications,
    SafeActions,
    Providers,
    MentalHealthCrisis,
    PregnancyAlert,
    SymptomRelationships,
    SymptomNoRelationship,
    Personalization,
}

/// A structured annotation attached to an answer, produced during `gather_facts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "type")]
    pub kind: FactKind,
    pub data: serde_json::Value,
}

/// Red-flag symptom scan result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedFlagSafety {
    pub red_flag: bool,
    pub matched: Vec<String>,
}

/// Mental-health crisis phrase scan result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentalHealthSafety {
    pub crisis: bool,
    pub matched: Vec<String>,
    pub first_aid: Vec<String>,
}

/// Pregnancy-emergency phrase scan result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PregnancySafety {
    pub concern: bool,
    pub matched: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<String>,
}

/// Combined output of the safety scanner for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Safety {
    pub red_flag: bool,
    pub matched: Vec<String>,
    pub mental_health: MentalHealthSafety,
    pub pregnancy: PregnancySafety,
}

/// Per-request timing breakdown, attached to `metadata` for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub detect_language_ms: u64,
    pub translate_to_english_ms: u64,
    pub safety_scan_ms: u64,
    pub gather_facts_ms: u64,
    pub generate_answer_ms: u64,
    pub translate_back_ms: u64,
    pub total_ms: u64,
}

/// Response metadata attached to every `/chat` and `/chat/stream` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub timings: Timings,
    pub target_language: Language,
    pub detected_language: Language,
    pub translation_skipped: bool,
    pub customer_id: Uuid,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

/// The `/chat` unary response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub route: Route,
    pub facts: Vec<Fact>,
    pub citations: Vec<Citation>,
    pub safety: Safety,
    pub metadata: ChatMetadata,
}

/// A stored customer record (the authenticated principal's health-assist identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub language: Option<Language>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role of a stored chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// An immutable stored chat message (one turn, either side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub message_text: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<Safety>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An upserted IP observation, tracked for the ancillary IP-check endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpObservation {
    pub ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub visit_count: i64,
    pub has_authenticated: bool,
    pub bound_user_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_drops_implausible_age() {
        let raw = RawProfile {
            age: Some(200),
            ..Default::default()
        };
        let profile = Profile::from_raw(raw);
        assert_eq!(profile.age, None);
    }

    #[test]
    fn profile_lowercases_city_and_conditions() {
        let raw = RawProfile {
            city: Some("  Bengaluru  ".to_string()),
            medical_conditions: vec!["Asthma".to_string(), "asthma".to_string()],
            ..Default::default()
        };
        let profile = Profile::from_raw(raw);
        assert_eq!(profile.city.as_deref(), Some("bengaluru"));
        assert_eq!(profile.medical_conditions.len(), 1);
    }

    #[test]
    fn conditions_merges_flags_and_free_form() {
        let raw = RawProfile {
            diabetes: true,
            medical_conditions: vec!["asthma".to_string()],
            ..Default::default()
        };
        let profile = Profile::from_raw(raw);
        let conditions = profile.conditions();
        assert!(conditions.contains("diabetes"));
        assert!(conditions.contains("asthma"));
    }

    #[test]
    fn language_round_trips_through_code() {
        assert_eq!(Language::from_code("ta"), Some(Language::Ta));
        assert_eq!(Language::Ta.as_str(), "ta");
        assert!(Language::En.is_english());
    }
}
