//! Pure pipeline logic: routing, keyword extraction, context assembly, and
//! the deterministic fallback answer used when the language model is
//! unavailable. Kept free of I/O so it can be exercised with plain `#[test]`s;
//! [`crate::orchestrator`] wires these helpers together with the async
//! gateway calls.

use std::collections::BTreeSet;

use crate::domain::{Citation, Fact, FactKind, Language, Profile};
use crate::graph::SymptomRelationship;
use crate::vector::RetrievedChunk;

/// Phrases that indicate the query is asking about contraindications, safe
/// activities, providers, or red-flag relationships — the kinds of questions
/// the graph can answer better than free-text retrieval. Anything else
/// routes to the vector retriever.
const GRAPH_INTENT_PHRASES: &[&str] = &[
    "contraindicat",
    "safe to take",
    "safe to eat",
    "safe for me",
    "can i take",
    "should i avoid",
    "interact with",
    "doctor near",
    "hospital near",
    "clinic in",
    "provider in",
    "specialist in",
    "related symptom",
    "also experience",
    "red flag",
];

/// Decide whether `text` should be routed to the graph gateway rather than
/// the vector retriever.
pub fn is_graph_intent(text: &str) -> bool {
    let lower = text.to_lowercase();
    GRAPH_INTENT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Fixed table of condition keywords scanned for in free text, independent
/// of the profile's boolean flags — lets a mention like "I have asthma"
/// extend `user_conditions` even when the stored profile doesn't carry it.
const CONDITION_KEYWORDS: &[(&str, &[&str])] = &[
    ("diabetes", &["diabetes", "diabetic"]),
    ("hypertension", &["hypertension", "high blood pressure"]),
    ("pregnancy", &["pregnancy", "pregnant"]),
    ("asthma", &["asthma"]),
    ("heart disease", &["heart disease", "cardiac"]),
    ("kidney disease", &["kidney disease", "renal"]),
    ("liver disease", &["liver disease", "hepatic"]),
    ("epilepsy", &["epilepsy", "seizure disorder"]),
];

/// Conditions named in free text, independent of the caller's stored profile.
pub fn extract_condition_keywords(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    CONDITION_KEYWORDS
        .iter()
        .filter(|(_, terms)| terms.iter().any(|t| lower.contains(t)))
        .map(|(condition, _)| condition.to_string())
        .collect()
}

/// The full set of conditions relevant to this turn: the profile's flags and
/// free-form list, plus anything mentioned inline in the current message.
pub fn combined_conditions(profile: &Profile, text: &str) -> BTreeSet<String> {
    let mut conditions = profile.conditions();
    conditions.extend(extract_condition_keywords(text));
    conditions
}

/// Cities a provider lookup might plausibly reference: `"... in <city>"` /
/// `"... near <city>"` patterns, title-cased input lowercased on extraction.
pub fn extract_city(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for marker in ["in ", "near "] {
        if let Some(pos) = lower.rfind(marker) {
            let after = lower[pos + marker.len()..].trim();
            let city: String = after
                .split(|c: char| matches!(c, '.' | ',' | '?' | '!'))
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if !city.is_empty() && city.split_whitespace().count() <= 3 {
                return Some(city);
            }
        }
    }
    None
}

/// Turn graph-discovered symptom relationships into a fact, or `None` if
/// there were no matches — callers attach [`FactKind::SymptomNoRelationship`]
/// in that case so the answer can say so explicitly instead of staying silent.
pub fn symptom_relationship_fact(relationships: &[SymptomRelationship]) -> Fact {
    if relationships.is_empty() {
        Fact {
            kind: FactKind::SymptomNoRelationship,
            data: serde_json::json!({}),
        }
    } else {
        Fact {
            kind: FactKind::SymptomRelationships,
            data: serde_json::to_value(relationships).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Render the retrieved chunks, structured facts, and profile into the
/// single context string the answer-generation prompt consumes. An empty
/// `rag_results` list renders an explicit marker rather than an empty
/// string, steering the model to say so instead of inventing facts.
pub fn context_from(rag_results: &[RetrievedChunk], facts: &[Fact], profile: &Profile) -> String {
    let mut sections = Vec::new();

    if rag_results.is_empty() {
        sections.push("Retrieved information: no information available.".to_string());
    } else {
        let mut block = String::from("Retrieved information:\n");
        for (i, chunk) in rag_results.iter().enumerate() {
            block.push_str(&format!("{}. [{}] {}\n", i + 1, chunk.source, chunk.chunk));
        }
        sections.push(block);
    }

    for fact in facts {
        if let Some(line) = render_fact_summary(fact) {
            sections.push(line);
        }
    }

    sections.push(render_profile(profile));

    sections.join("\n\n")
}

fn render_fact_summary(fact: &Fact) -> Option<String> {
    match fact.kind {
        FactKind::RedFlags => Some(format!("Red flags detected: {}", fact.data)),
        FactKind::Contraindications => Some(format!("Contraindications: {}", fact.data)),
        FactKind::SafeActions => Some(format!("Safe actions: {}", fact.data)),
        FactKind::Providers => Some(format!("Nearby providers: {}", fact.data)),
        FactKind::MentalHealthCrisis => Some(format!("Mental health crisis indicators: {}", fact.data)),
        FactKind::PregnancyAlert => Some(format!("Pregnancy alert: {}", fact.data)),
        FactKind::SymptomRelationships => Some(format!("Related symptoms: {}", fact.data)),
        FactKind::SymptomNoRelationship => {
            Some("No related symptoms were found in the graph.".to_string())
        }
        FactKind::Personalization => Some(format!("Personalization notes: {}", fact.data)),
    }
}

fn render_profile(profile: &Profile) -> String {
    let mut parts = Vec::new();
    if let Some(age) = profile.age {
        parts.push(format!("age {}", age));
    }
    if let Some(sex) = profile.sex {
        parts.push(format!("{:?}", sex).to_lowercase());
    }
    let conditions = profile.conditions();
    if !conditions.is_empty() {
        parts.push(format!("conditions: {}", conditions.into_iter().collect::<Vec<_>>().join(", ")));
    }
    if let Some(city) = &profile.city {
        parts.push(format!("city: {}", city));
    }

    if parts.is_empty() {
        "User profile: none provided.".to_string()
    } else {
        format!("User profile: {}.", parts.join(", "))
    }
}

/// Deterministic answer assembled without a language model: up to two
/// retrieved-chunk summaries, one sentence per fact, a closing safety line,
/// and a trailing "Sources consulted" line with up to three citations.
/// Used when the language-model gateway has no configured or reachable
/// provider, so a degraded service still returns a useful, stable answer.
pub fn fallback_answer(rag_results: &[RetrievedChunk], facts: &[Fact], citations: &[Citation]) -> String {
    let mut lines = Vec::new();

    for (i, chunk) in rag_results.iter().take(2).enumerate() {
        lines.push(format!("Key insight {}: {}", i + 1, summarize(&chunk.chunk)));
    }

    for fact in facts {
        if let Some(sentence) = render_fact_sentence(fact) {
            lines.push(sentence);
        }
    }

    lines.push("Please consult a healthcare professional for guidance specific to your situation.".to_string());

    if !citations.is_empty() {
        let sources: Vec<String> = citations
            .iter()
            .take(3)
            .map(|c| c.source.clone())
            .collect();
        lines.push(format!("Sources consulted: {}", sources.join(", ")));
    }

    lines.join("\n")
}

fn summarize(chunk: &str) -> String {
    let mut sentence = chunk.split('.').next().unwrap_or(chunk).trim().to_string();
    if sentence.len() > 160 {
        sentence.truncate(160);
        sentence.push('…');
    }
    sentence
}

/// Fixed safety disclaimer appended to every answer that wasn't flagged for
/// an emergency red flag, rendered directly in the detected language so it
/// survives the translate-back step without another provider round trip.
pub fn localized_disclaimer(language: Language) -> &'static str {
    match language {
        Language::En => "This information is for educational purposes only and is not a substitute for professional medical advice, diagnosis, or treatment. Please consult a qualified healthcare provider with any questions about your health.",
        Language::Hi => "यह जानकारी केवल शैक्षिक उद्देश्यों के लिए है और यह पेशेवर चिकित्सा सलाह, निदान या उपचार का विकल्प नहीं है। अपने स्वास्थ्य से जुड़े किसी भी प्रश्न के लिए कृपया किसी योग्य स्वास्थ्य सेवा प्रदाता से सलाह लें।",
        Language::Ta => "இந்தத் தகவல் கல்வி நோக்கங்களுக்காக மட்டுமே வழங்கப்படுகிறது, மேலும் இது தொழில்முறை மருத்துவ ஆலோசனை, நோயறிதல் அல்லது சிகிச்சைக்கு மாற்றாக அமையாது. உங்கள் உடல்நலம் தொடர்பான கேள்விகளுக்கு தகுதி வாய்ந்த சுகாதார வழங்குநரை அணுகவும்.",
        Language::Te => "ఈ సమాచారం విద్యాపరమైన ప్రయోజనాల కోసం మాత్రమే, ఇది వృత్తిపరమైన వైద్య సలహా, నిర్ధారణ లేదా చికిత్సకు ప్రత్యామ్నాయం కాదు. మీ ఆరోగ్యానికి సంబంధించిన ఏవైనా ప్రశ్నల కోసం దయచేసి అర్హత కలిగిన ఆరోగ్య సంరక్షణ ప్రదాతను సంప్రదించండి.",
        Language::Kn => "ಈ ಮಾಹಿತಿಯು ಶೈಕ್ಷಣಿಕ ಉದ್ದೇಶಗಳಿಗಾಗಿ ಮಾತ್ರ, ಇದು ವೃತ್ತಿಪರ ವೈದ್ಯಕೀಯ ಸಲಹೆ, ರೋಗನಿರ್ಣಯ ಅಥವಾ ಚಿಕಿತ್ಸೆಗೆ ಪರ್ಯಾಯವಲ್ಲ. ನಿಮ್ಮ ಆರೋಗ್ಯಕ್ಕೆ ಸಂಬಂಧಿಸಿದ ಯಾವುದೇ ಪ್ರಶ್ನೆಗಳಿಗೆ ದಯವಿಟ್ಟು ಅರ್ಹ ಆರೋಗ್ಯ ಪೂರೈಕೆದಾರರನ್ನು ಸಂಪರ್ಕಿಸಿ.",
        Language::Ml => "ഈ വിവരം വിദ്യാഭ്യാസ ആവശ്യങ്ങൾക്ക് മാത്രമുള്ളതാണ്, ഇത് പ്രൊഫഷണൽ മെഡിക്കൽ ഉപദേശത്തിനോ രോഗനിർണയത്തിനോ ചികിത്സയ്ക്കോ പകരമല്ല. നിങ്ങളുടെ ആരോഗ്യത്തെക്കുറിച്ചുള്ള ഏതെങ്കിലും ചോദ്യങ്ങൾക്ക് ദയവായി യോഗ്യതയുള്ള ഒരു ആരോഗ്യ പരിരക്ഷാ ദാതാവിനെ സമീപിക്കുക.",
    }
}

fn render_fact_sentence(fact: &Fact) -> Option<String> {
    match fact.kind {
        FactKind::RedFlags => Some("Some of the symptoms you described can indicate a medical emergency.".to_string()),
        FactKind::Contraindications => Some("Certain medications may not be suitable given your conditions.".to_string()),
        FactKind::SafeActions => Some("There are safe self-care steps available for your conditions.".to_string()),
        FactKind::Providers => Some("Nearby healthcare providers were found for your city.".to_string()),
        FactKind::MentalHealthCrisis => None, // surfaced separately and immediately, not folded into the fallback answer
        FactKind::PregnancyAlert => None,
        FactKind::SymptomRelationships => Some("Your symptoms may be related to other conditions worth discussing with a clinician.".to_string()),
        FactKind::SymptomNoRelationship => None,
        FactKind::Personalization => Some("This guidance has been tailored to the health details you shared.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_intent_detects_contraindication_question() {
        assert!(is_graph_intent("Is ibuprofen safe to take with hypertension?"));
    }

    #[test]
    fn graph_intent_false_for_plain_symptom_question() {
        assert!(!is_graph_intent("I have a fever and body ache, what should I do?"));
    }

    #[test]
    fn extract_condition_keywords_finds_inline_mentions() {
        let keywords = extract_condition_keywords("I was just diagnosed with asthma last week");
        assert!(keywords.contains("asthma"));
    }

    #[test]
    fn extract_city_finds_trailing_city_after_near() {
        assert_eq!(extract_city("find a clinic near Bengaluru"), Some("bengaluru".to_string()));
    }

    #[test]
    fn extract_city_returns_none_without_marker() {
        assert_eq!(extract_city("I have a fever"), None);
    }

    #[test]
    fn context_from_marks_empty_retrieval_explicitly() {
        let profile = Profile::default();
        let context = context_from(&[], &[], &profile);
        assert!(context.contains("no information available"));
    }

    #[test]
    fn fallback_answer_always_includes_disclaimer_line() {
        let answer = fallback_answer(&[], &[], &[]);
        assert!(answer.contains("consult a healthcare professional"));
    }

    #[test]
    fn localized_disclaimer_is_distinct_per_language() {
        assert_ne!(localized_disclaimer(Language::En), localized_disclaimer(Language::Hi));
        assert!(localized_disclaimer(Language::En).contains("professional"));
    }

    #[test]
    fn fallback_answer_caps_citations_at_three() {
        let citations: Vec<Citation> = (0..5)
            .map(|i| Citation { source: format!("source-{}", i), id: i.to_string(), topic: None })
            .collect();
        let answer = fallback_answer(&[], &[], &citations);
        let sources_line = answer.lines().last().unwrap();
        assert_eq!(sources_line.matches("source-").count(), 3);
    }
}
