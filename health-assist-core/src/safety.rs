//! Safety scanner: pure, English-only rule matching over curated lexicons.
//!
//! These functions never fail and never short-circuit the pipeline; their
//! output only influences which facts are attached to an answer and whether
//! the standard disclaimer is appended. All matching happens against text
//! already translated to English — there is no per-language lexicon, a
//! documented limitation rather than an oversight (see `DESIGN.md`).

use std::collections::HashSet;

use crate::domain::{MentalHealthSafety, PregnancySafety, RedFlagSafety};

/// Symptom phrases that indicate a potential emergency when present.
const RED_FLAG_SYMPTOMS: &[&str] = &[
    "chest pain",
    "severe chest pain",
    "shortness of breath",
    "difficulty breathing",
    "severe headache",
    "worst headache of my life",
    "sudden numbness",
    "slurred speech",
    "fainting",
    "loss of consciousness",
    "severe bleeding",
    "coughing blood",
    "high fever",
    "seizure",
    "blue lips",
    "severe abdominal pain",
];

/// Phrases indicating a mental-health crisis requiring immediate first aid.
const CRISIS_PHRASES: &[&str] = &[
    "want to die",
    "want to end my life",
    "kill myself",
    "suicidal",
    "suicide",
    "self harm",
    "self-harm",
    "hurt myself",
    "no reason to live",
    "can't go on",
];

/// First-aid steps attached whenever a crisis phrase is matched.
const CRISIS_FIRST_AID: &[&str] = &[
    "You are not alone, and help is available right now.",
    "If you are in immediate danger, please call 112 or your local emergency number.",
    "Consider reaching out to a trusted person nearby or a crisis helpline immediately.",
];

/// Phrases indicating a pregnancy-related emergency.
const PREGNANCY_EMERGENCY_PHRASES: &[&str] = &[
    "heavy bleeding",
    "severe cramping",
    "no fetal movement",
    "water broke",
    "severe swelling",
    "blurred vision",
    "can't feel the baby move",
];

/// Scan `text` for red-flag symptom phrases.
pub fn detect_red_flags(text: &str) -> RedFlagSafety {
    let lower = text.to_lowercase();
    let matched: Vec<String> = RED_FLAG_SYMPTOMS
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .map(|p| p.to_string())
        .collect();

    RedFlagSafety {
        red_flag: !matched.is_empty(),
        matched,
    }
}

/// Scan `text` for mental-health crisis phrases.
pub fn detect_mental_health_crisis(text: &str) -> MentalHealthSafety {
    let lower = text.to_lowercase();
    let matched: Vec<String> = CRISIS_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .map(|p| p.to_string())
        .collect();

    let crisis = !matched.is_empty();
    MentalHealthSafety {
        crisis,
        first_aid: if crisis {
            CRISIS_FIRST_AID.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        },
        matched,
    }
}

/// Scan `text` for pregnancy-emergency phrases.
pub fn detect_pregnancy_emergency(text: &str) -> PregnancySafety {
    let lower = text.to_lowercase();
    let matched: Vec<String> = PREGNANCY_EMERGENCY_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .map(|p| p.to_string())
        .collect();

    PregnancySafety {
        concern: !matched.is_empty(),
        matched,
        guidance: Vec::new(),
    }
}

/// Symptom vocabulary consulted by [`extract_symptoms`] — kept separate from
/// [`RED_FLAG_SYMPTOMS`] since not every recognized symptom is an emergency
/// marker on its own (e.g. "fever" alone isn't, but is relevant to routing).
const KNOWN_SYMPTOMS: &[&str] = &[
    "fever",
    "chest pain",
    "shortness of breath",
    "headache",
    "severe headache",
    "cough",
    "body ache",
    "fatigue",
    "nausea",
    "vomiting",
    "dizziness",
    "rash",
    "sore throat",
    "abdominal pain",
    "severe abdominal pain",
];

/// Extract the set of recognized symptom phrases present in `text`, used by
/// the pipeline to build the graph red-flag query.
pub fn extract_symptoms(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: HashSet<String> = HashSet::new();
    for symptom in KNOWN_SYMPTOMS.iter().chain(RED_FLAG_SYMPTOMS.iter()) {
        if lower.contains(symptom) {
            found.insert(symptom.to_string());
        }
    }
    found.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_red_flag_phrase() {
        let result = detect_red_flags("I've had severe chest pain since this morning");
        assert!(result.red_flag);
        assert!(result.matched.iter().any(|m| m.contains("chest pain")));
    }

    #[test]
    fn no_red_flag_for_mild_symptoms() {
        let result = detect_red_flags("I have a mild cough and runny nose");
        assert!(!result.red_flag);
    }

    #[test]
    fn detects_crisis_phrase_and_attaches_first_aid() {
        let result = detect_mental_health_crisis("I feel like I want to end my life");
        assert!(result.crisis);
        assert_eq!(result.first_aid.len(), CRISIS_FIRST_AID.len());
    }

    #[test]
    fn detects_pregnancy_emergency_phrase() {
        let result = detect_pregnancy_emergency("I'm pregnant and have heavy bleeding");
        assert!(result.concern);
    }

    #[test]
    fn extract_symptoms_finds_multiple_matches() {
        let symptoms = extract_symptoms("I have fever and a severe headache");
        assert!(symptoms.contains(&"fever".to_string()));
        assert!(symptoms.iter().any(|s| s.contains("headache")));
    }
}
