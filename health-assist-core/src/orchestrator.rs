//! The single entry point for `/chat` and `/chat/stream`.
//!
//! Binds an authenticated caller to a customer and session, gathers facts
//! from the graph/vector/safety layers, calls the language model (or the
//! deterministic [`crate::pipeline::fallback_answer`] if no provider
//! responds), and enqueues persistence and cache invalidation on the
//! background worker so neither adds to request latency. [`run_chat`] serves
//! the unary endpoint; [`run_chat_stream`] serves the SSE endpoint and emits
//! the same work as a sequence of `chunk`/`translated`/`done` events.

use std::time::Instant;

use uuid::Uuid;

use crate::domain::{
    ChatMessage, ChatMetadata, ChatRequest, ChatResponse, Citation, Fact, FactKind, Language,
    MessageRole, Profile, Route, Safety, Timings,
};
use crate::error::{Error, Result};
use crate::pipeline;
use crate::state::AppState;
use crate::vector::RetrievedChunk;

/// Cache TTL (seconds) applied to session-history reads, independent of the
/// substrate's default TTL — history changes every turn, so it is kept short.
const SESSION_HISTORY_TTL_SECS: u64 = 60;

/// The fixed set of list-length variants the orchestrator may have cached
/// under `sessions:<uid>:<limit>` or `session_messages:<sid>:<limit>` —
/// invalidation clears all of them since the actual limit used by a given
/// cached read isn't tracked separately.
const CACHED_LIMITS: [i64; 6] = [10, 50, 100, 200, 500, 1000];

/// One history turn as handed to the language-model prompt: the pipeline
/// only needs role and text, never the full stored [`ChatMessage`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Raised when the authenticated principal does not own the customer record
/// named by the request — the orchestrator's "authentication binding" check.
fn check_customer_binding(token_subject: &str, customer_id: Uuid) -> Result<()> {
    match Uuid::parse_str(token_subject) {
        Ok(subject_id) if subject_id == customer_id => Ok(()),
        _ => Err(Error::Forbidden(
            "authenticated subject does not own this customer".to_string(),
        )),
    }
}

/// Fetch and format the last `limit` turns for session `session_id`, using
/// the cache substrate ahead of the database.
async fn fetch_history(state: &AppState, session_id: Uuid, limit: i64) -> Result<Vec<HistoryTurn>> {
    #[cfg(feature = "cache")]
    {
        let cache_key = crate::cache::CacheKey::new(
            crate::cache::CacheFamily::SessionMessages,
            &session_id.to_string(),
            state.config().cache.version,
            &[&limit.to_string()],
        );
        let redis = state.redis().await;
        if let Some(hit) = state.cache().get_fast::<Vec<HistoryTurn>>(redis.as_ref(), &cache_key).await {
            return Ok(hit);
        }

        let turns = fetch_history_from_db(state, session_id, limit).await?;
        state.cache().set(redis.as_ref(), &cache_key, &turns, SESSION_HISTORY_TTL_SECS).await;
        return Ok(turns);
    }

    #[cfg(not(feature = "cache"))]
    {
        fetch_history_from_db(state, session_id, limit).await
    }
}

async fn fetch_history_from_db(state: &AppState, session_id: Uuid, limit: i64) -> Result<Vec<HistoryTurn>> {
    #[cfg(feature = "database")]
    if let Some(pool) = state.db().await {
        let messages = crate::database::get_session_messages(&pool, session_id, limit).await?;
        return Ok(messages.into_iter().map(format_history_turn).collect());
    }

    Ok(Vec::new())
}

/// Prefer the stored `answer` over `message_text` for assistant turns, since
/// `message_text` on an assistant row holds the pre-translation draft.
fn format_history_turn(message: ChatMessage) -> HistoryTurn {
    let content = match message.role {
        MessageRole::Assistant => message.answer.unwrap_or(message.message_text),
        MessageRole::User => message.message_text,
    };
    HistoryTurn { role: message.role, content }
}

/// Gather graph/vector facts and citations for the turn, choosing the graph
/// route when the query expresses graph intent (contraindications, nearby
/// providers, symptom relationships) and the vector route otherwise.
async fn gather_facts(
    state: &AppState,
    english_text: &str,
    profile: &Profile,
    history_texts: &[String],
) -> (Route, Vec<Fact>, Vec<Citation>, Vec<RetrievedChunk>) {
    let conditions: Vec<String> = pipeline::combined_conditions(profile, english_text).into_iter().collect();
    let symptoms = crate::safety::extract_symptoms(english_text);

    if pipeline::is_graph_intent(english_text) {
        let mut facts = Vec::new();
        let mut citations = Vec::new();

        if !symptoms.is_empty() {
            let red_flags = state.graph().red_flags(&symptoms).await;
            if !red_flags.is_empty() {
                facts.push(Fact {
                    kind: FactKind::RedFlags,
                    data: serde_json::to_value(&red_flags).unwrap_or(serde_json::Value::Null),
                });
            }

            let related = state.graph().related_symptoms(&symptoms).await;
            facts.push(pipeline::symptom_relationship_fact(&related));
        }

        if !conditions.is_empty() {
            let contraindications = state.graph().contraindications(&conditions).await;
            if !contraindications.is_empty() {
                facts.push(Fact {
                    kind: FactKind::Contraindications,
                    data: serde_json::to_value(&contraindications).unwrap_or(serde_json::Value::Null),
                });
            }

            let safe_actions = state.graph().safe_actions(&conditions).await;
            if !safe_actions.is_empty() {
                facts.push(Fact {
                    kind: FactKind::SafeActions,
                    data: serde_json::to_value(&safe_actions).unwrap_or(serde_json::Value::Null),
                });
            }
        }

        if let Some(city) = profile.city.clone().or_else(|| pipeline::extract_city(english_text)) {
            let providers = state.graph().providers(&city).await;
            if !providers.is_empty() {
                citations.extend(providers.iter().map(|p| Citation {
                    source: p.name.clone(),
                    id: p.name.clone(),
                    topic: Some(p.specialty.clone()),
                }));
                facts.push(Fact {
                    kind: FactKind::Providers,
                    data: serde_json::to_value(&providers).unwrap_or(serde_json::Value::Null),
                });
            }
        }

        if !conditions.is_empty() || !profile.conditions().is_empty() {
            facts.push(Fact {
                kind: FactKind::Personalization,
                data: serde_json::json!({ "conditions": conditions }),
            });
        }

        let rag_results = state.vector().retrieve(english_text, 3, history_texts).await;

        (Route::Graph, facts, citations, rag_results)
    } else {
        let chunks = state.vector().retrieve(english_text, 4, history_texts).await;
        let citations = chunks
            .iter()
            .map(|c| Citation { source: c.source.clone(), id: c.id.clone(), topic: Some(c.topic.clone()) })
            .collect();

        let mut facts = Vec::new();
        if !conditions.is_empty() {
            facts.push(Fact {
                kind: FactKind::Personalization,
                data: serde_json::json!({ "conditions": conditions }),
            });
        }

        (Route::Vector, facts, citations, chunks)
    }
}

/// Run the safety scanner over the (English) message text. Never aborts the
/// pipeline — the resulting [`Safety`] record is attached to the answer and
/// callers decide how to weight it, matching the documented English-only
/// scope of the scanner.
fn scan_safety(english_text: &str) -> Safety {
    let red_flag = crate::safety::detect_red_flags(english_text);
    let mental_health = crate::safety::detect_mental_health_crisis(english_text);
    let pregnancy = crate::safety::detect_pregnancy_emergency(english_text);

    Safety {
        red_flag: red_flag.red_flag,
        matched: red_flag.matched,
        mental_health,
        pregnancy,
    }
}

fn append_safety_facts(facts: &mut Vec<Fact>, safety: &Safety) {
    if safety.mental_health.crisis {
        facts.push(Fact {
            kind: FactKind::MentalHealthCrisis,
            data: serde_json::json!({
                "matched": safety.mental_health.matched,
                "first_aid": safety.mental_health.first_aid,
            }),
        });
    }
    if safety.pregnancy.concern {
        facts.push(Fact {
            kind: FactKind::PregnancyAlert,
            data: serde_json::json!({
                "matched": safety.pregnancy.matched,
                "guidance": safety.pregnancy.guidance,
            }),
        });
    }
}

/// One resolved turn, ready to be (a) returned to the unary caller as a
/// [`ChatResponse`] or (b) streamed as chunk/translated/done events.
struct ResolvedTurn {
    answer_english: String,
    answer_final: String,
    route: Route,
    facts: Vec<Fact>,
    citations: Vec<Citation>,
    safety: Safety,
    detected_language: Language,
    translation_skipped: bool,
    timings: Timings,
}

/// Everything up through language-model generation, shared by the unary and
/// streaming entry points; only the final translate-back and response
/// framing differ between them.
async fn resolve_turn(
    state: &AppState,
    request: &ChatRequest,
    profile: &Profile,
    history: &[HistoryTurn],
) -> ResolvedTurn {
    let start = Instant::now();

    let t0 = Instant::now();
    let detected_language = state.llm().detect_language(&request.text);
    let detect_language_ms = t0.elapsed().as_millis() as u64;

    // Fast path: an already-English message skips translation entirely and
    // the final answer is rendered directly in English.
    let translation_skipped = detected_language.is_english();

    let t1 = Instant::now();
    let english_text = if translation_skipped {
        request.text.clone()
    } else {
        match state.llm().translate_to_english(&request.text, detected_language).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "translation to English failed, using original text");
                request.text.clone()
            }
        }
    };
    let translate_to_english_ms = t1.elapsed().as_millis() as u64;

    let t2 = Instant::now();
    let safety = scan_safety(&english_text);
    let safety_scan_ms = t2.elapsed().as_millis() as u64;

    let history_texts: Vec<String> = history.iter().map(|t| t.content.clone()).collect();

    let t3 = Instant::now();
    let (route, mut facts, citations, rag_results) =
        gather_facts(state, &english_text, profile, &history_texts).await;
    append_safety_facts(&mut facts, &safety);
    let gather_facts_ms = t3.elapsed().as_millis() as u64;

    let t4 = Instant::now();
    let system_prompt = "You are a careful, evidence-grounded health assistant. \
        Use only the supplied context and facts; never invent clinical claims. \
        Always recommend professional care for anything serious.";
    let context = pipeline::context_from(&rag_results, &facts, profile);
    let answer_english = match state.llm().generate_answer(system_prompt, &context, &english_text).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "language model generation failed, using deterministic fallback");
            pipeline::fallback_answer(&rag_results, &facts, &citations)
        }
    };
    let generate_answer_ms = t4.elapsed().as_millis() as u64;

    let t5 = Instant::now();
    let answer_localized = if translation_skipped {
        answer_english.clone()
    } else {
        match state.llm().translate_back(&answer_english, detected_language).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "translate-back failed, returning English answer");
                answer_english.clone()
            }
        }
    };
    let translate_back_ms = t5.elapsed().as_millis() as u64;

    // Every answer that wasn't flagged for an emergency gets the safety
    // disclaimer, rendered in the same language as the answer it follows.
    // Red-flag answers skip it: the red-flag guidance itself carries the
    // urgency, and stacking a routine disclaimer under it would dilute it.
    let answer_final = if safety.red_flag {
        answer_localized
    } else {
        format!("{}\n\n{}", answer_localized, pipeline::localized_disclaimer(detected_language))
    };

    let total_ms = start.elapsed().as_millis() as u64;

    ResolvedTurn {
        answer_english,
        answer_final,
        route,
        facts,
        citations,
        safety,
        detected_language,
        translation_skipped,
        timings: Timings {
            detect_language_ms,
            translate_to_english_ms,
            safety_scan_ms,
            gather_facts_ms,
            generate_answer_ms,
            translate_back_ms,
            total_ms,
        },
    }
}

/// Persist both sides of the turn and invalidate the session's cached
/// history, run on the background worker so it never adds to request
/// latency.
fn enqueue_persistence(
    state: &AppState,
    customer_id: Uuid,
    session_id: Uuid,
    request_language: Language,
    user_text: String,
    turn: &ResolvedTurn,
) {
    #[cfg(feature = "database")]
    {
        let pool_state = state.clone();
        let user_message = ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::User,
            message_text: user_text,
            language: request_language,
            route: None,
            answer: None,
            safety: None,
            facts: Vec::new(),
            citations: Vec::new(),
            metadata: None,
            created_at: chrono::Utc::now(),
        };
        let assistant_message = ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::Assistant,
            message_text: turn.answer_english.clone(),
            language: turn.detected_language,
            route: Some(turn.route),
            answer: Some(turn.answer_final.clone()),
            safety: Some(turn.safety.clone()),
            facts: turn.facts.clone(),
            citations: turn.citations.clone(),
            metadata: None,
            created_at: chrono::Utc::now(),
        };

        state.worker().enqueue(async move {
            if let Some(pool) = pool_state.db().await {
                if let Err(e) = crate::database::save_chat_message(&pool, &user_message).await {
                    tracing::warn!(error = %e, "failed to persist user chat message");
                }
                if let Err(e) = crate::database::save_chat_message(&pool, &assistant_message).await {
                    tracing::warn!(error = %e, "failed to persist assistant chat message");
                }
            }

            #[cfg(feature = "cache")]
            {
                let redis = pool_state.redis().await;
                pool_state
                    .cache()
                    .invalidate_session_families(redis.as_ref(), &customer_id.to_string(), &session_id.to_string())
                    .await;
            }
        });
    }

    #[cfg(not(feature = "database"))]
    {
        let _ = (customer_id, session_id, request_language, user_text, turn);
    }
}

/// Upsert the customer and session rows for this turn. Falls back to
/// synthesizing identifiers when no database is configured, so the
/// orchestrator stays usable in a database-less deployment (tests, local
/// dev) at the cost of not persisting history across restarts.
async fn bind_session(state: &AppState, customer_id: Uuid, request: &ChatRequest, profile: &Profile) -> Result<(Uuid, Profile)> {
    #[cfg(feature = "database")]
    if let Some(pool) = state.db().await {
        let stored_profile = crate::database::get_customer(&pool, customer_id)
            .await?
            .map(|c| c.profile)
            .unwrap_or_else(|| profile.clone());
        let session = crate::database::get_or_create_session(
            &pool,
            customer_id,
            request.session_id,
            Some(request.lang),
        )
        .await?;
        return Ok((session.id, stored_profile));
    }

    Ok((request.session_id.unwrap_or_else(Uuid::new_v4), profile.clone()))
}

/// Handle a unary `/chat` turn end to end: auth binding, session upsert,
/// history fetch, generation, and background persistence.
pub async fn run_chat(state: &AppState, token_subject: &str, customer_id: Uuid, request: ChatRequest) -> Result<ChatResponse> {
    check_customer_binding(token_subject, customer_id)?;

    let profile = Profile::from_raw(request.profile.clone());
    let (session_id, profile) = bind_session(state, customer_id, &request, &profile).await?;
    let history = fetch_history(state, session_id, 20).await?;

    let turn = resolve_turn(state, &request, &profile, &history).await;

    enqueue_persistence(state, customer_id, session_id, request.lang, request.text.clone(), &turn);

    let debug = if request.debug {
        Some(serde_json::json!({
            "route": turn.route,
            "detected_language": turn.detected_language,
            "history_turns": history.len(),
        }))
    } else {
        None
    };

    Ok(ChatResponse {
        answer: turn.answer_final,
        route: turn.route,
        facts: turn.facts,
        citations: turn.citations,
        safety: turn.safety,
        metadata: ChatMetadata {
            timings: turn.timings,
            target_language: turn.detected_language,
            detected_language: turn.detected_language,
            translation_skipped: turn.translation_skipped,
            customer_id,
            session_id,
            debug,
        },
    })
}

/// One SSE frame emitted by [`run_chat_stream`]: a body chunk, the final
/// translated answer, or the terminal `done` event carrying the full answer.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatStreamEvent {
    Chunk { content: String },
    Translated { content: String },
    Done {
        answer: String,
        route: Route,
        facts: Vec<Fact>,
        citations: Vec<Citation>,
        safety: Safety,
        metadata: ChatMetadata,
    },
}

/// Handle a streaming `/chat/stream` turn, returning the full ordered frame
/// sequence. The HTTP layer is responsible for pacing delivery over SSE;
/// framing here matches the documented event names exactly.
///
/// When the language model answered in English directly (`translation_skipped`),
/// the English generation is chunked word-by-word as it would have streamed
/// from the provider. When a translate-back step ran, the English chunks are
/// emitted first, followed by one `translated` event carrying the final
/// localized answer — there is no token-level streaming translator, so the
/// localized text is only available once translation completes.
pub async fn run_chat_stream(
    state: &AppState,
    token_subject: &str,
    customer_id: Uuid,
    request: ChatRequest,
) -> Result<Vec<ChatStreamEvent>> {
    check_customer_binding(token_subject, customer_id)?;

    let profile = Profile::from_raw(request.profile.clone());
    let (session_id, profile) = bind_session(state, customer_id, &request, &profile).await?;
    let history = fetch_history(state, session_id, 20).await?;

    let turn = resolve_turn(state, &request, &profile, &history).await;

    enqueue_persistence(state, customer_id, session_id, request.lang, request.text.clone(), &turn);

    // On the English fast path there is no separate translated event, so the
    // chunk stream itself must carry the disclaimer-decorated final text; when
    // a translate-back ran, the chunks are an English preview and the
    // `translated` event supplies the decorated final text as an override.
    let stream_source = if turn.translation_skipped { &turn.answer_final } else { &turn.answer_english };
    let mut events: Vec<ChatStreamEvent> = chunk_for_stream(stream_source)
        .into_iter()
        .map(|content| ChatStreamEvent::Chunk { content })
        .collect();

    if !turn.translation_skipped {
        events.push(ChatStreamEvent::Translated { content: turn.answer_final.clone() });
    }

    events.push(ChatStreamEvent::Done {
        answer: turn.answer_final,
        route: turn.route,
        facts: turn.facts,
        citations: turn.citations,
        safety: turn.safety,
        metadata: ChatMetadata {
            timings: turn.timings,
            target_language: turn.detected_language,
            detected_language: turn.detected_language,
            translation_skipped: turn.translation_skipped,
            customer_id,
            session_id,
            debug: None,
        },
    });

    Ok(events)
}

/// Split into character chunks for the degraded (no-LM-provider) path, where
/// the deterministic fallback answer has no natural word-level streaming
/// boundary from a provider; otherwise split on whitespace in groups of
/// eight words, matching [`crate::llm::LmGateway::generate_answer_stream`].
/// Every chunk but the last carries its trailing separator so the plain
/// concatenation of chunk contents reconstructs `text` exactly.
fn chunk_for_stream(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 1 {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let groups: Vec<&[&str]> = words.chunks(8).collect();
    let last = groups.len() - 1;
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let joined = group.join(" ");
            if i == last { joined } else { format!("{} ", joined) }
        })
        .collect()
}

/// List of the fixed cached-limit keys invalidated for list-shaped families
/// after a write — exposed for the `/cache/invalidate` administrative
/// endpoint to reuse the same limit set the orchestrator caches under.
pub fn cached_limit_variants() -> &'static [i64] {
    &CACHED_LIMITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_customer_binding_accepts_matching_subject() {
        let id = Uuid::new_v4();
        assert!(check_customer_binding(&id.to_string(), id).is_ok());
    }

    #[test]
    fn check_customer_binding_rejects_mismatched_subject() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(check_customer_binding(&other.to_string(), id).is_err());
    }

    #[test]
    fn check_customer_binding_rejects_non_uuid_subject() {
        let id = Uuid::new_v4();
        assert!(check_customer_binding("not-a-uuid", id).is_err());
    }

    #[test]
    fn chunk_for_stream_splits_multi_word_text_into_word_groups() {
        let chunks = chunk_for_stream("one two three four five six seven eight nine ten");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn chunk_for_stream_splits_single_word_into_characters() {
        let chunks = chunk_for_stream("hello");
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn chunk_for_stream_concatenation_reconstructs_text() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_for_stream(text);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_for_stream_concatenation_reconstructs_single_word() {
        let text = "hello";
        let chunks = chunk_for_stream(text);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn format_history_turn_prefers_answer_over_message_text_for_assistant() {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            message_text: "draft".to_string(),
            language: Language::En,
            route: None,
            answer: Some("final".to_string()),
            safety: None,
            facts: Vec::new(),
            citations: Vec::new(),
            metadata: None,
            created_at: chrono::Utc::now(),
        };
        let turn = format_history_turn(message);
        assert_eq!(turn.content, "final");
    }

    #[test]
    fn cached_limit_variants_matches_documented_set() {
        assert_eq!(cached_limit_variants(), &[10, 50, 100, 200, 500, 1000]);
    }
}
