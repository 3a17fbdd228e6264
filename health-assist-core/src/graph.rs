//! Property-graph gateway.
//!
//! Wraps a Bolt connection to a Neo4j-compatible graph store and exposes a
//! small, fixed vocabulary of read queries. Every query call is best-effort:
//! on any driver or connection failure it logs and falls back to a curated
//! in-memory dataset rather than propagating the error, mirroring the way
//! [`crate::database`] treats an optional pool but without ever failing the
//! request — callers never see a graph outage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::GraphConfig;
use crate::error::BackendError;

/// `(symptom, conditions it flags as an emergency)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedFlagEntry {
    pub symptom: String,
    pub conditions: Vec<String>,
}

/// `(condition, medicines contraindicated for it)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContraindicationEntry {
    pub condition: String,
    pub medicines: Vec<String>,
}

/// `(condition, actions considered safe for it)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafeActionEntry {
    pub condition: String,
    pub actions: Vec<String>,
}

/// A healthcare provider located in a city.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub specialty: String,
    pub contact: String,
}

/// A pair of symptoms that share one or more conditions, with the shared set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymptomRelationship {
    pub symptom: String,
    pub related: String,
    pub shared_conditions: Vec<String>,
}

/// Gateway to the property-graph store, with an always-available fallback.
pub struct GraphGateway {
    config: Option<GraphConfig>,
    driver: RwLock<Option<Arc<neo4rs::Graph>>>,
    fallback: FallbackGraph,
}

impl GraphGateway {
    /// Build a gateway. The driver connection is established lazily on first
    /// query, not at construction, so an unreachable graph never blocks
    /// startup.
    pub fn new(config: Option<GraphConfig>) -> Self {
        Self {
            config,
            driver: RwLock::new(None),
            fallback: FallbackGraph::seeded(),
        }
    }

    async fn driver(&self) -> Option<Arc<neo4rs::Graph>> {
        if let Some(driver) = self.driver.read().await.as_ref() {
            return Some(driver.clone());
        }

        let config = self.config.as_ref()?;
        let mut guard = self.driver.write().await;
        if let Some(driver) = guard.as_ref() {
            return Some(driver.clone());
        }

        let uri = rewrite_uri(config);
        match neo4rs::Graph::new(&uri, &config.user, &config.password).await {
            Ok(graph) => {
                let graph = Arc::new(graph);
                *guard = Some(graph.clone());
                Some(graph)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "graph driver connection failed, serving from in-memory fallback"
                );
                None
            }
        }
    }

    /// Drop the cached driver so the next call re-attempts the connection.
    async fn poison(&self) {
        *self.driver.write().await = None;
    }

    /// Symptoms that mark an emergency, with the conditions each flags.
    pub async fn red_flags(&self, symptoms: &[String]) -> Vec<RedFlagEntry> {
        if symptoms.is_empty() {
            return Vec::new();
        }
        if let Some(driver) = self.driver().await {
            match self.query_red_flags(&driver, symptoms).await {
                Ok(v) => return v,
                Err(e) => self.log_and_poison("red_flags", e).await,
            }
        }
        self.fallback.red_flags(symptoms)
    }

    /// Medicines contraindicated for the given conditions.
    pub async fn contraindications(&self, conditions: &[String]) -> Vec<ContraindicationEntry> {
        if conditions.is_empty() {
            return Vec::new();
        }
        if let Some(driver) = self.driver().await {
            match self.query_contraindications(&driver, conditions).await {
                Ok(v) => return v,
                Err(e) => self.log_and_poison("contraindications", e).await,
            }
        }
        self.fallback.contraindications(conditions)
    }

    /// Actions considered safe for the given conditions.
    pub async fn safe_actions(&self, conditions: &[String]) -> Vec<SafeActionEntry> {
        if conditions.is_empty() {
            return Vec::new();
        }
        if let Some(driver) = self.driver().await {
            match self.query_safe_actions(&driver, conditions).await {
                Ok(v) => return v,
                Err(e) => self.log_and_poison("safe_actions", e).await,
            }
        }
        self.fallback.safe_actions(conditions)
    }

    /// Providers located in the given city.
    pub async fn providers(&self, city: &str) -> Vec<Provider> {
        if city.is_empty() {
            return Vec::new();
        }
        if let Some(driver) = self.driver().await {
            match self.query_providers(&driver, city).await {
                Ok(v) => return v,
                Err(e) => self.log_and_poison("providers", e).await,
            }
        }
        self.fallback.providers(city)
    }

    /// Symptoms related to the given symptoms via a shared condition,
    /// sorted by shared-condition count descending and truncated to 20.
    pub async fn related_symptoms(&self, symptoms: &[String]) -> Vec<SymptomRelationship> {
        if symptoms.is_empty() {
            return Vec::new();
        }
        if let Some(driver) = self.driver().await {
            match self.query_related_symptoms(&driver, symptoms).await {
                Ok(v) => return v,
                Err(e) => self.log_and_poison("related_symptoms", e).await,
            }
        }
        self.fallback.related_symptoms(symptoms)
    }

    /// Convenience wrapper: count of symptoms in `symptoms` that are red flags.
    pub async fn count_red_flags(&self, symptoms: &[String]) -> usize {
        self.red_flags(symptoms).await.len()
    }

    /// Whether a remote driver is configured and currently connected, used
    /// only for readiness reporting — queries still succeed either way.
    pub async fn is_remote_available(&self) -> bool {
        self.driver().await.is_some()
    }

    async fn log_and_poison(&self, op: &'static str, err: BackendError) {
        tracing::warn!(operation = op, error = %err, "graph query failed, falling back to in-memory dataset");
        self.poison().await;
    }

    async fn query_red_flags(
        &self,
        graph: &neo4rs::Graph,
        symptoms: &[String],
    ) -> Result<Vec<RedFlagEntry>, BackendError> {
        let lowered: Vec<String> = symptoms.iter().map(|s| s.to_lowercase()).collect();
        let q = neo4rs::query(
            "MATCH (s:Symptom)-[:IS_RED_FLAG_FOR]->(c:Condition) \
             WHERE toLower(s.name) IN $symptoms \
             RETURN s.name AS symptom, collect(DISTINCT c.name) AS conditions",
        )
        .param("symptoms", lowered);

        let mut stream = graph
            .execute(q)
            .await
            .map_err(|e| BackendError::connection("graph", e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| BackendError::other("graph", e.to_string()))?
        {
            let symptom: String = row.get("symptom").unwrap_or_default();
            let conditions: Vec<String> = row.get("conditions").unwrap_or_default();
            out.push(RedFlagEntry { symptom, conditions });
        }
        Ok(out)
    }

    async fn query_contraindications(
        &self,
        graph: &neo4rs::Graph,
        conditions: &[String],
    ) -> Result<Vec<ContraindicationEntry>, BackendError> {
        let lowered: Vec<String> = conditions.iter().map(|c| c.to_lowercase()).collect();
        let q = neo4rs::query(
            "MATCH (c:Condition)-[:CONTRAINDICATES]->(m:Medicine) \
             WHERE toLower(c.name) IN $conditions \
             RETURN c.name AS condition, collect(DISTINCT m.name) AS medicines",
        )
        .param("conditions", lowered);

        let mut stream = graph
            .execute(q)
            .await
            .map_err(|e| BackendError::connection("graph", e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| BackendError::other("graph", e.to_string()))?
        {
            let condition: String = row.get("condition").unwrap_or_default();
            let medicines: Vec<String> = row.get("medicines").unwrap_or_default();
            out.push(ContraindicationEntry { condition, medicines });
        }
        Ok(out)
    }

    async fn query_safe_actions(
        &self,
        graph: &neo4rs::Graph,
        conditions: &[String],
    ) -> Result<Vec<SafeActionEntry>, BackendError> {
        let lowered: Vec<String> = conditions.iter().map(|c| c.to_lowercase()).collect();
        let q = neo4rs::query(
            "MATCH (c:Condition)-[:SAFE_FOR]->(a:Action) \
             WHERE toLower(c.name) IN $conditions \
             RETURN c.name AS condition, collect(DISTINCT a.name) AS actions",
        )
        .param("conditions", lowered);

        let mut stream = graph
            .execute(q)
            .await
            .map_err(|e| BackendError::connection("graph", e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| BackendError::other("graph", e.to_string()))?
        {
            let condition: String = row.get("condition").unwrap_or_default();
            let actions: Vec<String> = row.get("actions").unwrap_or_default();
            out.push(SafeActionEntry { condition, actions });
        }
        Ok(out)
    }

    async fn query_providers(
        &self,
        graph: &neo4rs::Graph,
        city: &str,
    ) -> Result<Vec<Provider>, BackendError> {
        let q = neo4rs::query(
            "MATCH (p:Provider)-[:LOCATED_IN]->(ci:City) \
             WHERE toLower(ci.name) = toLower($city) \
             RETURN p.name AS name, p.specialty AS specialty, p.contact AS contact",
        )
        .param("city", city.to_lowercase());

        let mut stream = graph
            .execute(q)
            .await
            .map_err(|e| BackendError::connection("graph", e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| BackendError::other("graph", e.to_string()))?
        {
            out.push(Provider {
                name: row.get("name").unwrap_or_default(),
                specialty: row.get("specialty").unwrap_or_default(),
                contact: row.get("contact").unwrap_or_default(),
            });
        }
        Ok(out)
    }

    async fn query_related_symptoms(
        &self,
        graph: &neo4rs::Graph,
        symptoms: &[String],
    ) -> Result<Vec<SymptomRelationship>, BackendError> {
        let lowered: Vec<String> = symptoms.iter().map(|s| s.to_lowercase()).collect();

        // Three edge shapes contribute shared-condition pairs: red-flag to
        // red-flag, association to association, and the cross product of
        // the two relationship kinds.
        let queries = [
            "MATCH (s:Symptom)-[:IS_RED_FLAG_FOR]->(c:Condition)<-[:IS_RED_FLAG_FOR]-(o:Symptom) \
             WHERE toLower(s.name) IN $symptoms AND s <> o \
             RETURN s.name AS symptom, o.name AS related, c.name AS shared",
            "MATCH (s:Symptom)-[:IS_ASSOCIATED_WITH]->(c:Condition)<-[:IS_ASSOCIATED_WITH]-(o:Symptom) \
             WHERE toLower(s.name) IN $symptoms AND s <> o \
             RETURN s.name AS symptom, o.name AS related, c.name AS shared",
            "MATCH (s:Symptom)-[:IS_RED_FLAG_FOR]->(c:Condition)<-[:IS_ASSOCIATED_WITH]-(o:Symptom) \
             WHERE toLower(s.name) IN $symptoms AND s <> o \
             RETURN s.name AS symptom, o.name AS related, c.name AS shared",
        ];

        let mut shared: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for cypher in queries {
            let q = neo4rs::query(cypher).param("symptoms", lowered.clone());
            let mut stream = graph
                .execute(q)
                .await
                .map_err(|e| BackendError::connection("graph", e.to_string()))?;

            while let Some(row) = stream
                .next()
                .await
                .map_err(|e| BackendError::other("graph", e.to_string()))?
            {
                let symptom: String = row.get("symptom").unwrap_or_default();
                let related: String = row.get("related").unwrap_or_default();
                let shared_condition: String = row.get("shared").unwrap_or_default();
                shared
                    .entry((symptom.to_lowercase(), related.to_lowercase()))
                    .or_default()
                    .insert(shared_condition);
            }
        }

        Ok(merge_and_rank(shared))
    }
}

/// Rewrite the Bolt URI to the self-signed-certificate scheme variant when
/// the graph is configured to trust all certificates.
fn rewrite_uri(config: &GraphConfig) -> String {
    if !config.trust_all_certs {
        return config.uri.clone();
    }
    if let Some(rest) = config.uri.strip_prefix("neo4j+s://") {
        format!("neo4j+ssc://{}", rest)
    } else if let Some(rest) = config.uri.strip_prefix("bolt+s://") {
        format!("bolt+ssc://{}", rest)
    } else {
        config.uri.clone()
    }
}

/// Merge `(symptom, related) -> shared conditions` into ranked relationships,
/// sorted by shared-condition count descending, truncated to 20.
fn merge_and_rank(
    shared: HashMap<(String, String), HashSet<String>>,
) -> Vec<SymptomRelationship> {
    let mut merged: BTreeMap<(String, String), HashSet<String>> = BTreeMap::new();
    for (key, conditions) in shared {
        merged.entry(key).or_default().extend(conditions);
    }

    let mut out: Vec<SymptomRelationship> = merged
        .into_iter()
        .map(|((symptom, related), conditions)| {
            let mut shared_conditions: Vec<String> = conditions.into_iter().collect();
            shared_conditions.sort();
            SymptomRelationship {
                symptom,
                related,
                shared_conditions,
            }
        })
        .collect();

    out.sort_by(|a, b| b.shared_conditions.len().cmp(&a.shared_conditions.len()));
    out.truncate(20);
    out
}

/// Curated in-memory graph used whenever the real graph is unreachable or
/// unconfigured. Covers the minimum scenarios exercised by the pipeline:
/// fever and chest pain as red flags, diabetes/hypertension contraindications
/// and safe actions, and one seeded city of providers.
struct FallbackGraph {
    red_flags: HashMap<String, Vec<String>>,
    contraindications: HashMap<String, Vec<String>>,
    safe_actions: HashMap<String, Vec<String>>,
    providers: HashMap<String, Vec<Provider>>,
}

impl FallbackGraph {
    fn seeded() -> Self {
        let mut red_flags = HashMap::new();
        red_flags.insert(
            "fever".to_string(),
            vec!["dengue".to_string(), "malaria".to_string()],
        );
        red_flags.insert(
            "chest pain".to_string(),
            vec!["heart disease".to_string()],
        );
        red_flags.insert(
            "shortness of breath".to_string(),
            vec!["heart disease".to_string(), "asthma".to_string()],
        );
        red_flags.insert(
            "severe headache".to_string(),
            vec!["hypertension".to_string()],
        );

        let mut contraindications = HashMap::new();
        contraindications.insert(
            "diabetes".to_string(),
            vec!["sugar-containing cough syrup".to_string()],
        );
        contraindications.insert(
            "hypertension".to_string(),
            vec!["decongestants".to_string(), "nsaids".to_string()],
        );

        let mut safe_actions = HashMap::new();
        safe_actions.insert(
            "diabetes".to_string(),
            vec!["regular blood sugar monitoring".to_string(), "low-glycemic diet".to_string()],
        );
        safe_actions.insert(
            "hypertension".to_string(),
            vec!["low-sodium diet".to_string(), "regular blood pressure checks".to_string()],
        );

        let mut providers = HashMap::new();
        providers.insert(
            "bengaluru".to_string(),
            vec![Provider {
                name: "City General Hospital".to_string(),
                specialty: "general medicine".to_string(),
                contact: "+91-80-0000-0000".to_string(),
            }],
        );
        providers.insert(
            "mumbai".to_string(),
            vec![Provider {
                name: "Mumbai Central Hospital".to_string(),
                specialty: "general medicine".to_string(),
                contact: "+91-22-0000-0000".to_string(),
            }],
        );

        Self {
            red_flags,
            contraindications,
            safe_actions,
            providers,
        }
    }

    fn red_flags(&self, symptoms: &[String]) -> Vec<RedFlagEntry> {
        symptoms
            .iter()
            .filter_map(|s| {
                let key = s.to_lowercase();
                self.red_flags.get(&key).map(|conditions| RedFlagEntry {
                    symptom: key,
                    conditions: conditions.clone(),
                })
            })
            .collect()
    }

    fn contraindications(&self, conditions: &[String]) -> Vec<ContraindicationEntry> {
        conditions
            .iter()
            .filter_map(|c| {
                let key = c.to_lowercase();
                self.contraindications
                    .get(&key)
                    .map(|medicines| ContraindicationEntry {
                        condition: key,
                        medicines: medicines.clone(),
                    })
            })
            .collect()
    }

    fn safe_actions(&self, conditions: &[String]) -> Vec<SafeActionEntry> {
        conditions
            .iter()
            .filter_map(|c| {
                let key = c.to_lowercase();
                self.safe_actions.get(&key).map(|actions| SafeActionEntry {
                    condition: key,
                    actions: actions.clone(),
                })
            })
            .collect()
    }

    fn providers(&self, city: &str) -> Vec<Provider> {
        self.providers.get(&city.to_lowercase()).cloned().unwrap_or_default()
    }

    fn related_symptoms(&self, symptoms: &[String]) -> Vec<SymptomRelationship> {
        let mut shared: HashMap<(String, String), HashSet<String>> = HashMap::new();
        let queried: HashSet<String> = symptoms.iter().map(|s| s.to_lowercase()).collect();

        for symptom in &queried {
            let Some(conditions) = self.red_flags.get(symptom) else {
                continue;
            };
            for (other, other_conditions) in &self.red_flags {
                if other == symptom {
                    continue;
                }
                let overlap: HashSet<String> = conditions
                    .iter()
                    .filter(|c| other_conditions.contains(*c))
                    .cloned()
                    .collect();
                if !overlap.is_empty() {
                    shared
                        .entry((symptom.clone(), other.clone()))
                        .or_default()
                        .extend(overlap);
                }
            }
        }

        merge_and_rank(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_serves_seeded_red_flags() {
        let gateway = GraphGateway::new(None);
        let entries = gateway.red_flags(&["Fever".to_string()]).await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].conditions.contains(&"dengue".to_string()));
    }

    #[tokio::test]
    async fn fallback_serves_contraindications_and_safe_actions() {
        let gateway = GraphGateway::new(None);
        let cond = vec!["diabetes".to_string()];
        assert_eq!(gateway.contraindications(&cond).await.len(), 1);
        assert_eq!(gateway.safe_actions(&cond).await.len(), 1);
    }

    #[tokio::test]
    async fn fallback_finds_providers_in_seeded_city() {
        let gateway = GraphGateway::new(None);
        let providers = gateway.providers("Bengaluru").await;
        assert_eq!(providers.len(), 1);
    }

    #[tokio::test]
    async fn fallback_empty_inputs_short_circuit() {
        let gateway = GraphGateway::new(None);
        assert!(gateway.red_flags(&[]).await.is_empty());
        assert!(gateway.providers("").await.is_empty());
    }

    #[test]
    fn merge_and_rank_sorts_by_shared_count_desc() {
        let mut shared = HashMap::new();
        shared.insert(
            ("a".to_string(), "b".to_string()),
            HashSet::from(["x".to_string()]),
        );
        shared.insert(
            ("c".to_string(), "d".to_string()),
            HashSet::from(["x".to_string(), "y".to_string()]),
        );
        let ranked = merge_and_rank(shared);
        assert_eq!(ranked[0].symptom, "c");
        assert_eq!(ranked[0].shared_conditions.len(), 2);
    }
}
