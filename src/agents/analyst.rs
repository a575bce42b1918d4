use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::findings::EvidenceFindings;
use super::parse::{extract_object, string_field, string_list};
use super::prompts;
use crate::curate::types::CurationRecord;
use crate::llm::{preview, CompletionClient};
use crate::state::AgentProfile;

/// Closed set of recommendation tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    StrongBuild,
    BuildMvp,
    ReEvaluate,
    Deprioritize,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::StrongBuild,
        Tier::BuildMvp,
        Tier::ReEvaluate,
        Tier::Deprioritize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::StrongBuild => "STRONG_BUILD",
            Tier::BuildMvp => "BUILD_MVP",
            Tier::ReEvaluate => "RE_EVALUATE",
            Tier::Deprioritize => "DEPRIORITIZE",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tier::StrongBuild => "High confidence: build now.",
            Tier::BuildMvp => "Moderate confidence: start lean, validate quickly.",
            Tier::ReEvaluate => "Mixed signals: gather more data before committing.",
            Tier::Deprioritize => "Insufficient support: focus resources elsewhere.",
        }
    }

    /// Parse a model-supplied tier. Anything outside the set becomes
    /// `ReEvaluate`; the flag reports whether coercion happened.
    pub fn coerce(raw: Option<&str>) -> (Tier, bool) {
        match raw.map(str::parse::<Tier>) {
            Some(Ok(tier)) => (tier, false),
            _ => (Tier::ReEvaluate, true),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown recommendation tier '{}'", s))
    }
}

/// Where a decision-tree answer leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(&'static str),
    Tier(Tier),
}

impl Serialize for Next {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Next::Node(id) => s.serialize_str(id),
            Next::Tier(t) => s.serialize_str(t.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionNode {
    pub id: &'static str,
    pub question: &'static str,
    pub yes: Next,
    pub no: Next,
}

/// The fixed decision tree. Traversal starts at the first node.
pub static DECISION_TREE: [DecisionNode; 3] = [
    DecisionNode {
        id: "USER_DEMAND",
        question: "Is there significant, evidence-backed user demand for this feature?",
        yes: Next::Node("COMPETITOR_LANDSCAPE"),
        no: Next::Tier(Tier::Deprioritize),
    },
    DecisionNode {
        id: "COMPETITOR_LANDSCAPE",
        question: "Do competitors already offer a clearly superior version of this feature?",
        yes: Next::Node("DIFFERENTIATOR"),
        no: Next::Tier(Tier::BuildMvp),
    },
    DecisionNode {
        id: "DIFFERENTIATOR",
        question: "Can we offer a unique differentiator (e.g. AI personalization, total-price transparency)?",
        yes: Next::Tier(Tier::StrongBuild),
        no: Next::Tier(Tier::ReEvaluate),
    },
];

pub fn node(id: &str) -> Option<&'static DecisionNode> {
    DECISION_TREE.iter().find(|n| n.id == id)
}

/// Walk the tree with yes/no answers keyed by node id. Returns the tier a
/// complete walk reaches, or `None` when an answer along the way is missing.
pub fn resolve(answer: impl Fn(&str) -> Option<bool>) -> Option<Tier> {
    let mut current = &DECISION_TREE[0];
    // Bounded by the node count, which also rules out cycles.
    for _ in 0..DECISION_TREE.len() {
        let next = if answer(current.id)? { current.yes } else { current.no };
        match next {
            Next::Tier(t) => return Some(t),
            Next::Node(id) => current = node(id)?,
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroMacroPair {
    pub micro: String,
    #[serde(rename = "macro")]
    pub macro_trend: String,
    pub insight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub id: Option<String>,
    pub question: String,
    pub answer: String,
}

impl PathStep {
    /// Interpret the answer as yes/no when it starts with one.
    pub fn verdict(&self) -> Option<bool> {
        let a = self.answer.trim().to_lowercase();
        if a.starts_with("yes") {
            Some(true)
        } else if a.starts_with("no") {
            Some(false)
        } else {
            None
        }
    }
}

/// The analyst's synthesis. `tier` is always a member of the closed set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRecord {
    pub tier: Tier,
    pub micro_macro_pairs: Vec<MicroMacroPair>,
    pub decision_tree_path: Vec<PathStep>,
    pub supporting_summary: Vec<String>,
    pub skeptic_rebuttal: Vec<String>,
    pub final_recommendation: String,
    /// Shape problems found while reading the model's reply.
    pub warnings: Vec<String>,
}

pub const REQUIRED_KEYS: [&str; 6] = [
    "recommendation_tier",
    "micro_macro_pairs",
    "decision_tree_path",
    "supporting_summary",
    "skeptic_rebuttal",
    "final_recommendation",
];

impl SynthesisRecord {
    /// Read the model's object leniently. Missing keys and an unknown tier
    /// are recorded as warnings, never errors.
    pub fn from_model(obj: &Map<String, Value>) -> Self {
        let mut warnings = Vec::new();

        let missing: Vec<&str> = REQUIRED_KEYS
            .into_iter()
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            warnings.push(format!("missing keys: {}", missing.join(", ")));
        }

        let raw_tier = obj.get("recommendation_tier").and_then(Value::as_str);
        let (tier, coerced) = Tier::coerce(raw_tier);
        if coerced {
            warnings.push(format!(
                "unexpected recommendation_tier '{}', defaulted to {}",
                raw_tier.unwrap_or("<none>"),
                Tier::ReEvaluate
            ));
        }

        let micro_macro_pairs = array(obj, "micro_macro_pairs")
            .iter()
            .filter(|p| p.is_object())
            .map(|p| MicroMacroPair {
                micro: string_field(p, "micro").unwrap_or_default(),
                macro_trend: string_field(p, "macro").unwrap_or_default(),
                insight: string_field(p, "insight").unwrap_or_default(),
            })
            .collect();

        let decision_tree_path = array(obj, "decision_tree_path")
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Value::Object(_) => Some(PathStep {
                    id: string_field(s, "id"),
                    question: string_field(s, "question")
                        .or_else(|| string_field(s, "id"))
                        .unwrap_or_else(|| format!("Step {}", i + 1)),
                    answer: string_field(s, "answer")
                        .or_else(|| string_field(s, "result"))
                        .unwrap_or_default(),
                }),
                Value::String(q) => Some(PathStep {
                    id: None,
                    question: q.clone(),
                    answer: String::new(),
                }),
                _ => None,
            })
            .collect();

        Self {
            tier,
            micro_macro_pairs,
            decision_tree_path,
            supporting_summary: string_list(obj.get("supporting_summary")),
            skeptic_rebuttal: string_list(obj.get("skeptic_rebuttal")),
            final_recommendation: string_list(obj.get("final_recommendation")).join(" "),
            warnings,
        }
    }

    /// The tier the recorded path leads to, when every step names its node.
    pub fn path_tier(&self) -> Option<Tier> {
        resolve(|id| {
            self.decision_tree_path
                .iter()
                .find(|s| s.id.as_deref() == Some(id))
                .and_then(PathStep::verdict)
        })
    }
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match obj.get(key) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

/// Stage 3: merges both evidence sets through the decision tree.
pub struct Analyst {
    llm: CompletionClient,
    profile: AgentProfile,
}

impl Analyst {
    pub fn new(llm: CompletionClient, profile: AgentProfile) -> Self {
        Self { llm, profile }
    }

    pub async fn synthesize(
        &self,
        hypothesis: &str,
        curated: &CurationRecord,
        supporting: &EvidenceFindings,
        refuting: &EvidenceFindings,
    ) -> Result<SynthesisRecord> {
        info!(hypothesis = preview(hypothesis, 120), "Analyst starting synthesis");

        let supporting_json = supporting.to_prompt_json(2500);
        let refuting_json = refuting.to_prompt_json(2500);
        info!(
            researcher_chars = supporting_json.len(),
            skeptic_chars = refuting_json.len(),
            "Analyst context sizes"
        );

        let user = prompts::analyst_user(
            hypothesis,
            &curated.prompt_context(2000),
            &supporting_json,
            &refuting_json,
            &decision_tree_json(),
            &tiers_json(),
        )?;

        let raw = self
            .llm
            .complete_with(&self.profile, prompts::ANALYST_SYSTEM, &user, 6000)
            .await?;
        let obj = extract_object(&raw)?;
        let record = SynthesisRecord::from_model(&obj);

        for w in &record.warnings {
            warn!(warning = %w, "Analyst output shape");
        }
        if let Some(path_tier) = record.path_tier() {
            if path_tier != record.tier {
                warn!(
                    chosen = %record.tier,
                    path = %path_tier,
                    "Recommendation tier disagrees with the recorded decision path"
                );
            }
        }
        info!(tier = %record.tier, "Analyst finished");
        Ok(record)
    }
}

pub fn decision_tree_json() -> String {
    serde_json::to_string_pretty(&DECISION_TREE).unwrap_or_default()
}

pub fn tiers_json() -> String {
    let map: Map<String, Value> = Tier::ALL
        .into_iter()
        .map(|t| (t.as_str().to_string(), Value::String(t.description().to_string())))
        .collect();
    serde_json::to_string_pretty(&map).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::agents::findings::Polarity;
    use crate::llm::testing::*;
    use crate::state::PipelineConfig;
    use serde_json::json;

    fn mock_response() -> Value {
        json!({
            "recommendation_tier": "STRONG_BUILD",
            "micro_macro_pairs": [{
                "micro": "Users want price comparison",
                "macro": "AI personalization is dominant in travel e-commerce",
                "insight": "Feature fits within a major market trend."
            }],
            "decision_tree_path": [
                {"id": "USER_DEMAND", "question": "Significant user demand?", "answer": "Yes"},
                {"id": "COMPETITOR_LANDSCAPE", "question": "Superior competitor feature?", "answer": "Yes"},
                {"id": "DIFFERENTIATOR", "question": "Unique differentiator?", "answer": "Yes, personalization"}
            ],
            "supporting_summary": "Strong survey demand and market opportunity.",
            "skeptic_rebuttal": "Addressed: cost concern outweighed by revenue potential.",
            "final_recommendation": "Build a price comparison tool with AI-driven personalization."
        })
    }

    fn empty_findings(side: Polarity) -> EvidenceFindings {
        EvidenceFindings::from_model(side, Map::new(), &[])
    }

    async fn analyze(reply: &str) -> Result<SynthesisRecord> {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replies(&[reply]));
        let llm = CompletionClient::new(Some(backend), test_context(dir.path()), "analyst", fast_retry());
        Analyst::new(llm, PipelineConfig::default().analyst)
            .synthesize(
                "Add a comparison tool",
                &CurationRecord::default(),
                &empty_findings(Polarity::Supporting),
                &empty_findings(Polarity::Refuting),
            )
            .await
    }

    #[test]
    fn test_tree_transitions_are_valid_and_acyclic() {
        let ids: HashSet<&str> = DECISION_TREE.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), DECISION_TREE.len());
        for n in &DECISION_TREE {
            for next in [n.yes, n.no] {
                if let Next::Node(id) = next {
                    assert!(ids.contains(id), "{} points at unknown node {}", n.id, id);
                    let from = DECISION_TREE.iter().position(|m| m.id == n.id).unwrap();
                    let to = DECISION_TREE.iter().position(|m| m.id == id).unwrap();
                    assert!(to > from, "edge {} -> {} goes backwards", n.id, id);
                }
            }
        }
    }

    #[test]
    fn test_resolve_every_leaf() {
        let answers = |d: bool, c: bool, x: bool| {
            move |id: &str| match id {
                "USER_DEMAND" => Some(d),
                "COMPETITOR_LANDSCAPE" => Some(c),
                "DIFFERENTIATOR" => Some(x),
                _ => None,
            }
        };
        assert_eq!(resolve(answers(false, true, true)), Some(Tier::Deprioritize));
        assert_eq!(resolve(answers(true, false, true)), Some(Tier::BuildMvp));
        assert_eq!(resolve(answers(true, true, true)), Some(Tier::StrongBuild));
        assert_eq!(resolve(answers(true, true, false)), Some(Tier::ReEvaluate));
        assert_eq!(resolve(|_| None), None);
    }

    #[test]
    fn test_tree_json_uses_tier_labels() {
        let v: Value = serde_json::from_str(&decision_tree_json()).unwrap();
        assert_eq!(v[0]["no"], "DEPRIORITIZE");
        assert_eq!(v[0]["yes"], "COMPETITOR_LANDSCAPE");
        assert_eq!(v[2]["yes"], "STRONG_BUILD");
    }

    #[test]
    fn test_coerce_garbage_tiers() {
        for raw in [Some("INVALID_TIER"), Some(""), Some("strong_build"), None] {
            let (tier, coerced) = Tier::coerce(raw);
            assert_eq!(tier, Tier::ReEvaluate);
            assert!(coerced);
        }
        assert_eq!(Tier::coerce(Some("BUILD_MVP")), (Tier::BuildMvp, false));
    }

    #[tokio::test]
    async fn test_analyst_returns_valid_tier() {
        let rec = analyze(&mock_response().to_string()).await.unwrap();
        assert_eq!(rec.tier, Tier::StrongBuild);
        assert!(rec.warnings.is_empty());
        assert_eq!(rec.micro_macro_pairs[0].micro, "Users want price comparison");
        assert_eq!(rec.decision_tree_path.len(), 3);
        assert_eq!(rec.supporting_summary.len(), 1);
        assert_eq!(rec.path_tier(), Some(Tier::StrongBuild));
    }

    #[tokio::test]
    async fn test_bad_tier_defaults_to_re_evaluate() {
        let mut v = mock_response();
        v["recommendation_tier"] = json!("INVALID_TIER");
        let rec = analyze(&v.to_string()).await.unwrap();
        assert_eq!(rec.tier, Tier::ReEvaluate);
        assert!(rec.warnings.iter().any(|w| w.contains("INVALID_TIER")));
    }

    #[tokio::test]
    async fn test_missing_keys_are_tolerated() {
        let rec = analyze(r#"{"recommendation_tier": 42}"#).await.unwrap();
        assert_eq!(rec.tier, Tier::ReEvaluate);
        assert!(rec.warnings[0].contains("micro_macro_pairs"));
        assert!(rec.micro_macro_pairs.is_empty());
        assert!(rec.final_recommendation.is_empty());
    }

    #[tokio::test]
    async fn test_tier_always_in_closed_set() {
        let replies = [
            r#"{"recommendation_tier": null}"#,
            r#"{"recommendation_tier": ["STRONG_BUILD"]}"#,
            r#"{"recommendation_tier": "DEPRIORITIZE", "decision_tree_path": "garbage"}"#,
            r#"{"micro_macro_pairs": [1, "x", {"micro": 5}]}"#,
        ];
        for reply in replies {
            let rec = analyze(reply).await.unwrap();
            assert!(Tier::ALL.contains(&rec.tier));
        }
    }

    #[tokio::test]
    async fn test_non_json_reply_is_fatal() {
        assert!(analyze("The answer is STRONG_BUILD").await.is_err());
    }
}
