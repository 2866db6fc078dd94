//! Rule engine for gatekeeper verdicts.
//!
//! A gatekeeper judges each utterance with one of two interchangeable
//! evaluators:
//! - [`RuleSet`]: ordered, case-insensitive pattern rules (deterministic)
//! - [`DelegatedEvaluator`]: the NPC's character instruction is handed to the
//!   model gateway, which must answer with a structured [`Verdict`]
//!
//! [`evaluate`] picks the evaluator from the NPC's [`Strategy`].

use crate::gateway::{GatewayError, ModelGateway};
use crate::npc::{Npc, Strategy};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Feedback used when a delegated verdict cannot be understood.
pub const UNPROCESSABLE_FEEDBACK: &str = "The gatekeeper cannot process your words.";

/// The outcome of judging one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// What the gatekeeper says back.
    pub feedback: String,
    /// Whether the gate opens.
    pub is_pass: bool,
}

impl Verdict {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            is_pass: true,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            is_pass: false,
        }
    }

    /// The rejection returned when a structured response is malformed.
    pub fn unprocessable() -> Self {
        Self::reject(UNPROCESSABLE_FEEDBACK)
    }

    /// JSON schema the model must follow when answering in character.
    pub fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "feedback": {
                    "type": "STRING",
                    "description": "What the gatekeeper says to the traveller, in character."
                },
                "isPass": {
                    "type": "BOOLEAN",
                    "description": "True only if the traveller may pass."
                }
            },
            "required": ["feedback", "isPass"]
        })
    }

    /// Parse a structured model answer, falling back to [`Verdict::unprocessable`].
    ///
    /// Accepts bare JSON or JSON wrapped in a markdown code fence.
    pub fn parse_or_reject(text: &str) -> Self {
        let json_str = extract_json(text);
        match serde_json::from_str::<Verdict>(json_str) {
            Ok(verdict) if !verdict.feedback.trim().is_empty() => verdict,
            Ok(_) => {
                warn!("structured verdict had empty feedback");
                Self::unprocessable()
            }
            Err(e) => {
                warn!(error = %e, "could not parse structured verdict");
                Self::unprocessable()
            }
        }
    }
}

/// A case-insensitive trigger.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Compile a pattern from regex source. Matching ignores case.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map(Self)
    }

    /// Match any of the given literal keywords, anywhere in the text.
    pub fn any_of(keywords: &[&str]) -> Result<Self, regex::Error> {
        let source = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        Self::new(&source)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// What happens when a rule's trigger matches.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept(String),
    Reject(String),
    /// A nested test, e.g. "talks about the beard, but politely?"
    Branch {
        when: Pattern,
        then: Box<Outcome>,
        otherwise: Box<Outcome>,
    },
}

impl Outcome {
    pub fn accept(feedback: impl Into<String>) -> Self {
        Outcome::Accept(feedback.into())
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Outcome::Reject(feedback.into())
    }

    pub fn branch(when: Pattern, then: Outcome, otherwise: Outcome) -> Self {
        Outcome::Branch {
            when,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    fn resolve(&self, text: &str) -> Verdict {
        match self {
            Outcome::Accept(feedback) => Verdict::pass(feedback.clone()),
            Outcome::Reject(feedback) => Verdict::reject(feedback.clone()),
            Outcome::Branch {
                when,
                then,
                otherwise,
            } => {
                if when.is_match(text) {
                    then.resolve(text)
                } else {
                    otherwise.resolve(text)
                }
            }
        }
    }
}

/// One prioritized rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub trigger: Pattern,
    pub outcome: Outcome,
}

/// Ordered rules plus a default rejection. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    fallback: String,
}

impl RuleSet {
    /// Create an empty rule set that rejects everything with `fallback`.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
        }
    }

    /// Append a rule with lower priority than every rule added before it.
    pub fn rule(mut self, trigger: Pattern, outcome: Outcome) -> Self {
        self.rules.push(Rule { trigger, outcome });
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Judge an utterance. Pure: the same input always yields the same verdict.
    pub fn verdict(&self, utterance: &str) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.trigger.is_match(utterance))
            .map(|rule| rule.outcome.resolve(utterance))
            .unwrap_or_else(|| Verdict::reject(self.fallback.clone()))
    }
}

/// Something that can judge an utterance on behalf of a gatekeeper.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, utterance: &str) -> Result<Verdict, GatewayError>;
}

#[async_trait]
impl Evaluator for RuleSet {
    async fn evaluate(&self, utterance: &str) -> Result<Verdict, GatewayError> {
        Ok(self.verdict(utterance))
    }
}

/// Judges by asking the model to answer in character.
pub struct DelegatedEvaluator<'a> {
    gateway: &'a dyn ModelGateway,
    instruction: &'a str,
}

impl<'a> DelegatedEvaluator<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, instruction: &'a str) -> Self {
        Self {
            gateway,
            instruction,
        }
    }
}

#[async_trait]
impl<'a> Evaluator for DelegatedEvaluator<'a> {
    async fn evaluate(&self, utterance: &str) -> Result<Verdict, GatewayError> {
        self.gateway
            .generate_npc_response(self.instruction, utterance)
            .await
    }
}

/// Judge `utterance` with the evaluator the NPC is configured for.
pub async fn evaluate(
    npc: &Npc,
    utterance: &str,
    gateway: &dyn ModelGateway,
) -> Result<Verdict, GatewayError> {
    let delegated;
    let evaluator: &dyn Evaluator = match &npc.strategy {
        Strategy::Patterns(rules) => rules,
        Strategy::Delegated => {
            delegated = DelegatedEvaluator::new(gateway, &npc.instruction);
            &delegated
        }
    };

    let verdict = evaluator.evaluate(utterance).await?;
    debug!(npc = %npc.id, is_pass = verdict.is_pass, "utterance judged");
    Ok(verdict)
}

/// Extract JSON from a response that might have markdown code blocks.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door_rules() -> RuleSet {
        RuleSet::new("Nothing happens.")
            .rule(
                Pattern::any_of(&["kick"]).unwrap(),
                Outcome::reject("Ouch."),
            )
            .rule(
                Pattern::any_of(&["knock"]).unwrap(),
                Outcome::branch(
                    Pattern::any_of(&["gently"]).unwrap(),
                    Outcome::accept("Come in."),
                    Outcome::reject("Too loud."),
                ),
            )
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let verdict = door_rules().verdict("I knock, then kick the door");
        assert_eq!(verdict, Verdict::reject("Ouch."));
    }

    #[test]
    fn test_branch_outcomes() {
        let rules = door_rules();
        assert_eq!(rules.verdict("I knock gently"), Verdict::pass("Come in."));
        assert_eq!(rules.verdict("I KNOCK"), Verdict::reject("Too loud."));
    }

    #[test]
    fn test_fallback_rejection() {
        let verdict = door_rules().verdict("I wait");
        assert!(!verdict.is_pass);
        assert_eq!(verdict.feedback, "Nothing happens.");
    }

    #[test]
    fn test_keywords_are_literal() {
        let pattern = Pattern::any_of(&["a.b"]).unwrap();
        assert!(pattern.is_match("A.B"));
        assert!(!pattern.is_match("axb"));
    }

    #[test]
    fn test_verdict_wire_names() {
        let value = serde_json::to_value(Verdict::pass("Proceed.")).unwrap();
        assert_eq!(value["isPass"], true);
        assert_eq!(value["feedback"], "Proceed.");

        let schema = Verdict::response_schema();
        assert_eq!(schema["required"], serde_json::json!(["feedback", "isPass"]));
    }

    #[test]
    fn test_parse_or_reject_plain_and_fenced() {
        let plain = r#"{"feedback": "Proceed.", "isPass": true}"#;
        assert_eq!(Verdict::parse_or_reject(plain), Verdict::pass("Proceed."));

        let fenced = "```json\n{\"feedback\": \"No.\", \"isPass\": false}\n```";
        assert_eq!(Verdict::parse_or_reject(fenced), Verdict::reject("No."));
    }

    #[test]
    fn test_parse_or_reject_falls_back() {
        assert_eq!(Verdict::parse_or_reject("I shall think"), Verdict::unprocessable());
        assert_eq!(
            Verdict::parse_or_reject(r#"{"feedback": "yes"}"#),
            Verdict::unprocessable()
        );
        assert_eq!(
            Verdict::parse_or_reject(r#"{"feedback": " ", "isPass": true}"#),
            Verdict::unprocessable()
        );
    }

    #[tokio::test]
    async fn test_rule_set_as_evaluator() {
        let rules = door_rules();
        let evaluator: &dyn Evaluator = &rules;
        let verdict = evaluator.evaluate("knock gently").await.unwrap();
        assert!(verdict.is_pass);
    }
}
