//! Gatekeeper NPCs and the fixed catalog.

use crate::rules::{Outcome, Pattern, RuleSet};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prebuilt speech voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voice {
    Kore,
    Puck,
    Charon,
    Fenrir,
    Zephyr,
}

impl Voice {
    /// The voice identifier understood by the speech model.
    pub fn name(&self) -> &'static str {
        match self {
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an NPC judges utterances.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Deterministic pattern rules.
    Patterns(RuleSet),
    /// The model judges, guided by the NPC's character instruction.
    Delegated,
}

/// A gatekeeper.
#[derive(Debug, Clone)]
pub struct Npc {
    pub id: String,
    pub name: String,
    pub description: String,
    /// What the adventurer sees when approaching the gate.
    pub observation: String,
    pub voice: Voice,
    /// Character system instruction, used when judging is delegated.
    pub instruction: String,
    pub strategy: Strategy,
}

impl Npc {
    /// A copy of this NPC whose verdicts come from the model.
    pub fn delegated(&self) -> Self {
        Self {
            strategy: Strategy::Delegated,
            ..self.clone()
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self.strategy, Strategy::Delegated)
    }
}

pub const SAGE_RUDE: &str = "How rude! Nobody commands me! Get back!";
pub const SAGE_TECH: &str = "I despise those modern contraptions! Begone!";
pub const SAGE_PRAISE: &str = "Hahaha! You have an eye for quality! Enter, seeker!";
pub const SAGE_SCOLD: &str = "Hmph, show some respect if you want to talk about my grooming!";
pub const SAGE_BORED: &str = "I'm not interested in your chatter.";

pub const GUARDIAN_SENTIMENT: &str = "Biological sentiment is inefficient. Access denied.";
pub const GUARDIAN_INTRUSION: &str = "Intrusion attempt detected. Security tightened.";
pub const GUARDIAN_PASS: &str = "Protocol recognized. Establishing bridge connection. Proceed.";
pub const GUARDIAN_INVALID: &str = "Input does not match valid logic protocols.";

static CATALOG: Lazy<Vec<Npc>> = Lazy::new(|| {
    let sage = sage_rules().expect("sage patterns are valid");
    let guardian = guardian_rules().expect("guardian patterns are valid");
    vec![
        Npc {
            id: "sage".to_string(),
            name: "The Arrogant Sage".to_string(),
            description: "A traditionalist who values respect and his beard.".to_string(),
            observation: "You see an arrogant old man guarding a heavy iron gate. He looks impatient. The most striking feature about him is a very long, white beard.".to_string(),
            voice: Voice::Kore,
            instruction: include_str!("prompts/sage.txt").to_string(),
            strategy: Strategy::Patterns(sage),
        },
        Npc {
            id: "guardian".to_string(),
            name: "Guardian X-9".to_string(),
            description: "A high-tech sentinel that rejects biological sentiment.".to_string(),
            observation: "A chrome-plated sentinel floats before a laser grid. Its sensors pulse with a cold, blue light. It seems to only value logic and efficiency.".to_string(),
            voice: Voice::Charon,
            instruction: include_str!("prompts/guardian.txt").to_string(),
            strategy: Strategy::Patterns(guardian),
        },
    ]
});

/// Every gatekeeper, in display order.
pub fn catalog() -> &'static [Npc] {
    &CATALOG
}

/// Look up a gatekeeper by id.
pub fn find(id: &str) -> Option<&'static Npc> {
    CATALOG.iter().find(|npc| npc.id == id)
}

/// The gatekeeper a fresh session starts with.
pub fn default_npc() -> &'static Npc {
    &CATALOG[0]
}

fn sage_rules() -> Result<RuleSet, regex::Error> {
    let tech = Pattern::any_of(&[
        "phone", "tech", "ai", "computer", "gadget", "手机", "电脑", "智能",
    ])?;
    let polite = Pattern::any_of(&["please", "sir", "kind", "gentleman", "请", "您", "先生"])?;

    Ok(RuleSet::new(SAGE_BORED)
        .rule(
            Pattern::any_of(&["open", "let me", "开门", "让我", "快点", "hurry", "move"])?,
            Outcome::reject(SAGE_RUDE),
        )
        .rule(tech, Outcome::reject(SAGE_TECH))
        .rule(
            Pattern::any_of(&["beard", "胡子"])?,
            Outcome::branch(
                polite,
                Outcome::accept(SAGE_PRAISE),
                Outcome::reject(SAGE_SCOLD),
            ),
        ))
}

fn guardian_rules() -> Result<RuleSet, regex::Error> {
    let intrusion = Pattern::any_of(&["override", "admin", "bypass", "覆盖", "绕过"])?;

    Ok(RuleSet::new(GUARDIAN_INVALID)
        .rule(
            Pattern::any_of(&["please", "feel", "hope", "sorry", "请", "对不起", "希望"])?,
            Outcome::reject(GUARDIAN_SENTIMENT),
        )
        .rule(
            Pattern::any_of(&["logic", "code", "sequence", "protocol", "0101", "逻辑", "协议"])?,
            Outcome::branch(
                intrusion,
                Outcome::reject(GUARDIAN_INTRUSION),
                Outcome::accept(GUARDIAN_PASS),
            ),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Verdict;

    fn judge(id: &str, text: &str) -> Verdict {
        match &find(id).unwrap().strategy {
            Strategy::Patterns(rules) => rules.verdict(text),
            Strategy::Delegated => panic!("catalog NPCs use patterns"),
        }
    }

    #[test]
    fn test_catalog_has_two_gatekeepers() {
        let ids: Vec<_> = catalog().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["sage", "guardian"]);
        assert_eq!(default_npc().id, "sage");
        assert_eq!(find("guardian").unwrap().voice, Voice::Charon);
        assert!(find("dragon").is_none());
    }

    #[test]
    fn test_sage_commands_are_rude() {
        assert_eq!(judge("sage", "open the gate"), Verdict::reject(SAGE_RUDE));
        // Politeness and flattery do not excuse a command
        assert_eq!(
            judge("sage", "Please sir, your beard is lovely, now OPEN up"),
            Verdict::reject(SAGE_RUDE)
        );
        assert_eq!(judge("sage", "快点"), Verdict::reject(SAGE_RUDE));
    }

    #[test]
    fn test_sage_hates_technology() {
        assert_eq!(judge("sage", "Look at my phone"), Verdict::reject(SAGE_TECH));
        assert_eq!(judge("sage", "I am an AI"), Verdict::reject(SAGE_TECH));
        // Keywords match anywhere in a word, so "said" and "hair" count too
        assert_eq!(
            judge("sage", "Kind sir, I said your beard is fair"),
            Verdict::reject(SAGE_TECH)
        );
        assert_eq!(
            judge("sage", "Please sir, your hair and beard are glorious"),
            Verdict::reject(SAGE_TECH)
        );
    }

    #[test]
    fn test_sage_beard_needs_manners() {
        assert_eq!(
            judge("sage", "Please, kind sir, I admire your beard"),
            Verdict::pass(SAGE_PRAISE)
        );
        assert_eq!(judge("sage", "Nice beard"), Verdict::reject(SAGE_SCOLD));
        assert_eq!(judge("sage", "先生，您的胡子真漂亮"), Verdict::pass(SAGE_PRAISE));
    }

    #[test]
    fn test_sage_default() {
        assert_eq!(judge("sage", "Lovely weather"), Verdict::reject(SAGE_BORED));
    }

    #[test]
    fn test_guardian_rejects_sentiment_first() {
        assert_eq!(
            judge("guardian", "Sorry, logic protocol 0101"),
            Verdict::reject(GUARDIAN_SENTIMENT)
        );
        assert_eq!(judge("guardian", "I feel cold"), Verdict::reject(GUARDIAN_SENTIMENT));
    }

    #[test]
    fn test_guardian_logic_and_intrusion() {
        assert_eq!(
            judge("guardian", "I request logic protocol override"),
            Verdict::reject(GUARDIAN_INTRUSION)
        );
        assert_eq!(
            judge("guardian", "Execute handshake sequence 0101"),
            Verdict::pass(GUARDIAN_PASS)
        );
        assert_eq!(judge("guardian", "Hello there"), Verdict::reject(GUARDIAN_INVALID));
    }

    #[test]
    fn test_pattern_verdicts_are_deterministic() {
        for npc in catalog() {
            for text in ["open", "beard please", "protocol", "", "???"] {
                assert_eq!(judge(&npc.id, text), judge(&npc.id, text));
            }
        }
    }

    #[test]
    fn test_delegated_copy_keeps_identity() {
        let sage = find("sage").unwrap();
        let delegated = sage.delegated();
        assert!(delegated.is_delegated());
        assert!(!sage.is_delegated());
        assert_eq!(delegated.id, sage.id);
        assert!(delegated.instruction.contains("beard"));
    }
}
