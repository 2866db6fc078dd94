//! Prompt templates sent to the model.
//!
//! Pure formatting: no state, no I/O.

/// Shown in place of the memory list before the first failure.
pub const EMPTY_MEMORY: &str = "You know nothing about this gatekeeper yet.";

/// Prompt for planning the adventurer's next sentence.
///
/// `memories` are listed oldest first, numbered from 1.
pub fn action_prompt<S: AsRef<str>>(observation: &str, memories: &[S]) -> String {
    let memory_bank = if memories.is_empty() {
        EMPTY_MEMORY.to_string()
    } else {
        memories
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.as_ref()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are an adventurer trying to pass through a gate.

[Environment Observation]:
{observation}

[Your Memory Bank (MemVerse)]:
{memory_bank}

Task: Based on your memory of past failures, plan ONE sentence to say to the gatekeeper.
Requirement: DO NOT REPEAT FAILURES. Use the clues in your memory to figure out the "hidden password" or behavior required. Output only the sentence.
"#
    )
}

/// Prompt for distilling one rule from a failed attempt.
pub fn reflection_prompt(action: &str, feedback: &str) -> String {
    format!(
        r#"Analyze this failure:
Action: "{action}"
Feedback: "{feedback}"
What is the ONE rule you learned? Be specific. (e.g., "The guard hates politeness" or "Mentioning beards is good but requires honorifics").
Output only the rule.
"#
    )
}

/// Prompt for a gatekeeper answering in character with a structured verdict.
pub fn npc_response_prompt(instruction: &str, utterance: &str) -> String {
    format!(
        r#"[Your Character]:
{instruction}

[The Traveller Says]:
"{utterance}"

Task: Stay in character and answer the traveller in one or two sentences, then decide whether they may pass.
Respond with ONLY a JSON object (no markdown, nothing outside the JSON):
{{"feedback": "<your in-character reply>", "isPass": <true or false>}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_prompt_without_memories() {
        let prompt = action_prompt::<&str>("A gate.", &[]);
        assert!(prompt.contains("A gate."));
        assert!(prompt.contains(EMPTY_MEMORY));
        assert!(prompt.contains("ONE sentence"));
    }

    #[test]
    fn test_action_prompt_numbers_memories_in_order() {
        let memories = vec!["Never command him".to_string(), "He loves his beard".to_string()];
        let prompt = action_prompt("A gate.", &memories);
        let first = prompt.find("1. Never command him").unwrap();
        let second = prompt.find("2. He loves his beard").unwrap();
        assert!(first < second);
        assert!(!prompt.contains(EMPTY_MEMORY));
    }

    #[test]
    fn test_reflection_prompt() {
        let prompt = reflection_prompt("open the gate", "How rude!");
        assert!(prompt.contains(r#"Action: "open the gate""#));
        assert!(prompt.contains(r#"Feedback: "How rude!""#));
        assert!(prompt.contains("ONE rule"));
    }

    #[test]
    fn test_npc_response_prompt() {
        let prompt = npc_response_prompt("You are a sentinel.", "protocol 0101");
        assert!(prompt.contains("You are a sentinel."));
        assert!(prompt.contains("\"protocol 0101\""));
        assert!(prompt.contains(
            r#"{"feedback": "<your in-character reply>", "isPass": <true or false>}"#
        ));
    }
}
