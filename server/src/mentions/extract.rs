//! Intent Extraction
//!
//! Trigger detection on inbound text and parsing of agent output into a
//! structured reply. Both are pure and total.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used when the agent output cannot be parsed.
pub const FALLBACK_MESSAGE: &str = "An error occurred, try again...";

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

/// Trigger decision and cleaned prompt for one mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub triggered: bool,
    pub prompt: String,
}

impl ExtractedIntent {
    fn not_triggered() -> Self {
        Self {
            triggered: false,
            prompt: String::new(),
        }
    }
}

/// Handle whose presence in a mention activates the bot.
#[derive(Debug, Clone)]
pub struct TriggerTag {
    tag: String,
    case_sensitive: bool,
}

impl TriggerTag {
    #[must_use]
    pub fn new(tag: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            tag: tag.into(),
            case_sensitive,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Finds the first occurrence of the tag.
    ///
    /// The prompt starts one character past the tag (the separator) and is
    /// trimmed. ASCII lowercasing keeps byte offsets identical, so the
    /// offsets found on the folded text are valid in the original.
    #[must_use]
    pub fn detect(&self, text: &str) -> ExtractedIntent {
        if self.tag.is_empty() {
            return ExtractedIntent::not_triggered();
        }

        let position = if self.case_sensitive {
            text.find(&self.tag)
        } else {
            text.to_ascii_lowercase()
                .find(&self.tag.to_ascii_lowercase())
        };

        let Some(position) = position else {
            return ExtractedIntent::not_triggered();
        };

        let rest = &text[position + self.tag.len()..];
        let separator = rest.chars().next().map_or(0, char::len_utf8);

        ExtractedIntent {
            triggered: true,
            prompt: rest[separator..].trim().to_string(),
        }
    }
}

/// Reply payload produced by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl StructuredReply {
    #[must_use]
    pub fn fallback(default_chain: &str) -> Self {
        Self {
            message: FALLBACK_MESSAGE.to_string(),
            token_address: None,
            chain: Some(default_chain.to_string()),
        }
    }
}

/// Parses agent output that should contain a JSON object, fenced or bare.
///
/// Never fails: anything that is not an object with a string `message`
/// yields [`StructuredReply::fallback`].
#[must_use]
pub fn parse_structured_output(raw: &str, default_chain: &str) -> StructuredReply {
    let candidate = JSON_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or_else(|| raw.trim(), |m| m.as_str().trim());

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => serde_json::from_value(value)
            .unwrap_or_else(|_| StructuredReply::fallback(default_chain)),
        _ => StructuredReply::fallback(default_chain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> TriggerTag {
        TriggerTag::new("@bot", true)
    }

    #[test]
    fn detects_tag_and_extracts_prompt() {
        let intent = bot().detect("hello @bot deploy FooCoin FOO");
        assert!(intent.triggered);
        assert_eq!(intent.prompt, "deploy FooCoin FOO");
    }

    #[test]
    fn missing_tag_is_not_triggered() {
        let intent = bot().detect("hello there, deploy FooCoin");
        assert!(!intent.triggered);
        assert!(intent.prompt.is_empty());
    }

    #[test]
    fn tag_at_end_gives_empty_prompt() {
        let intent = bot().detect("hey @bot");
        assert!(intent.triggered);
        assert_eq!(intent.prompt, "");

        let intent = bot().detect("hey @bot ");
        assert_eq!(intent.prompt, "");
    }

    #[test]
    fn separator_character_is_skipped_whatever_it_is() {
        // The character right after the tag is dropped even when not a space
        assert_eq!(bot().detect("@bot,deploy").prompt, "deploy");
        assert_eq!(bot().detect("@botXdeploy it").prompt, "deploy it");
    }

    #[test]
    fn first_occurrence_wins() {
        let intent = bot().detect("@bot ask @bot again");
        assert_eq!(intent.prompt, "ask @bot again");
    }

    #[test]
    fn multibyte_separator_does_not_panic() {
        let intent = bot().detect("@bot\u{00e9}t\u{00e9} launch");
        assert_eq!(intent.prompt, "t\u{00e9} launch");

        let intent = bot().detect("\u{1f680}@bot\u{1f680}go");
        assert_eq!(intent.prompt, "go");
    }

    #[test]
    fn case_sensitivity_is_configurable() {
        assert!(!bot().detect("hello @BOT deploy").triggered);

        let relaxed = TriggerTag::new("@Bot", false);
        let intent = relaxed.detect("hello @BOT Deploy FOO");
        assert!(intent.triggered);
        assert_eq!(intent.prompt, "Deploy FOO");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Sure!\n```json\n{\"message\":\"done\",\"tokenAddress\":\"0xabc\",\"chain\":\"base\"}\n```\nbye";
        let reply = parse_structured_output(raw, "baseSepolia");
        assert_eq!(
            reply,
            StructuredReply {
                message: "done".into(),
                token_address: Some("0xabc".into()),
                chain: Some("base".into()),
            }
        );
    }

    #[test]
    fn fenced_json_without_chain_keeps_chain_empty() {
        let raw = "```json\n{\"message\":\"ok\",\"tokenAddress\":\"0xabc\"}\n```";
        let reply = parse_structured_output(raw, "baseSepolia");
        assert_eq!(reply.message, "ok");
        assert_eq!(reply.token_address.as_deref(), Some("0xabc"));
        assert_eq!(reply.chain, None);
    }

    #[test]
    fn parses_bare_json() {
        let reply = parse_structured_output("  {\"message\":\"hi\"}  ", "baseSepolia");
        assert_eq!(reply.message, "hi");
        assert_eq!(reply.token_address, None);
        assert_eq!(reply.chain, None);
    }

    #[test]
    fn invalid_output_yields_fallback() {
        let expected = StructuredReply {
            message: "An error occurred, try again...".into(),
            token_address: None,
            chain: Some("baseSepolia".into()),
        };
        for raw in [
            "not json at all",
            "",
            "```json\n{broken\n```",
            "[\"message\"]",
            "{\"tokenAddress\":\"0xabc\"}",
            "{\"message\": 42}",
            "\"just a string\"",
        ] {
            assert_eq!(parse_structured_output(raw, "baseSepolia"), expected, "{raw}");
        }
    }

    #[test]
    fn fallback_uses_configured_chain() {
        let reply = parse_structured_output("nope", "base");
        assert_eq!(reply.chain.as_deref(), Some("base"));
    }

    #[test]
    fn fenced_reply_round_trips() {
        let replies = [
            StructuredReply {
                message: "Deployed FooCoin".into(),
                token_address: Some("0x1234".into()),
                chain: Some("base".into()),
            },
            StructuredReply {
                message: "multi\nline \"quoted\" text".into(),
                token_address: None,
                chain: None,
            },
        ];
        for reply in replies {
            let raw = format!(
                "Here you go:\n```json\n{}\n```",
                serde_json::to_string_pretty(&reply).unwrap()
            );
            assert_eq!(parse_structured_output(&raw, "baseSepolia"), reply);
        }
    }
}
