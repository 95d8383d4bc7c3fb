//! Type definitions for reasoning-engine interactions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pricing::{CostEvent, Pricing};
use arbor_core::Usd;

/// Claude model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    /// Get the API model name
    pub fn api_name(&self) -> &'static str {
        match self {
            Model::Opus => "claude-opus-4-20250514",
            Model::Sonnet => "claude-sonnet-4-5-20250929",
            Model::Haiku => "claude-3-5-haiku-20241022",
        }
    }

    /// Per-million-token prices for this model
    pub fn pricing(&self) -> Pricing {
        match self {
            Model::Opus => Pricing::flat(Usd::from_dollars(15), Usd::from_dollars(75)),
            Model::Sonnet => Pricing::tiered(
                Usd::from_dollars(3),
                Usd::from_dollars(15),
                Usd::from_dollars(6),
                Usd::from_cents(2250),
            ),
            Model::Haiku => Pricing::flat(Usd::from_cents(80), Usd::from_dollars(4)),
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Opus => write!(f, "opus"),
            Model::Sonnet => write!(f, "sonnet"),
            Model::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            // Accept full API names too
            _ if lower.contains("opus") => Ok(Model::Opus),
            _ if lower.contains("sonnet") => Ok(Model::Sonnet),
            _ if lower.contains("haiku") => Ok(Model::Haiku),
            _ => Err(format!("Invalid model: {}. Use opus, sonnet, or haiku.", s)),
        }
    }
}

/// Token usage for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Thinking tokens billed separately from `output_tokens`.
    /// Providers that fold thinking into output report zero here.
    #[serde(default)]
    pub thinking_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            thinking_tokens: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content, in the Anthropic wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Rough character count, used for token estimates
    pub fn approx_chars(&self) -> usize {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::Thinking { thinking, .. } => thinking.len(),
                ContentBlock::RedactedThinking { data } => data.len(),
                ContentBlock::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content.len(),
            })
            .sum()
    }
}

/// Tool description advertised to the reasoning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A full reasoning request
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub model: Model,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

impl ReasoningRequest {
    /// Input token estimate at roughly four characters per token
    pub fn estimated_input_tokens(&self) -> u64 {
        let chars = self.system.len()
            + self.messages.iter().map(Message::approx_chars).sum::<usize>()
            + self
                .tools
                .iter()
                .map(|t| t.name.len() + t.description.len() + t.input_schema.to_string().len())
                .sum::<usize>();
        (chars / 4) as u64 + 1
    }

    /// Output plus thinking tokens the call is allowed to bill
    pub fn max_billable_output_tokens(&self) -> u64 {
        u64::from(self.max_tokens) + u64::from(self.thinking_budget.unwrap_or(0))
    }
}

/// Tool-use block extracted from a response
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A reasoning response with its cost receipt
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
    pub cost: CostEvent,
}

impl ReasoningResponse {
    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Concatenated thinking blocks
    pub fn thinking(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool-use blocks in the order received
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_api_names() {
        assert_eq!(Model::Opus.api_name(), "claude-opus-4-20250514");
        assert_eq!(Model::Sonnet.api_name(), "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("opus".parse::<Model>().unwrap(), Model::Opus);
        assert_eq!("SONNET".parse::<Model>().unwrap(), Model::Sonnet);
        assert_eq!(
            "claude-3-5-haiku-20241022".parse::<Model>().unwrap(),
            Model::Haiku
        );
        assert!("gpt".parse::<Model>().is_err());
    }

    #[test]
    fn test_content_block_wire_shape() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "read_file",
            "input": {"path": "src/lib.rs"}
        }))
        .unwrap();
        assert!(block.is_tool_use());

        let result = ContentBlock::tool_result("toolu_1", "ok", false);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_thinking_signature_omitted_when_absent() {
        let block = ContentBlock::Thinking {
            thinking: "hmm".into(),
            signature: None,
        };
        let value = serde_json::to_value(&block).unwrap();
        assert!(value.get("signature").is_none());
    }

    #[test]
    fn test_response_partitioning_keeps_order() {
        let response = ReasoningResponse {
            content: vec![
                ContentBlock::Thinking {
                    thinking: "plan".into(),
                    signature: None,
                },
                ContentBlock::text("first"),
                ContentBlock::ToolUse {
                    id: "a".into(),
                    name: "read_file".into(),
                    input: json!({}),
                },
                ContentBlock::text("second"),
                ContentBlock::ToolUse {
                    id: "b".into(),
                    name: "list_files".into(),
                    input: json!({}),
                },
            ],
            usage: Usage::default(),
            stop_reason: Some("tool_use".into()),
            cost: CostEvent::flat("test", Usage::default(), Usd::ZERO),
        };
        assert_eq!(response.text(), "first\nsecond");
        assert_eq!(response.thinking(), "plan");
        let ids: Vec<String> = response.tool_uses().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_estimated_input_tokens_grows_with_history() {
        let mut request = ReasoningRequest {
            model: Model::Sonnet,
            system: String::new(),
            messages: vec![Message::user_text("x".repeat(400))],
            tools: Vec::new(),
            max_tokens: 1000,
            thinking_budget: None,
        };
        let small = request.estimated_input_tokens();
        request.messages.push(Message::user_text("y".repeat(4000)));
        assert!(request.estimated_input_tokens() > small + 900);
    }
}
