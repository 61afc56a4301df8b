//! # Request Classification
//!
//! The classifier inspects a [`CanonicalRequest`] and derives the capability
//! requirements that drive provider selection: does the request need vision,
//! tools, streaming, extended thinking, or a long-context backend, and
//! roughly how many tokens will it consume.
//!
//! Classification never fails. Content the classifier cannot make sense of
//! degrades to a `standard` classification with low complexity, and routing
//! proceeds on that basis.

use crate::capability::{Capability, CapabilitySet};
use crate::models::{CanonicalRequest, ContentBlock, Role};
use serde::{Deserialize, Serialize};

/// Phrases in user text that indicate the request wants extended thinking.
const THINKING_CUES: [&str; 4] = [
    "think step by step",
    "reason through",
    "analyze carefully",
    "explain your reasoning",
];

/// Broad shape of a request, used for routing hints and metrics labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Thinking,
    Vision,
    Tools,
    Streaming,
    Standard,
    Hybrid,
}

/// Rough effort bucket for a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Output of classification, consumed by the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestClassification {
    pub required_capabilities: CapabilitySet,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    pub request_type: RequestType,
    pub complexity: Complexity,
}

/// Tunable thresholds for the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// User-message token estimate above which thinking is assumed
    pub thinking_tokens_threshold: u32,
    /// Estimated input tokens above which long-context is required
    pub long_context_threshold: u32,
    /// Flat token allowance added per image reference
    pub image_token_allowance: u32,
    /// Output estimate used when the request does not cap `max_tokens`
    pub default_output_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            thinking_tokens_threshold: 2_048,
            long_context_threshold: 32_000,
            image_token_allowance: 1_024,
            default_output_tokens: 1_024,
        }
    }
}

/// Derives a [`RequestClassification`] from a request. Stateless; one
/// instance serves the whole gateway.
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    config: ClassifierConfig,
}

impl RequestClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a request. This is infallible by design.
    pub fn classify(&self, request: &CanonicalRequest) -> RequestClassification {
        let mut required = CapabilitySet::default();

        let mut text_bytes: usize = 0;
        let mut image_count: u32 = 0;
        let mut has_tool_result = false;
        let mut thinking_cue = false;

        for message in &request.messages {
            for block in &message.content {
                match block {
                    ContentBlock::Text { text } => {
                        text_bytes += text.len();
                        if message.role == Role::User && !thinking_cue {
                            let lowered = text.to_lowercase();
                            thinking_cue =
                                THINKING_CUES.iter().any(|cue| lowered.contains(cue));
                        }
                    }
                    ContentBlock::ImageRef { .. } => image_count += 1,
                    ContentBlock::ToolResult { content, .. } => {
                        text_bytes += content.len();
                        has_tool_result = true;
                    }
                }
            }
        }

        // 1 token per 4 bytes of text, rounded up, plus a flat image allowance.
        let estimated_input_tokens = (text_bytes as u32).div_ceil(4)
            + image_count * self.config.image_token_allowance;
        let estimated_output_tokens = request
            .max_tokens
            .unwrap_or(self.config.default_output_tokens);

        if image_count > 0 {
            required.insert(Capability::Vision);
        }
        if request.tools.as_ref().is_some_and(|t| !t.is_empty()) || has_tool_result {
            required.insert(Capability::Tools);
        }
        if request.stream {
            required.insert(Capability::Streaming);
        }

        let user_tokens: u32 = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| (m.text().len() as u32).div_ceil(4))
            .sum();
        if thinking_cue || user_tokens > self.config.thinking_tokens_threshold {
            required.insert(Capability::Thinking);
        }

        if estimated_input_tokens > self.config.long_context_threshold {
            required.insert(Capability::LongContext);
        }

        let request_type = Self::request_type(&required);
        let complexity = self.complexity(&required, estimated_input_tokens);

        RequestClassification {
            required_capabilities: required,
            estimated_input_tokens,
            estimated_output_tokens,
            request_type,
            complexity,
        }
    }

    fn request_type(required: &CapabilitySet) -> RequestType {
        let core_needs = [
            (Capability::Thinking, RequestType::Thinking),
            (Capability::Vision, RequestType::Vision),
            (Capability::Tools, RequestType::Tools),
        ];
        let present: Vec<RequestType> = core_needs
            .iter()
            .filter(|(cap, _)| required.contains(*cap))
            .map(|(_, ty)| *ty)
            .collect();

        match present.len() {
            0 if required.contains(Capability::Streaming) => RequestType::Streaming,
            0 => RequestType::Standard,
            1 => present[0],
            _ => RequestType::Hybrid,
        }
    }

    fn complexity(&self, required: &CapabilitySet, input_tokens: u32) -> Complexity {
        let demanding = required.contains(Capability::Thinking)
            || required.contains(Capability::LongContext);
        if demanding || required.len() >= 3 {
            Complexity::High
        } else if !required.is_empty() || input_tokens > self.config.thinking_tokens_threshold {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(ClassifierConfig::default())
    }

    #[test]
    fn plain_text_is_standard_low() {
        let request = CanonicalRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification.required_capabilities.is_empty());
        assert_eq!(classification.request_type, RequestType::Standard);
        assert_eq!(classification.complexity, Complexity::Low);
    }

    #[test]
    fn image_content_requires_vision() {
        let request = CanonicalRequest {
            messages: vec![Message {
                role: Role::User,
                content: vec![
                    ContentBlock::Text {
                        text: "what is in this picture".to_string(),
                    },
                    ContentBlock::ImageRef {
                        url: "https://example.com/cat.png".to_string(),
                        media_type: Some("image/png".to_string()),
                    },
                ],
            }],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::Vision));
        assert_eq!(classification.request_type, RequestType::Vision);
        // image allowance dominates the estimate for a short caption
        assert!(classification.estimated_input_tokens >= 1_024);
    }

    #[test]
    fn tool_result_in_history_requires_tools() {
        let request = CanonicalRequest {
            messages: vec![
                Message::user("run it"),
                Message {
                    role: Role::Tool,
                    content: vec![ContentBlock::ToolResult {
                        tool_call_id: "call_1".to_string(),
                        content: "ok".to_string(),
                    }],
                },
            ],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::Tools));
    }

    #[test]
    fn thinking_cue_detected_in_user_text() {
        let request = CanonicalRequest {
            messages: vec![Message::user(
                "Please think step by step about the migration plan",
            )],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::Thinking));
        assert_eq!(classification.request_type, RequestType::Thinking);
        assert_eq!(classification.complexity, Complexity::High);
    }

    #[test]
    fn long_user_message_implies_thinking() {
        let request = CanonicalRequest {
            messages: vec![Message::user("a".repeat(4 * 3_000))],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::Thinking));
    }

    #[test]
    fn long_context_threshold_triggers() {
        let request = CanonicalRequest {
            messages: vec![Message::system("x".repeat(4 * 40_000))],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::LongContext));
    }

    #[test]
    fn two_core_needs_make_hybrid() {
        let request = CanonicalRequest {
            messages: vec![Message {
                role: Role::User,
                content: vec![
                    ContentBlock::Text {
                        text: "analyze carefully".to_string(),
                    },
                    ContentBlock::ImageRef {
                        url: "data:image/png;base64,AAAA".to_string(),
                        media_type: None,
                    },
                ],
            }],
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert_eq!(classification.request_type, RequestType::Hybrid);
    }

    #[test]
    fn stream_flag_alone_is_streaming_type() {
        let request = CanonicalRequest {
            messages: vec![Message::user("hello")],
            stream: true,
            ..Default::default()
        };
        let classification = classifier().classify(&request);
        assert!(classification
            .required_capabilities
            .contains(Capability::Streaming));
        assert_eq!(classification.request_type, RequestType::Streaming);
    }

    #[test]
    fn output_estimate_uses_max_tokens_when_present() {
        let request = CanonicalRequest {
            messages: vec![Message::user("hi")],
            max_tokens: Some(50),
            ..Default::default()
        };
        assert_eq!(classifier().classify(&request).estimated_output_tokens, 50);
    }

    #[test]
    fn empty_request_still_classifies() {
        let classification = classifier().classify(&CanonicalRequest::default());
        assert_eq!(classification.request_type, RequestType::Standard);
        assert_eq!(classification.complexity, Complexity::Low);
        assert_eq!(classification.estimated_input_tokens, 0);
    }
}
