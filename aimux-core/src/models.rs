//! # Canonical Request and Response Types
//!
//! This module defines the provider-agnostic data model that flows through the
//! gateway pipeline. Incoming wire requests are resolved into a
//! [`CanonicalRequest`] before classification and routing; every backend
//! adapter decodes its provider's wire format back into the segmented
//! [`CanonicalResponse`] shape.
//!
//! ## Overview
//!
//! The model covers:
//! - **Messages**: ordered conversation turns whose content is a list of
//!   typed blocks (text, image references, tool results)
//! - **Tool declarations and tool calls**: function-calling metadata with
//!   arguments validated down to a scalar key/value map
//! - **Generation parameters**: `max_tokens`, `temperature`, `top_p`, `stream`
//! - **Routing metadata**: priority plus cost/latency sensitivity flags that
//!   bias provider scoring
//! - **Streaming events**: incremental deltas emitted by adapters while a
//!   provider streams
//!
//! ## Example
//!
//! ```rust
//! use aimux_core::models::{CanonicalRequest, Message};
//!
//! let request = CanonicalRequest {
//!     model_hint: Some("sonnet".to_string()),
//!     messages: vec![Message::user("Summarize the attached log")],
//!     max_tokens: Some(512),
//!     ..Default::default()
//! };
//! ```

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider-agnostic chat-completion request.
///
/// Built once per incoming call from the wire-level request and shared
/// read-only across classification, selection, and every failover attempt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CanonicalRequest {
    /// Client-supplied model hint, forwarded to the chosen adapter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    /// Ordered conversation history
    pub messages: Vec<Message>,
    /// Tool declarations available to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Whether the client requested a streamed response
    #[serde(default)]
    pub stream: bool,
    /// Routing metadata attached by the caller
    #[serde(default)]
    pub metadata: RequestMetadata,
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Typed content blocks; plain-text messages carry a single `Text` block
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create a system message with a single text block.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text of every text block in this message.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Whether any content block references an image.
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ImageRef { .. }))
    }

    /// Whether any content block is a tool result.
    pub fn has_tool_result(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and context
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
    /// Tool execution result
    Tool,
}

/// Typed message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },
    /// Reference to an image, by URL or data URI
    ImageRef {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    /// Result of a prior tool invocation
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

/// Declaration of a tool the model may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema parameter description, passed through verbatim
    pub parameters: serde_json::Value,
}

/// Request priority, used as a scoring input rather than a hard queue class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Routing metadata attached to a request by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestMetadata {
    #[serde(default)]
    pub priority: Priority,
    /// Triples the cost weight during provider scoring
    #[serde(default)]
    pub cost_sensitive: bool,
    /// Triples the latency weight during provider scoring
    #[serde(default)]
    pub latency_sensitive: bool,
}

/// One segment of a decoded response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    /// Ordinary assistant text
    Text { text: String },
    /// Extended-thinking / reasoning output
    Reasoning { text: String },
    /// Marker for a tool call; the call itself lives in `tool_calls`
    ToolCall { id: String },
    /// Image produced or referenced by the provider
    ImageRef { url: String },
}

impl Segment {
    /// Text payload of this segment, if it carries one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { text } | Segment::Reasoning { text } => Some(text),
            _ => None,
        }
    }
}

/// A structured tool invocation requested by the model.
///
/// Arguments are validated down to scalars: string, number, and boolean
/// values pass through; nested objects and arrays are kept as their compact
/// JSON rendering. The map is ordered so serialization is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

impl ToolCall {
    /// Validate a raw JSON argument object into the scalar key/value map.
    ///
    /// Accepts both an object and a stringified JSON object, matching the
    /// two forms providers emit.
    pub fn arguments_from_json(raw: &serde_json::Value) -> BTreeMap<String, String> {
        let object = match raw {
            serde_json::Value::Object(map) => Some(map.clone()),
            serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                .ok()
                .and_then(|v| v.as_object().cloned()),
            _ => None,
        };

        let mut arguments = BTreeMap::new();
        if let Some(object) = object {
            for (key, value) in object {
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                arguments.insert(key, rendered);
            }
        }
        arguments
    }
}

/// Token accounting for a completed call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Terminal error attached to a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Provider-agnostic chat-completion response.
///
/// A successful response always carries a non-empty `content` list or at
/// least one entry in `tool_calls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub success: bool,
    /// Provider that produced the final answer
    pub provider_id: String,
    /// Provider-native model that served the request
    pub model_used: String,
    /// Total invocation attempts across all providers
    pub attempts: u32,
    /// End-to-end latency including failover
    pub latency_ms: u64,
    pub content: Vec<Segment>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Structured warnings, e.g. parameters the backend dropped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl CanonicalResponse {
    /// Concatenated plain text of all `Text` segments.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for segment in &self.content {
            if let Segment::Text { text } = segment {
                out.push_str(text);
            }
        }
        out
    }
}

/// Incremental event produced by a streaming adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text delta
    TextDelta { text: String },
    /// Reasoning text delta
    ReasoningDelta { text: String },
    /// Partial tool-call payload; `arguments_fragment` accumulates JSON text
    ToolCallDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments_fragment: String,
    },
    /// Stream finished; usage is present when the provider reported it
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}
