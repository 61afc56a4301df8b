//! # Response Prettifier
//!
//! Pluggable post-processing that turns a [`CanonicalResponse`] into the
//! canonical tabular [`PrettifiedArtifact`]. Dispatch is a flat registry
//! lookup keyed by provider id with a `default` fallback; the registry is
//! built at gateway construction and passed in, never a process-wide
//! singleton.
//!
//! Every response runs the same pipeline regardless of formatter:
//!
//! 1. **Security validation** — all text segments and tool-argument values
//!    are scanned against the configured pattern set. A match in free text
//!    fails the response; a match in a tool argument only redacts that
//!    argument. The asymmetry is intentional: tool arguments are machine
//!    consumed and can be neutralized piecemeal, free text reaches humans.
//! 2. **Markdown normalization** — fences unified, trailing whitespace
//!    stripped, blank-line runs coalesced, missing fence languages
//!    detected.
//! 3. **Tool-argument escaping** — argument values are HTML-escaped before
//!    they enter the artifact.
//! 4. **Streaming assembly** — chunked responses buffer per stream with
//!    bounded memory (see [`streaming`]).
//! 5. **Serialization** — the formatter shapes the artifact, whose `render`
//!    gives the stable line-oriented form.

pub mod artifact;
pub mod markdown;
pub mod security;
pub mod streaming;

pub use artifact::{ArtifactMetadata, PrettifiedArtifact};
pub use streaming::{ArtifactFragment, FlushReason, StreamAssembler};

use crate::error::ErrorKind;
use crate::models::{CanonicalRequest, CanonicalResponse, Segment};
use chrono::Utc;
use security::SecurityScanner;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Prettifier configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrettifierConfig {
    pub enabled: bool,
    /// Formatter used when no provider mapping matches
    pub default_formatter: String,
    /// provider id -> formatter name
    #[serde(default)]
    pub provider_mappings: HashMap<String, String>,
    /// Overrides the built-in pattern list when non-empty
    #[serde(default)]
    pub security_patterns: Vec<String>,
    pub max_stream_buffer_bytes: usize,
    pub flush_threshold_bytes: usize,
}

impl Default for PrettifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_formatter: "default".to_string(),
            provider_mappings: HashMap::new(),
            security_patterns: Vec::new(),
            max_stream_buffer_bytes: 10 * 1024 * 1024,
            flush_threshold_bytes: 4 * 1024,
        }
    }
}

/// Why prettification failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrettifyError {
    #[error("response content matched security pattern '{pattern}'")]
    SecurityViolation { pattern: String },

    #[error("response of {bytes} bytes exceeds the {limit} byte limit")]
    OversizeInput { bytes: usize, limit: usize },
}

impl PrettifyError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            PrettifyError::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            PrettifyError::OversizeInput { .. } => ErrorKind::MalformedRequest,
        }
    }
}

/// Provider-specific artifact shaping. Formatters see the response after
/// security validation, normalization, and escaping.
pub trait Formatter: Send + Sync {
    fn name(&self) -> &str;

    /// Hook for provider-specific request hints; identity by default.
    fn preprocess(&self, request: CanonicalRequest) -> CanonicalRequest {
        request
    }

    /// Shape the sanitized response into an artifact.
    fn postprocess(&self, response: &CanonicalResponse) -> PrettifiedArtifact;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Incremental path; only meaningful when `supports_streaming`.
    fn postprocess_chunk(
        &self,
        assembler: &mut StreamAssembler,
        delta: &str,
    ) -> Vec<ArtifactFragment> {
        assembler.push(delta)
    }
}

/// Standard formatter: reasoning, content, and tool sections mirror the
/// response segments one to one.
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn name(&self) -> &str {
        "default"
    }

    fn postprocess(&self, response: &CanonicalResponse) -> PrettifiedArtifact {
        let mut reasoning = Vec::new();
        let mut content = Vec::new();
        for segment in &response.content {
            match segment {
                Segment::Text { text } => content.push(text.clone()),
                Segment::Reasoning { text } => reasoning.push(text.clone()),
                Segment::ImageRef { url } => content.push(format!("[image] {url}")),
                Segment::ToolCall { .. } => {}
            }
        }
        PrettifiedArtifact {
            metadata: metadata_for(response),
            reasoning,
            content,
            tools: response.tool_calls.clone(),
        }
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

/// Compact formatter: merges all prose into a single content block, for
/// consumers that want one chunk per response.
pub struct CompactFormatter;

impl Formatter for CompactFormatter {
    fn name(&self) -> &str {
        "compact"
    }

    fn postprocess(&self, response: &CanonicalResponse) -> PrettifiedArtifact {
        let mut reasoning = Vec::new();
        let mut merged = String::new();
        for segment in &response.content {
            match segment {
                Segment::Text { text } => {
                    if !merged.is_empty() {
                        merged.push('\n');
                    }
                    merged.push_str(text);
                }
                Segment::Reasoning { text } => reasoning.push(text.clone()),
                Segment::ImageRef { url } => {
                    if !merged.is_empty() {
                        merged.push('\n');
                    }
                    merged.push_str(&format!("[image] {url}"));
                }
                Segment::ToolCall { .. } => {}
            }
        }
        let content = if merged.is_empty() {
            Vec::new()
        } else {
            vec![merged]
        };
        PrettifiedArtifact {
            metadata: metadata_for(response),
            reasoning,
            content,
            tools: response.tool_calls.clone(),
        }
    }
}

fn metadata_for(response: &CanonicalResponse) -> ArtifactMetadata {
    let completed_at = Utc::now();
    let started_at = completed_at
        - chrono::Duration::milliseconds(response.latency_ms.min(i64::MAX as u64) as i64);
    ArtifactMetadata {
        provider: response.provider_id.clone(),
        model: response.model_used.clone(),
        started_at,
        completed_at,
        latency_ms: response.latency_ms,
        usage: response.usage,
    }
}

/// Gateway-scoped formatter registry.
pub struct FormatterRegistry {
    formatters: HashMap<String, Arc<dyn Formatter>>,
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            formatters: HashMap::new(),
        };
        registry.register(Arc::new(DefaultFormatter));
        registry.register(Arc::new(CompactFormatter));
        registry
    }
}

impl FormatterRegistry {
    pub fn register(&mut self, formatter: Arc<dyn Formatter>) {
        self.formatters
            .insert(formatter.name().to_string(), formatter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.get(name).cloned()
    }
}

/// The post-processor itself: registry, scanner, and the pipeline.
pub struct Prettifier {
    registry: FormatterRegistry,
    scanner: SecurityScanner,
    config: PrettifierConfig,
}

impl Prettifier {
    pub fn new(config: PrettifierConfig, registry: FormatterRegistry) -> Self {
        let scanner = if config.security_patterns.is_empty() {
            SecurityScanner::default()
        } else {
            SecurityScanner::new(config.security_patterns.iter().cloned())
        };
        Self {
            registry,
            scanner,
            config,
        }
    }

    pub fn config(&self) -> &PrettifierConfig {
        &self.config
    }

    /// Resolve the formatter serving a provider.
    pub fn formatter_for(&self, provider_id: &str) -> Arc<dyn Formatter> {
        let name = self
            .config
            .provider_mappings
            .get(provider_id)
            .unwrap_or(&self.config.default_formatter);
        self.registry
            .get(name)
            .or_else(|| self.registry.get("default"))
            .unwrap_or_else(|| Arc::new(DefaultFormatter))
    }

    /// Apply provider-specific request hints before dispatch.
    pub fn preprocess(&self, provider_id: &str, request: CanonicalRequest) -> CanonicalRequest {
        if !self.config.enabled {
            return request;
        }
        self.formatter_for(provider_id).preprocess(request)
    }

    /// Run the full post-processing pipeline on a completed response.
    pub fn process(
        &self,
        response: &CanonicalResponse,
    ) -> Result<PrettifiedArtifact, PrettifyError> {
        if !self.config.enabled {
            // pass-through shaping only; no scanning or normalization
            return Ok(self
                .formatter_for(&response.provider_id)
                .postprocess(response));
        }

        let total_bytes: usize = response
            .content
            .iter()
            .filter_map(|s| s.as_text())
            .map(|t| t.len())
            .sum();
        if total_bytes > self.config.max_stream_buffer_bytes {
            return Err(PrettifyError::OversizeInput {
                bytes: total_bytes,
                limit: self.config.max_stream_buffer_bytes,
            });
        }

        let mut sanitized = response.clone();

        // free text: a match fails the response
        for segment in &sanitized.content {
            if let Some(text) = segment.as_text() {
                if let Some(pattern) = self.scanner.scan(text) {
                    tracing::warn!(
                        provider = %response.provider_id,
                        pattern,
                        "security pattern matched in response text"
                    );
                    return Err(PrettifyError::SecurityViolation {
                        pattern: pattern.to_string(),
                    });
                }
            }
        }

        // tool arguments: a match redacts just that argument
        for call in &mut sanitized.tool_calls {
            for value in call.arguments.values_mut() {
                if let Some(pattern) = self.scanner.scan(value) {
                    tracing::warn!(
                        provider = %response.provider_id,
                        tool = %call.name,
                        pattern,
                        "security pattern matched in tool argument; redacted"
                    );
                    value.clear();
                }
            }
        }

        // markdown normalization over prose segments
        for segment in &mut sanitized.content {
            if let Segment::Text { text } = segment {
                *text = markdown::normalize(text);
            }
        }

        // escape argument values before they enter the artifact
        for call in &mut sanitized.tool_calls {
            for value in call.arguments.values_mut() {
                *value = html_escape(value);
            }
        }

        Ok(self
            .formatter_for(&sanitized.provider_id)
            .postprocess(&sanitized))
    }

    /// New per-stream assembler with the configured bounds.
    pub fn begin_stream(&self) -> StreamAssembler {
        StreamAssembler::new(
            self.config.max_stream_buffer_bytes,
            self.config.flush_threshold_bytes,
        )
    }

    /// Scan a streamed text delta; used by the streaming path where whole
    /// response validation is not possible.
    pub fn scan_text(&self, text: &str) -> Option<&str> {
        self.scanner.scan(text)
    }
}

/// Escape the four HTML-sensitive characters.
pub fn html_escape(value: &str) -> String {
    value
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ToolCall, Usage};
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn response(content: Vec<Segment>, tool_calls: Vec<ToolCall>) -> CanonicalResponse {
        CanonicalResponse {
            success: true,
            provider_id: "synthetic".to_string(),
            model_used: "echo-1".to_string(),
            attempts: 1,
            latency_ms: 12,
            content,
            tool_calls,
            usage: Usage::new(10, 5),
            warnings: Vec::new(),
            error: None,
        }
    }

    fn prettifier() -> Prettifier {
        Prettifier::new(PrettifierConfig::default(), FormatterRegistry::default())
    }

    #[test]
    fn clean_response_produces_ordered_artifact() {
        let artifact = prettifier()
            .process(&response(
                vec![
                    Segment::Reasoning {
                        text: "compare both options".to_string(),
                    },
                    Segment::Text {
                        text: "Option A wins.".to_string(),
                    },
                ],
                vec![],
            ))
            .unwrap();

        assert_eq!(artifact.reasoning.len(), 1);
        assert_eq!(artifact.content, vec!["Option A wins.".to_string()]);
        assert_eq!(artifact.metadata.provider, "synthetic");
        let rendered = artifact.render();
        assert!(rendered.find("# reasoning").unwrap() < rendered.find("# content").unwrap());
    }

    #[test]
    fn script_tag_in_free_text_fails_the_response() {
        let err = prettifier()
            .process(&response(
                vec![Segment::Text {
                    text: "<script>alert('xss')</script>".to_string(),
                }],
                vec![],
            ))
            .unwrap_err();
        assert!(matches!(err, PrettifyError::SecurityViolation { .. }));
        assert_eq!(err.error_kind(), ErrorKind::SecurityViolation);
    }

    #[test]
    fn traversal_in_tool_argument_redacts_only_that_argument() {
        let call = ToolCall {
            id: "t1".to_string(),
            name: "read_file".to_string(),
            arguments: BTreeMap::from([
                ("path".to_string(), "../../../etc/passwd".to_string()),
                ("mode".to_string(), "text".to_string()),
            ]),
        };
        let artifact = prettifier()
            .process(&response(
                vec![Segment::Text {
                    text: "reading the file".to_string(),
                }],
                vec![call],
            ))
            .unwrap();

        assert_eq!(artifact.tools[0].arguments.get("path").unwrap(), "");
        assert_eq!(artifact.tools[0].arguments.get("mode").unwrap(), "text");
    }

    #[test]
    fn tool_arguments_are_html_escaped() {
        let call = ToolCall {
            id: "t1".to_string(),
            name: "render".to_string(),
            arguments: BTreeMap::from([(
                "template".to_string(),
                "a <b> \"quoted\" 'x'".to_string(),
            )]),
        };
        let artifact = prettifier()
            .process(&response(vec![Segment::Text { text: "ok".to_string() }], vec![call]))
            .unwrap();
        assert_eq!(
            artifact.tools[0].arguments.get("template").unwrap(),
            "a &lt;b&gt; &quot;quoted&quot; &#39;x&#39;"
        );
    }

    #[test]
    fn markdown_is_normalized_in_content() {
        let artifact = prettifier()
            .process(&response(
                vec![Segment::Text {
                    text: "~~~rust\nfn f() {}\n~~~\n".to_string(),
                }],
                vec![],
            ))
            .unwrap();
        assert!(artifact.content[0].starts_with("```rust"));
    }

    #[test]
    fn oversize_response_is_rejected() {
        let prettifier = Prettifier::new(
            PrettifierConfig {
                max_stream_buffer_bytes: 128,
                ..Default::default()
            },
            FormatterRegistry::default(),
        );
        let err = prettifier
            .process(&response(
                vec![Segment::Text {
                    text: "x".repeat(1_024),
                }],
                vec![],
            ))
            .unwrap_err();
        assert!(matches!(err, PrettifyError::OversizeInput { .. }));
        assert_eq!(err.error_kind(), ErrorKind::MalformedRequest);
    }

    #[test]
    fn provider_mapping_selects_formatter() {
        let prettifier = Prettifier::new(
            PrettifierConfig {
                provider_mappings: HashMap::from([(
                    "terse".to_string(),
                    "compact".to_string(),
                )]),
                ..Default::default()
            },
            FormatterRegistry::default(),
        );
        assert_eq!(prettifier.formatter_for("terse").name(), "compact");
        assert_eq!(prettifier.formatter_for("anything-else").name(), "default");
    }

    #[test]
    fn compact_formatter_merges_prose() {
        let mut response = response(
            vec![
                Segment::Text {
                    text: "part one".to_string(),
                },
                Segment::Text {
                    text: "part two".to_string(),
                },
            ],
            vec![],
        );
        response.provider_id = "terse".to_string();

        let prettifier = Prettifier::new(
            PrettifierConfig {
                provider_mappings: HashMap::from([(
                    "terse".to_string(),
                    "compact".to_string(),
                )]),
                ..Default::default()
            },
            FormatterRegistry::default(),
        );
        let artifact = prettifier.process(&response).unwrap();
        assert_eq!(artifact.content, vec!["part one\npart two".to_string()]);
    }

    #[test]
    fn idempotent_over_already_clean_input() {
        let prettifier = prettifier();
        let input = response(
            vec![Segment::Text {
                text: "plain paragraph.\n".to_string(),
            }],
            vec![],
        );
        let first = prettifier.process(&input).unwrap();
        let second = prettifier.process(&input).unwrap();
        assert_eq!(first.content, second.content);
        assert_eq!(first.reasoning, second.reasoning);
        assert_eq!(first.tools, second.tools);
    }

    #[test]
    fn kilobyte_response_prettifies_quickly() {
        let prettifier = prettifier();
        let input = response(
            vec![Segment::Text {
                text: "word ".repeat(205),
            }],
            vec![],
        );
        let start = Instant::now();
        for _ in 0..50 {
            prettifier.process(&input).unwrap();
        }
        let per_call = start.elapsed() / 50;
        assert!(per_call.as_millis() < 5, "prettify took {per_call:?}");
    }
}
