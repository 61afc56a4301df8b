//! The canonical tabular artifact and its line-oriented serialization.
//!
//! Section order is fixed (metadata, reasoning, content, tools) regardless
//! of which provider produced the response, so downstream consumers can
//! parse artifacts without provider-specific cases. Commas and newlines
//! inside values are escaped.

use crate::models::{ToolCall, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header block of an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub usage: Usage,
}

/// Canonical tabular representation of one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrettifiedArtifact {
    pub metadata: ArtifactMetadata,
    pub reasoning: Vec<String>,
    pub content: Vec<String>,
    pub tools: Vec<ToolCall>,
}

impl PrettifiedArtifact {
    /// Render the line-oriented tabular form.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# metadata\n");
        out.push_str(&format!("provider: {}\n", escape_value(&self.metadata.provider)));
        out.push_str(&format!("model: {}\n", escape_value(&self.metadata.model)));
        out.push_str(&format!("latency_ms: {}\n", self.metadata.latency_ms));
        out.push_str(&format!(
            "usage: input={},output={},total={}\n",
            self.metadata.usage.input_tokens,
            self.metadata.usage.output_tokens,
            self.metadata.usage.total_tokens
        ));

        out.push_str("\n# reasoning\n");
        for (index, block) in self.reasoning.iter().enumerate() {
            out.push_str(&format!("[{index}] {}\n", escape_value(block)));
        }

        out.push_str("\n# content\n");
        for (index, block) in self.content.iter().enumerate() {
            out.push_str(&format!("[{index}] {}\n", escape_value(block)));
        }

        out.push_str(&format!("\n# tools\ntools[{}]{{name,id,arguments}}:\n", self.tools.len()));
        for tool in &self.tools {
            let arguments = tool
                .arguments
                .iter()
                .map(|(k, v)| format!("{}={}", escape_value(k), escape_value(v)))
                .collect::<Vec<_>>()
                .join(";");
            out.push_str(&format!(
                "  {},{},{}\n",
                escape_value(&tool.name),
                escape_value(&tool.id),
                arguments
            ));
        }

        out
    }
}

/// Escape separators so values survive the tabular form: backslash first,
/// then commas and newlines.
fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn artifact() -> PrettifiedArtifact {
        let now = Utc::now();
        PrettifiedArtifact {
            metadata: ArtifactMetadata {
                provider: "zai".to_string(),
                model: "glm-4.7".to_string(),
                started_at: now,
                completed_at: now,
                latency_ms: 842,
                usage: Usage::new(100, 50),
            },
            reasoning: vec!["weighed the options".to_string()],
            content: vec!["the answer, obviously".to_string()],
            tools: vec![ToolCall {
                id: "toolu_1".to_string(),
                name: "lookup".to_string(),
                arguments: BTreeMap::from([
                    ("city".to_string(), "Berlin, DE".to_string()),
                    ("note".to_string(), "line1\nline2".to_string()),
                ]),
            }],
        }
    }

    #[test]
    fn sections_render_in_stable_order() {
        let rendered = artifact().render();
        let metadata = rendered.find("# metadata").unwrap();
        let reasoning = rendered.find("# reasoning").unwrap();
        let content = rendered.find("# content").unwrap();
        let tools = rendered.find("# tools").unwrap();
        assert!(metadata < reasoning && reasoning < content && content < tools);
        assert!(rendered.contains("latency_ms: 842"));
        assert!(rendered.contains("usage: input=100,output=50,total=150"));
        assert!(rendered.contains("tools[1]{name,id,arguments}:"));
    }

    #[test]
    fn commas_and_newlines_are_escaped_in_values() {
        let rendered = artifact().render();
        assert!(rendered.contains("the answer\\, obviously"));
        assert!(rendered.contains("city=Berlin\\, DE"));
        assert!(rendered.contains("note=line1\\nline2"));
    }

    #[test]
    fn empty_sections_still_render_headers() {
        let mut artifact = artifact();
        artifact.reasoning.clear();
        artifact.tools.clear();
        let rendered = artifact.render();
        assert!(rendered.contains("# reasoning"));
        assert!(rendered.contains("tools[0]{name,id,arguments}:"));
    }
}
