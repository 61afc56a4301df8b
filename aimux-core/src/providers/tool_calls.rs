//! # Tool-Call Normalization
//!
//! Providers report tool invocations in two generations of wire format.
//! Modern responses carry structured content arrays (`type = "tool_use"`
//! blocks on Anthropic-style backends, `message.tool_calls` arrays on
//! OpenAI-style backends). Older deployments emit an XML convention inside
//! the assistant text:
//!
//! ```text
//! <function_calls>
//!   <invoke name="get_weather">
//!     <parameter name="city">Berlin</parameter>
//!   </invoke>
//! </function_calls>
//! ```
//!
//! Extraction is dual-path: structured first, XML fallback only when the
//! structured pass finds nothing. The fallback keeps the gateway compatible
//! across provider version updates without any configuration.

use crate::models::ToolCall;
use serde_json::Value;
use std::collections::BTreeMap;

/// Extract tool calls from a decoded response.
///
/// `structured` is the provider's raw response JSON; `text` is the
/// concatenated assistant text used for the legacy fallback.
pub fn normalize_tool_calls(structured: &Value, text: &str) -> Vec<ToolCall> {
    let calls = extract_structured(structured);
    if !calls.is_empty() {
        return calls;
    }
    extract_legacy_xml(text)
}

/// Structured extraction: Anthropic-style `tool_use` content blocks and
/// OpenAI-style `choices[].message.tool_calls`.
pub fn extract_structured(value: &Value) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    // Anthropic-style content array.
    if let Some(content) = value.get("content").and_then(|c| c.as_array()) {
        for block in content {
            if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                if let Some(call) = tool_use_block(block) {
                    calls.push(call);
                }
            }
        }
    }

    // OpenAI-style choices array.
    if let Some(choices) = value.get("choices").and_then(|c| c.as_array()) {
        for choice in choices {
            let Some(tool_calls) = choice
                .get("message")
                .and_then(|m| m.get("tool_calls"))
                .and_then(|t| t.as_array())
            else {
                continue;
            };
            for entry in tool_calls {
                if let Some(call) = openai_tool_call(entry) {
                    calls.push(call);
                }
            }
        }
    }

    calls
}

fn tool_use_block(block: &Value) -> Option<ToolCall> {
    let id = block.get("id").and_then(|v| v.as_str())?.to_string();
    let name = block.get("name").and_then(|v| v.as_str())?.to_string();
    let arguments = block
        .get("input")
        .map(ToolCall::arguments_from_json)
        .unwrap_or_default();
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

fn openai_tool_call(entry: &Value) -> Option<ToolCall> {
    let id = entry.get("id").and_then(|v| v.as_str())?.to_string();
    let function = entry.get("function")?;
    let name = function.get("name").and_then(|v| v.as_str())?.to_string();
    let arguments = function
        .get("arguments")
        .map(ToolCall::arguments_from_json)
        .unwrap_or_default();
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

/// Legacy fallback: scan assistant text for `<function_calls>` blocks.
///
/// Hand-rolled scanning rather than an XML parser; the convention is rigid
/// enough that matching tag pairs is sufficient, and malformed fragments
/// simply yield no calls.
pub fn extract_legacy_xml(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    let mut remainder = text;
    while let Some(start) = remainder.find("<function_calls>") {
        let after_start = &remainder[start + "<function_calls>".len()..];
        let Some(end) = after_start.find("</function_calls>") else {
            break;
        };
        let block = &after_start[..end];
        parse_invokes(block, &mut calls);
        remainder = &after_start[end + "</function_calls>".len()..];
    }

    calls
}

fn parse_invokes(block: &str, calls: &mut Vec<ToolCall>) {
    let mut remainder = block;
    while let Some(start) = remainder.find("<invoke") {
        let after_tag = &remainder[start..];
        let Some(tag_end) = after_tag.find('>') else {
            break;
        };
        let tag = &after_tag[..tag_end];
        let Some(name) = attribute_value(tag, "name") else {
            remainder = &after_tag[tag_end + 1..];
            continue;
        };

        let body_start = &after_tag[tag_end + 1..];
        let Some(close) = body_start.find("</invoke>") else {
            break;
        };
        let body = &body_start[..close];

        let mut arguments = BTreeMap::new();
        parse_parameters(body, &mut arguments);

        calls.push(ToolCall {
            id: format!("legacy_{}", calls.len()),
            name,
            arguments,
        });

        remainder = &body_start[close + "</invoke>".len()..];
    }
}

fn parse_parameters(body: &str, arguments: &mut BTreeMap<String, String>) {
    let mut remainder = body;
    while let Some(start) = remainder.find("<parameter") {
        let after_tag = &remainder[start..];
        let Some(tag_end) = after_tag.find('>') else {
            break;
        };
        let tag = &after_tag[..tag_end];
        let name = attribute_value(tag, "name");

        let value_start = &after_tag[tag_end + 1..];
        let Some(close) = value_start.find("</parameter>") else {
            break;
        };
        if let Some(name) = name {
            arguments.insert(name, value_start[..close].to_string());
        }
        remainder = &value_start[close + "</parameter>".len()..];
    }
}

/// Pull `key="value"` out of a tag fragment.
fn attribute_value(tag: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = tag.find(&marker)? + marker.len();
    let rest = &tag[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
