//! Markdown normalization: one fence style, no trailing whitespace, no
//! runs of blank lines, and a best-effort language tag on bare fences.

/// Normalize a markdown block.
pub fn normalize(text: &str) -> String {
    let mut out_lines: Vec<String> = Vec::new();
    let mut in_fence = false;
    let mut blank_run = 0usize;
    let mut pending_fence_index: Option<usize> = None;

    let lines: Vec<&str> = text.lines().collect();
    for (i, raw_line) in lines.iter().enumerate() {
        let mut line = raw_line.trim_end().to_string();

        let trimmed = line.trim_start();
        let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        if is_fence {
            let indent_len = line.len() - trimmed.len();
            let indent = line[..indent_len].to_string();
            let marker_len = 3;
            let info = trimmed[marker_len..].trim().to_string();
            line = format!("{indent}```{info}");

            if !in_fence {
                in_fence = true;
                // remember a bare opener so its language can be filled in
                pending_fence_index = info.is_empty().then_some(out_lines.len());
            } else {
                in_fence = false;
                pending_fence_index = None;
            }
            blank_run = 0;
            out_lines.push(line);
            continue;
        }

        if in_fence {
            // first body line of a bare fence decides the language
            if let Some(fence_index) = pending_fence_index.take() {
                if let Some(language) = detect_language(raw_line, lines.get(i + 1).copied()) {
                    out_lines[fence_index].push_str(language);
                }
            }
            out_lines.push(raw_line.trim_end().to_string());
            continue;
        }

        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out_lines.push(line);
    }

    let mut result = out_lines.join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Guess a code-block language from its first line, mainly via shebangs.
fn detect_language(first_line: &str, _second_line: Option<&str>) -> Option<&'static str> {
    let line = first_line.trim();
    if let Some(shebang) = line.strip_prefix("#!") {
        if shebang.contains("python") {
            return Some("python");
        }
        if shebang.contains("node") {
            return Some("javascript");
        }
        if shebang.contains("bash") || shebang.contains("/sh") || shebang.contains("zsh") {
            return Some("bash");
        }
        return Some("sh");
    }
    if line.starts_with("<?php") {
        return Some("php");
    }
    if line.starts_with("<?xml") {
        return Some("xml");
    }
    if line.starts_with("SELECT ") || line.starts_with("select ") {
        return Some("sql");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_fences_become_backticks() {
        let input = "~~~rust\nfn main() {}\n~~~\n";
        let output = normalize(input);
        assert_eq!(output, "```rust\nfn main() {}\n```\n");
    }

    #[test]
    fn trailing_whitespace_is_stripped_outside_fences() {
        let input = "hello   \nworld\t\n";
        assert_eq!(normalize(input), "hello\nworld\n");
    }

    #[test]
    fn blank_line_runs_coalesce() {
        let input = "a\n\n\n\n\nb\n";
        assert_eq!(normalize(input), "a\n\nb\n");
    }

    #[test]
    fn code_body_is_left_untouched() {
        let input = "```python\nx = [1,\n\n\n     2]\n```\n";
        let output = normalize(input);
        assert!(output.contains("x = [1,\n\n\n     2]"));
    }

    #[test]
    fn shebang_fills_in_missing_language() {
        let input = "```\n#!/bin/bash\necho hi\n```\n";
        let output = normalize(input);
        assert!(output.starts_with("```bash\n"));

        let input = "```\n#!/usr/bin/env python3\nprint(1)\n```\n";
        assert!(normalize(input).starts_with("```python\n"));
    }

    #[test]
    fn declared_language_is_preserved() {
        let input = "```toml\nkey = 1\n```\n";
        assert_eq!(normalize(input), input);
    }
}
