//! Snippet extraction around matched terms

use crate::index::Analyzer;
use ahash::AHashSet;

const ELLIPSIS: &str = "...";

/// Up to `max_highlights` snippets of about `width` bytes around body tokens
/// whose analysed form is one of `terms`
///
/// Windows are centred on each match, snapped to char boundaries and merged
/// when they overlap; snippets come out in document order with `...` on
/// truncated edges. Pure function of its inputs.
pub fn extract_highlights(
    analyzer: &Analyzer,
    body: &str,
    terms: &[String],
    width: usize,
    max_highlights: usize,
) -> Vec<String> {
    if terms.is_empty() || max_highlights == 0 || body.is_empty() {
        return Vec::new();
    }

    let wanted: AHashSet<&str> = terms.iter().map(String::as_str).collect();
    let mut windows: Vec<(usize, usize)> = Vec::new();

    for token in analyzer.analyze(body) {
        if !wanted.contains(token.term.as_str()) {
            continue;
        }

        let centre = (token.offset_from + token.offset_to) / 2;
        let start = centre.saturating_sub(width / 2).min(token.offset_from);
        let end = (start + width).max(token.offset_to).min(body.len());
        let window = (floor_boundary(body, start), ceil_boundary(body, end));

        match windows.last_mut() {
            Some(last) if window.0 <= last.1 => last.1 = last.1.max(window.1),
            _ => {
                if windows.len() == max_highlights {
                    break;
                }
                windows.push(window);
            }
        }
    }

    windows
        .into_iter()
        .map(|(start, end)| {
            let mut snippet = String::new();
            if start > 0 {
                snippet.push_str(ELLIPSIS);
            }
            snippet.push_str(body[start..end].trim());
            if end < body.len() {
                snippet.push_str(ELLIPSIS);
            }
            snippet
        })
        .collect()
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
