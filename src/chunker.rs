use regex::Regex;
use std::sync::OnceLock;

/// One chunk produced by `dispatch`, before it is turned into a `VectorRecord`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub header_context: String,
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
        }
    }
}

fn code_extensions() -> &'static [&'static str] {
    &[
        "ps1", "go", "py", "js", "ts", "tsx", "jsx", "rs", "java", "c", "cpp", "cs", "rb", "php",
    ]
}

fn atx_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})\s+(.*)$").unwrap())
}

fn code_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?:function\s+(\w+)|def\s+(\w+)|class\s+(\w+)|func\s+(?:\([^)]*\)\s*)?(\w+)|(?:pub\s+|async\s+)*fn\s+(\w+))",
        )
        .unwrap()
    })
}

fn xml_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<([A-Za-z_][\w.:-]*)[^>]*>.*?</\1>|<([A-Za-z_][\w.:-]*)[^>]*/>").unwrap())
}

/// Split `text` into extension-dispatched sections, then refine each
/// section down to `config.max_chunk_size` with sentence-boundary-aware
/// sliding windows (§4.4).
pub fn dispatch(text: &str, file_extension: &str, config: ChunkerConfig) -> Vec<Chunk> {
    let ext = file_extension.trim_start_matches('.').to_lowercase();
    let sections = match ext.as_str() {
        "md" | "markdown" => split_markdown(text),
        ext if code_extensions().contains(&ext) => split_code(text),
        "xml" => split_xml(text),
        _ => split_paragraphs(text),
    };

    let mut chunks = Vec::new();
    let mut index = 0usize;
    for (section_text, header) in sections {
        for refined in refine(&section_text, config) {
            chunks.push(Chunk {
                text: refined,
                header_context: header.clone(),
                index,
            });
            index += 1;
        }
    }
    chunks
}

/// Split on ATX headers, maintaining a stack of `(level, title)` so nested
/// sections get a breadcrumb like `"A > B > C"`.
fn split_markdown(text: &str) -> Vec<(String, String)> {
    let re = atx_header_re();
    let headers: Vec<(usize, usize, u8, String)> = re
        .captures_iter(text)
        .map(|c| {
            let m = c.get(0).unwrap();
            let level = c.get(1).unwrap().as_str().len() as u8;
            let title = c.get(2).unwrap().as_str().trim().to_string();
            (m.start(), m.end(), level, title)
        })
        .collect();

    if headers.is_empty() {
        return split_paragraphs(text);
    }

    let mut sections = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();

    for (i, (_, header_end, level, title)) in headers.iter().enumerate() {
        while stack.last().map(|(l, _)| *l >= *level).unwrap_or(false) {
            stack.pop();
        }
        stack.push((*level, title.clone()));
        let breadcrumb = stack.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>().join(" > ");

        let section_start = *header_end;
        let section_end = headers.get(i + 1).map(|(s, _, _, _)| *s).unwrap_or(text.len());
        let body = text[section_start..section_end].trim().to_string();
        if !body.is_empty() {
            sections.push((body, breadcrumb));
        }
    }

    sections
}

/// Split on top-level function/class definitions; each section's header is
/// the matched name, or `"(top-level)"` for leading content before the
/// first definition.
fn split_code(text: &str) -> Vec<(String, String)> {
    let re = code_def_re();
    let matches: Vec<(usize, String)> = re
        .captures_iter(text)
        .map(|c| {
            let start = c.get(0).unwrap().start();
            let name = c
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "(anonymous)".to_string());
            (start, name)
        })
        .collect();

    if matches.is_empty() {
        return vec![(text.to_string(), "(top-level)".to_string())];
    }

    let mut sections = Vec::new();
    if matches[0].0 > 0 {
        let leading = text[..matches[0].0].trim().to_string();
        if !leading.is_empty() {
            sections.push((leading, "(top-level)".to_string()));
        }
    }

    for (i, (start, name)) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        let body = text[*start..end].trim().to_string();
        if !body.is_empty() {
            sections.push((body, name.clone()));
        }
    }

    sections
}

/// Split on top-level child elements; header is the element path (tag name).
fn split_xml(text: &str) -> Vec<(String, String)> {
    let re = xml_element_re();
    let matches: Vec<(String, String)> = re
        .find_iter(text)
        .map(|m| {
            let tag = re
                .captures(m.as_str())
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| "(element)".to_string());
            (m.as_str().to_string(), tag)
        })
        .collect();

    if matches.is_empty() {
        return split_paragraphs(text);
    }

    matches
}

/// Split on blank-line paragraphs; header is `"(paragraph N)"`, 1-indexed.
fn split_paragraphs(text: &str) -> Vec<(String, String)> {
    let re = Regex::new(r"\n\s*\n").unwrap();
    re.split(text)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, p)| (p.to_string(), format!("(paragraph {})", i + 1)))
        .collect()
}

/// Refine one section down to `max_chunk_size`-sized windows with overlap,
/// backing up to a sentence boundary (or whitespace) rather than splitting
/// mid-word.
fn refine(text: &str, config: ChunkerConfig) -> Vec<String> {
    if text.chars().count() <= config.max_chunk_size {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let step = config.max_chunk_size.saturating_sub(config.overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let tentative_end = (start + config.max_chunk_size).min(chars.len());
        let end = if tentative_end >= chars.len() {
            tentative_end
        } else {
            find_boundary(&chars, start, tentative_end, config.max_chunk_size)
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start += step;
        if start >= end {
            start = end;
        }
    }

    chunks
}

/// Search the last 20% of the window for a sentence boundary (`. ? ! \n\n`);
/// fall back to the nearest whitespace; never split mid-word.
fn find_boundary(chars: &[char], start: usize, tentative_end: usize, window: usize) -> usize {
    let search_from = tentative_end.saturating_sub(window / 5).max(start + 1);

    for i in (search_from..tentative_end).rev() {
        let c = chars[i];
        if matches!(c, '.' | '?' | '!') {
            let next_is_break = chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true);
            if next_is_break {
                return (i + 1).min(tentative_end);
            }
        }
        if c == '\n' && chars.get(i.saturating_sub(1)) == Some(&'\n') {
            return i.min(tentative_end);
        }
    }

    for i in (search_from..tentative_end).rev() {
        if chars[i].is_whitespace() {
            return i;
        }
    }

    tentative_end
}

/// First 100 chars of `text` with whitespace collapsed (§4.4, §3).
pub fn text_preview(text: &str) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let cfg = ChunkerConfig::default();
        let chunks = dispatch("just one short paragraph", "txt", cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_context, "(paragraph 1)");
    }

    #[test]
    fn markdown_headers_build_breadcrumb() {
        let cfg = ChunkerConfig::default();
        let text = "# A\nintro\n## B\nbody\n### C\ndeep";
        let chunks = dispatch(text, "md", cfg);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].header_context, "A");
        assert_eq!(chunks[1].header_context, "A > B");
        assert_eq!(chunks[2].header_context, "A > B > C");
    }

    #[test]
    fn code_splits_on_function_definitions() {
        let cfg = ChunkerConfig::default();
        let text = "import os\n\ndef foo():\n    pass\n\ndef bar():\n    pass\n";
        let chunks = dispatch(text, "py", cfg);
        assert!(chunks.iter().any(|c| c.header_context == "foo"));
        assert!(chunks.iter().any(|c| c.header_context == "bar"));
    }

    #[test]
    fn default_splits_on_blank_line_paragraphs() {
        let cfg = ChunkerConfig::default();
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let chunks = dispatch(text, "txt", cfg);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].header_context, "(paragraph 3)");
    }

    #[test]
    fn long_section_is_split_with_overlap_and_no_mid_word_break() {
        let cfg = ChunkerConfig {
            max_chunk_size: 50,
            overlap: 10,
        };
        let text = "word ".repeat(40);
        let chunks = dispatch(text.trim(), "txt", cfg);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.starts_with(' '));
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn text_preview_collapses_whitespace_and_truncates() {
        let long = "a".repeat(150);
        let text = format!("  hello\n\n  world   {}", long);
        let preview = text_preview(&text);
        assert_eq!(preview.chars().count(), 100);
        assert!(preview.starts_with("hello world"));
    }
}
