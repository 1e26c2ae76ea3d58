//! Markdown -> [`MetadataSnapshot`] extraction.
//!
//! Recognizes a leading YAML frontmatter block, ATX headings, `[[wiki]]`
//! links (including embeds) and relative markdown links. Fenced code blocks
//! are skipped. Line numbers are zero-based and count frontmatter lines.

use regex::Regex;
use std::sync::LazyLock;

use crate::vault::types::{Frontmatter, Heading, LinkRef, MetadataSnapshot};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").unwrap());
static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[\[([^\]\n]+)\]\]").unwrap());
static MDLINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]\n]*\]\(([^)\s]+)(?:\s+[^)]*)?\)").unwrap());

/// Parse a document into a snapshot.
pub fn parse_snapshot(content: &str) -> Result<MetadataSnapshot, serde_yaml::Error> {
    let lines: Vec<&str> = content.lines().collect();
    let (yaml, body_start) = split_frontmatter(&lines);
    let frontmatter = match yaml {
        Some(yaml) => Frontmatter::from_yaml(&yaml)?,
        None => Frontmatter::default(),
    };

    let mut headings = Vec::new();
    let mut links = Vec::new();
    let mut fence: Option<&str> = None;

    for (line_no, line) in lines.iter().enumerate().skip(body_start) {
        let trimmed = line.trim_start();
        if let Some(open) = fence {
            if trimmed.starts_with(open) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") {
            fence = Some("```");
            continue;
        }
        if trimmed.starts_with("~~~") {
            fence = Some("~~~");
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            headings.push(Heading {
                text: caps[2].to_string(),
                level: caps[1].len() as u8,
                line: line_no,
            });
        }
        links.extend(extract_links(line, line_no));
    }

    Ok(MetadataSnapshot {
        frontmatter,
        headings,
        links,
    })
}

/// Returns the frontmatter YAML (if any) and the index of the first body line.
fn split_frontmatter(lines: &[&str]) -> (Option<String>, usize) {
    if lines.first().map(|line| line.trim_end()) != Some("---") {
        return (None, 0);
    }
    let close = lines
        .iter()
        .skip(1)
        .position(|line| matches!(line.trim_end(), "---" | "..."));
    match close {
        Some(offset) => {
            let close = offset + 1;
            (Some(lines[1..close].join("\n")), close + 1)
        }
        None => (None, 0),
    }
}

fn extract_links(line: &str, line_no: usize) -> Vec<LinkRef> {
    let mut found: Vec<(usize, String)> = WIKILINK_RE
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps[1].trim().to_string()))
        })
        .collect();

    for caps in MDLINK_RE.captures_iter(line) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let target = target.as_str();
        if target.contains("://") || target.starts_with("mailto:") || target.starts_with('#') {
            continue;
        }
        found.push((whole.start(), target.replace("%20", " ")));
    }

    found.sort_by_key(|(start, _)| *start);
    found
        .into_iter()
        .filter(|(_, target)| !target.is_empty())
        .map(|(_, target)| LinkRef::new(target, line_no))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "---\ntype: Task\nstatus: Active\ntags:\n  - work\n---\n# Plan\n\nSee [[Alpha]] and [the design](docs/Spec%20One.md).\n\n```\n# not a heading [[Ignored]]\n```\n## Next steps ##\n- [ ] ping ![[Diagram.png]] or [site](https://example.com)\n";

    #[test]
    fn test_parse_frontmatter_fields() {
        let snapshot = parse_snapshot(NOTE).unwrap();
        assert_eq!(snapshot.frontmatter.get_str("type"), Some("Task"));
        assert_eq!(snapshot.frontmatter.get_str("status"), Some("Active"));
        assert!(snapshot.frontmatter.get("tags").unwrap().is_sequence());
    }

    #[test]
    fn test_parse_headings_with_lines() {
        let snapshot = parse_snapshot(NOTE).unwrap();
        let headings: Vec<_> = snapshot
            .headings
            .iter()
            .map(|h| (h.text.as_str(), h.level, h.line))
            .collect();
        assert_eq!(headings, vec![("Plan", 1, 6), ("Next steps", 2, 13)]);
    }

    #[test]
    fn test_parse_links_skips_code_and_urls() {
        let snapshot = parse_snapshot(NOTE).unwrap();
        let links: Vec<_> = snapshot
            .links
            .iter()
            .map(|l| (l.target.as_str(), l.line))
            .collect();
        assert_eq!(
            links,
            vec![("Alpha", 8), ("docs/Spec One.md", 8), ("Diagram.png", 14)]
        );
    }

    #[test]
    fn test_no_frontmatter() {
        let snapshot = parse_snapshot("plain text\n# Title").unwrap();
        assert!(snapshot.frontmatter.is_empty());
        assert_eq!(snapshot.headings[0].line, 1);
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        let snapshot = parse_snapshot("---\ntype: Task\n# Title").unwrap();
        assert!(snapshot.frontmatter.is_empty());
        assert_eq!(snapshot.headings.len(), 1);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(parse_snapshot("---\ntype: [unclosed\n---\n").is_err());
    }
}
