//! Citation and link extraction
//!
//! Regex-level recognition of the citation shapes that matter for CITES
//! edges: numeric `[12]`, author-year `(Smith, 2020)`, bibtex keys
//! `@smith2020`, and wiki-style `[[Link]]`. Patterns are compiled once per
//! process.

use std::sync::OnceLock;

use regex::Regex;

/// Kinds of recognised citation tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationKind {
    /// `[12]`
    Numeric,
    /// `(Smith, 2020)` or `(Smith et al., 2020)`
    AuthorYear,
    /// `@smith2020`
    Bibtex,
    /// `[[Some Page]]`
    WikiLink,
}

/// One extracted citation token
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// What shape matched
    pub kind: CitationKind,
    /// Normalised lookup key (lowercased)
    pub key: String,
    /// The raw matched text
    pub raw: String,
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{1,4})\]").expect("static regex"))
}

fn author_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\(([A-Z][A-Za-z'\-]+)(?:\s+et\s+al\.?|\s*&\s*[A-Z][A-Za-z'\-]+)?,\s*(\d{4})\)",
        )
        .expect("static regex")
    })
}

fn bibtex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z][A-Za-z0-9_:\-]{2,})").expect("static regex"))
}

fn wiki_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").expect("static regex"))
}

/// Extract every citation token from a chunk of text
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();

    // Wiki links first so `[[12]]` is not re-matched as numeric
    for capture in wiki_re().captures_iter(text) {
        citations.push(Citation {
            kind: CitationKind::WikiLink,
            key: capture[1].trim().to_lowercase(),
            raw: capture[0].to_string(),
        });
    }

    let wiki_spans: Vec<(usize, usize)> = wiki_re()
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();
    let inside_wiki =
        |start: usize| wiki_spans.iter().any(|(s, e)| start >= *s && start < *e);

    for capture in numeric_re().captures_iter(text) {
        let span = capture.get(0).map(|m| m.start()).unwrap_or(0);
        if inside_wiki(span) {
            continue;
        }
        citations.push(Citation {
            kind: CitationKind::Numeric,
            key: capture[1].to_string(),
            raw: capture[0].to_string(),
        });
    }

    for capture in author_year_re().captures_iter(text) {
        citations.push(Citation {
            kind: CitationKind::AuthorYear,
            key: format!("{}{}", capture[1].to_lowercase(), &capture[2]),
            raw: capture[0].to_string(),
        });
    }

    for capture in bibtex_re().captures_iter(text) {
        citations.push(Citation {
            kind: CitationKind::Bibtex,
            key: capture[1].to_lowercase(),
            raw: capture[0].to_string(),
        });
    }

    citations
}

// ============================================================================
// TESTS
// ============================================================================
