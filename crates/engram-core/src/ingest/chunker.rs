//! Paragraph-boundary chunker
//!
//! Splits document text into chunks around a soft target length. Paragraph
//! boundaries are preferred; an oversized paragraph is split at sentence
//! boundaries, never mid-sentence.

/// Chunking parameters
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Soft target chunk length in characters
    pub target_len: usize,
    /// A single paragraph longer than this is split by sentence
    pub max_paragraph_len: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_len: 1000,
            max_paragraph_len: 2000,
        }
    }
}

/// One chunk of a source document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Zero-based position within the document
    pub index: usize,
    /// Total chunks the document produced
    pub total: usize,
    /// Chunk text
    pub text: String,
    /// Markdown heading path covering this chunk (outermost first)
    pub heading_path: Vec<String>,
}

/// Split text into chunks, tracking markdown headings
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let mut pieces: Vec<(String, Vec<String>)> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_headings: Vec<String> = Vec::new();
    let mut headings: Vec<(usize, String)> = Vec::new();

    let mut flush = |buffer: &mut String, headings: &[String], pieces: &mut Vec<_>| {
        let trimmed = buffer.trim();
        if !trimmed.is_empty() {
            pieces.push((trimmed.to_string(), headings.to_vec()));
        }
        buffer.clear();
    };

    for paragraph in split_paragraphs(text) {
        if let Some((level, title)) = parse_heading(paragraph) {
            // A heading starts a new chunk under the updated path
            flush(&mut buffer, &buffer_headings, &mut pieces);
            headings.retain(|(l, _)| *l < level);
            headings.push((level, title));
            buffer_headings = headings.iter().map(|(_, t)| t.clone()).collect();
            continue;
        }

        let blocks = if paragraph.len() > config.max_paragraph_len {
            pack_sentences(paragraph, config.target_len)
        } else {
            vec![paragraph.to_string()]
        };

        for block in blocks {
            if !buffer.is_empty() && buffer.len() + block.len() + 2 > config.target_len {
                flush(&mut buffer, &buffer_headings, &mut pieces);
                buffer_headings = headings.iter().map(|(_, t)| t.clone()).collect();
            }
            if !buffer.is_empty() {
                buffer.push_str("\n\n");
            }
            buffer.push_str(&block);
        }
    }
    flush(&mut buffer, &buffer_headings, &mut pieces);

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, (text, heading_path))| Chunk {
            index,
            total,
            text,
            heading_path,
        })
        .collect()
}

/// Split on blank lines
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parse a markdown ATX heading line
fn parse_heading(paragraph: &str) -> Option<(usize, String)> {
    let line = paragraph.lines().next()?.trim_start();
    if paragraph.lines().count() != 1 {
        return None;
    }
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let title = line[level..].trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title.to_string()))
}

/// Pack sentences of an oversized paragraph into target-length blocks
fn pack_sentences(paragraph: &str, target_len: usize) -> Vec<String> {
    let sentences = split_sentences(paragraph);
    let mut blocks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if !current.is_empty() && current.len() + sentence.len() + 1 > target_len {
            blocks.push(current.trim().to_string());
            current = String::new();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    if !current.trim().is_empty() {
        blocks.push(current.trim().to_string());
    }
    blocks
}

/// Split a paragraph into sentences at terminal punctuation
///
/// A boundary is `.`, `!`, or `?` followed by whitespace and an uppercase
/// letter, so abbreviations and decimals mostly survive.
pub fn split_sentences(paragraph: &str) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let boundary = j > i + 1 && j < chars.len() && chars[j].is_uppercase();
            if boundary {
                let sentence: String = chars[start..=i].iter().collect();
                let trimmed = sentence.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }

    let tail: String = chars[start..].iter().collect();
    let tail = tail.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

// ============================================================================
// TESTS
// ============================================================================
