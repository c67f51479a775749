//! Line-grouping text chunker for log files.
//!
//! Splits document text into ordered [`Chunk`]s no larger than `max_size`.
//! The size unit is explicit and chosen in configuration:
//!
//! - [`ChunkUnit::Chars`] (default): whitespace-only lines are dropped, the
//!   remaining trimmed lines are joined with single spaces and grouped
//!   greedily while the joined chunk stays within `max_size` characters
//!   (Unicode scalar values, separators included). A single line longer than
//!   the budget is hard-split, preferring a space boundary. This bounds
//!   embedding cost per chunk and keeps log lines whole where possible.
//! - [`ChunkUnit::Words`]: the text is split on whitespace and every
//!   `max_size` consecutive words form one chunk. Line structure is ignored.
//!
//! The two policies are not merged. Both are deterministic pure functions of
//! their input. At most `max_chunks` chunks are produced per call; the
//! overflow is dropped.

use serde::Deserialize;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Unit in which `max_size` is measured.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Chars,
    Words,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    unit: ChunkUnit,
    max_size: usize,
    max_chunks: usize,
}

impl Chunker {
    pub fn new(unit: ChunkUnit, max_size: usize, max_chunks: usize) -> Self {
        Self {
            unit,
            max_size: max_size.max(1),
            max_chunks,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.unit, config.max_size, config.max_chunks)
    }

    pub fn unit(&self) -> ChunkUnit {
        self.unit
    }

    /// Split `text` into ordered, non-empty chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let pieces = match self.unit {
            ChunkUnit::Chars => chunk_by_chars(text, self.max_size, self.max_chunks),
            ChunkUnit::Words => chunk_by_words(text, self.max_size, self.max_chunks),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk { ordinal, text })
            .collect()
    }
}

fn chunk_by_chars(text: &str, max_chars: usize, max_chunks: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.lines() {
        if chunks.len() >= max_chunks {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_len = line.chars().count();

        if line_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            for piece in hard_split(line, max_chars) {
                chunks.push(piece);
            }
            continue;
        }

        // +1 for the joining space
        let would_be = if current.is_empty() {
            line_len
        } else {
            current_len + 1 + line_len
        };

        if would_be > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks.truncate(max_chunks);
    chunks
}

/// Split one overlong line into pieces of at most `max_chars` characters,
/// breaking at the last space inside the window when there is one.
fn hard_split(line: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = line;

    while !remaining.is_empty() {
        let window_end = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let split_at = if window_end < remaining.len() {
            match remaining[..window_end].rfind(' ') {
                Some(pos) if pos > 0 => pos + 1,
                _ => window_end,
            }
        } else {
            window_end
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    pieces
}

fn chunk_by_words(text: &str, max_words: usize, max_chunks: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words)
        .take(max_chunks)
        .map(|group| group.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(max: usize) -> Chunker {
        Chunker::new(ChunkUnit::Chars, max, 2000)
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chars(512).chunk("ERROR pod-7 auth failed\nERROR pod-7 auth failed\nINFO ok");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(
            chunks[0].text,
            "ERROR pod-7 auth failed ERROR pod-7 auth failed INFO ok"
        );
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chars(512).chunk("").is_empty());
        assert!(chars(512).chunk("\n   \n\t\n").is_empty());
        assert!(Chunker::new(ChunkUnit::Words, 5, 10).chunk("  \n ").is_empty());
    }

    #[test]
    fn test_blank_lines_do_not_count_toward_budget() {
        let text = "aaaa\n\n\n\n\nbbbb";
        let chunks = chars(9).chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "aaaa bbbb");
    }

    #[test]
    fn test_lines_grouped_within_budget() {
        let text = "line one\nline two\nline three\nline four";
        let chunks = chars(20).chunk(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "line one line two");
        assert_eq!(chunks[1].text, "line three line four");
        for c in &chunks {
            assert!(c.text.chars().count() <= 20);
        }
    }

    #[test]
    fn test_overlong_line_hard_split() {
        let line = "word ".repeat(40);
        let chunks = chars(32).chunk(&line);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.is_empty());
            assert!(c.text.chars().count() <= 32, "chunk too long: {:?}", c.text);
        }
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.text.split(' ')).collect();
        assert_eq!(rejoined.len(), 40);
    }

    #[test]
    fn test_hard_split_without_spaces_respects_char_boundaries() {
        let line = "é".repeat(25);
        let chunks = chars(10).chunk(&line);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.chars().count(), 10);
        assert_eq!(chunks[2].text.chars().count(), 5);
    }

    #[test]
    fn test_order_preserved_and_ordinals_contiguous() {
        let text = (0..200)
            .map(|i| format!("2024-01-01T00:00:{:02}Z INFO request {} served", i % 60, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chars(100).chunk(&text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
        }
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let expected = text.lines().collect::<Vec<_>>().join(" ");
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_chunk_cap_drops_overflow() {
        let text = (0..50).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let chunker = Chunker::new(ChunkUnit::Chars, 7, 5);
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].text, "line 0");
        assert_eq!(chunks[4].text, "line 4");
    }

    #[test]
    fn test_words_mode() {
        let chunker = Chunker::new(ChunkUnit::Words, 3, 100);
        let chunks = chunker.chunk("a b c\n\nd e f g\nh");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c", "d e f", "g h"]);
    }

    #[test]
    fn test_words_mode_cap() {
        let text = "w ".repeat(100);
        let chunks = Chunker::new(ChunkUnit::Words, 10, 4).chunk(&text);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\nBeta\n\nGamma delta epsilon\nZeta";
        let c1 = chars(8).chunk(text);
        let c2 = chars(8).chunk(text);
        assert_eq!(c1, c2);
    }
}
