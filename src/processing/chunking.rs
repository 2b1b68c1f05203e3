//! Math-aware chunking of document transcripts.
//!
//! Chunking runs in three phases:
//!
//! - Mask: every `$$...$$` block and `$...$` inline span is swapped for an opaque placeholder
//!   that contains no whitespace or punctuation, so no split rule can land inside it.
//! - Split: a recursive splitter prefers paragraph breaks, then sentence ends, then whitespace,
//!   and only then single characters (placeholders stay atomic even there). Pieces are merged
//!   greedily up to the size budget with a piece-granular overlap.
//! - Unmask: placeholders are restored in each chunk.
//!
//! Sizes are always measured on the unmasked text, in characters or in tokens (`tiktoken-rs`).
//! Math detection is regex based and therefore heuristic: a pair of `$` used as currency is
//! treated as an inline span.

use anyhow::Error as TokenizerError;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::ChunkingError;
use crate::layout::has_math_signal;

/// Counts the size of a text segment in the configured unit.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

static MATH_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\$\$.+?\$\$|\$[^$]+\$").unwrap());
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").unwrap());
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Unit in which chunk size and overlap are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    Chars,
    /// BPE tokens of the configured model.
    Tokens,
}

impl std::str::FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Size budget for [`MathAwareChunker`].
#[derive(Debug, Clone)]
pub struct ChunkingSettings {
    /// Target upper bound per chunk.
    pub chunk_size: usize,
    /// Amount of trailing text repeated at the start of the next chunk.
    pub overlap: usize,
    /// Unit of `chunk_size` and `overlap`.
    pub unit: ChunkUnit,
    /// Model whose tokenizer is used when `unit` is [`ChunkUnit::Tokens`].
    pub tokenizer_model: String,
}

impl ChunkingSettings {
    /// Default chunk size in characters.
    pub const DEFAULT_CHUNK_SIZE: usize = 750;
    /// Default overlap in characters.
    pub const DEFAULT_OVERLAP: usize = 20;
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            overlap: Self::DEFAULT_OVERLAP,
            unit: ChunkUnit::Chars,
            tokenizer_model: String::new(),
        }
    }
}

/// One contiguous slice of a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// One-based position within the document.
    pub index: usize,
    /// Chunk text with math spans restored.
    pub text: String,
    /// Whether the chunk carries math spans or math indicator characters.
    pub has_math: bool,
}

/// Splits transcripts into bounded chunks without fracturing math spans.
#[derive(Clone)]
pub struct MathAwareChunker {
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl std::fmt::Debug for MathAwareChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MathAwareChunker")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl MathAwareChunker {
    /// Build a chunker from settings, loading a tokenizer when sizes are measured in tokens.
    pub fn new(settings: &ChunkingSettings) -> Result<Self, ChunkingError> {
        let counter = match settings.unit {
            ChunkUnit::Chars => char_counter(),
            ChunkUnit::Tokens => build_token_counter(&settings.tokenizer_model),
        };
        Self::with_counter(settings.chunk_size, settings.overlap, counter)
    }

    /// Build a chunker with an explicit size counter.
    pub fn with_counter(
        chunk_size: usize,
        overlap: usize,
        counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap: overlap.min(chunk_size.saturating_sub(1)),
            counter,
        })
    }

    /// Split `text` into ordered chunks numbered from 1. Blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let masked = MaskedText::new(text);
        let pieces = self.split_recursive(&masked, &masked.text, SplitLevel::Paragraph);
        let merged = self.merge(&masked, pieces);

        merged
            .into_iter()
            .filter_map(|segment| {
                let restored = masked.restore(&segment);
                let trimmed = restored.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    let contains_span = segment.contains(PLACEHOLDER_OPEN);
                    Some((trimmed.to_string(), contains_span))
                }
            })
            .enumerate()
            .map(|(position, (text, contains_span))| Chunk {
                index: position + 1,
                has_math: contains_span || has_math_signal(&text),
                text,
            })
            .collect()
    }

    fn size(&self, masked: &MaskedText, segment: &str) -> usize {
        self.counter.as_ref()(&masked.restore(segment))
    }

    fn split_recursive<'a>(
        &self,
        masked: &MaskedText,
        segment: &'a str,
        level: SplitLevel,
    ) -> Vec<&'a str> {
        if self.size(masked, segment) <= self.chunk_size {
            return vec![segment];
        }

        let parts = match level.pattern() {
            Some(pattern) => split_after(segment, pattern),
            None => atoms(segment),
        };

        let Some(next) = level.next() else {
            return parts;
        };
        if parts.len() <= 1 {
            return self.split_recursive(masked, segment, next);
        }

        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            if self.size(masked, part) <= self.chunk_size {
                pieces.push(part);
            } else {
                pieces.extend(self.split_recursive(masked, part, next));
            }
        }
        pieces
    }

    fn merge(&self, masked: &MaskedText, pieces: Vec<&str>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let size = self.size(masked, piece);
            if total + size > self.chunk_size && !window.is_empty() {
                chunks.push(window.iter().map(|(text, _)| *text).collect::<String>());
                while total > self.overlap || (total + size > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, size));
            total += size;
        }

        if !window.is_empty() {
            chunks.push(window.iter().map(|(text, _)| *text).collect::<String>());
        }
        chunks
    }
}

#[derive(Debug, Clone, Copy)]
enum SplitLevel {
    Paragraph,
    Sentence,
    Word,
    Character,
}

impl SplitLevel {
    fn pattern(self) -> Option<&'static Regex> {
        match self {
            Self::Paragraph => Some(&PARAGRAPH_BREAK),
            Self::Sentence => Some(&SENTENCE_END),
            Self::Word => Some(&WHITESPACE),
            Self::Character => None,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Paragraph => Some(Self::Sentence),
            Self::Sentence => Some(Self::Word),
            Self::Word => Some(Self::Character),
            Self::Character => None,
        }
    }
}

/// Cut `text` after every match of `pattern`, keeping separators attached to the left piece.
fn split_after<'a>(text: &'a str, pattern: &Regex) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for found in pattern.find_iter(text) {
        if found.end() > start && found.end() < text.len() {
            parts.push(&text[start..found.end()]);
            start = found.end();
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Single characters, except that a placeholder is kept whole.
fn atoms(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        let mut end = start + ch.len_utf8();
        if ch == PLACEHOLDER_OPEN {
            for (offset, inner) in chars.by_ref() {
                end = offset + inner.len_utf8();
                if inner == PLACEHOLDER_CLOSE {
                    break;
                }
            }
        }
        parts.push(&text[start..end]);
    }
    parts
}

/// Transcript with math spans replaced by placeholders.
struct MaskedText {
    text: String,
    spans: Vec<String>,
}

impl MaskedText {
    fn new(source: &str) -> Self {
        let mut spans = Vec::new();
        let text = MATH_SPAN
            .replace_all(source, |captures: &Captures<'_>| {
                let placeholder = format!("{PLACEHOLDER_OPEN}{}{PLACEHOLDER_CLOSE}", spans.len());
                spans.push(captures[0].to_string());
                placeholder
            })
            .into_owned();
        Self { text, spans }
    }

    fn restore<'a>(&self, segment: &'a str) -> Cow<'a, str> {
        if self.spans.is_empty() || !segment.contains(PLACEHOLDER_OPEN) {
            return Cow::Borrowed(segment);
        }
        PLACEHOLDER.replace_all(segment, |captures: &Captures<'_>| {
            captures[1]
                .parse::<usize>()
                .ok()
                .and_then(|position| self.spans.get(position))
                .cloned()
                .unwrap_or_else(|| captures[0].to_string())
        })
    }
}

/// Whether `text` holds a math span or enough math indicator characters.
pub fn contains_math(text: &str) -> bool {
    MATH_SPAN.is_match(text) || has_math_signal(text)
}

/// Count Unicode scalar values.
pub fn char_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

/// Build a token counter for `model`, falling back to whitespace counting when no
/// tokenizer can be loaded.
pub fn build_token_counter(model: &str) -> TokenCounter {
    match build_tiktoken_counter(model) {
        Ok(counter) => counter,
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_counter()
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> MathAwareChunker {
        MathAwareChunker::with_counter(size, overlap, char_counter()).expect("chunker")
    }

    fn spans(text: &str) -> Vec<String> {
        MATH_SPAN
            .find_iter(text)
            .map(|found| found.as_str().to_string())
            .collect()
    }

    fn assert_no_fractured_math(chunks: &[Chunk]) {
        for chunk in chunks {
            let without_spans = MATH_SPAN.replace_all(&chunk.text, "");
            assert!(
                !without_spans.contains('$'),
                "chunk fractures a math span: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn formula_near_split_point_stays_whole() {
        let text = "Intro text. $$x^2+y^2=1$$ More text.";
        let chunks = chunker(20, 0).chunk(text);

        assert!(chunks.len() > 1);
        let holders: Vec<&Chunk> = chunks
            .iter()
            .filter(|chunk| chunk.text.contains("$$x^2+y^2=1$$"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].has_math);
        assert_no_fractured_math(&chunks);
    }

    #[test]
    fn math_spans_survive_every_budget() {
        let text = "We study $f(x) = x^2$ on $[0, 1]$.\n\nTheorem. For all $n \\ge 1$ we have\n$$\\sum_{k=1}^{n} k = \\frac{n(n+1)}{2}$$\nwhich is classical. The integral $\\int_0^1 f = 1/3$ follows. Finally $a$ and $b$ commute.";
        let expected = spans(text);
        assert_eq!(expected.len(), 7);

        for size in [4, 9, 16, 25, 40, 80, 400] {
            for overlap in [0, 3, 12] {
                let chunks = chunker(size, overlap).chunk(text);
                assert_no_fractured_math(&chunks);
                for span in &expected {
                    assert!(
                        chunks.iter().any(|chunk| chunk.text.contains(span.as_str())),
                        "span {span:?} missing at size {size} overlap {overlap}"
                    );
                }
            }
        }
    }

    #[test]
    fn without_overlap_each_span_lands_in_exactly_one_chunk() {
        let text = "Let $a$ be fixed. Then $$a^2 \\ge 0$$ holds. Also $b = a + 1$ by definition.";
        let chunks = chunker(18, 0).chunk(text);
        for span in spans(text) {
            let count = chunks
                .iter()
                .filter(|chunk| chunk.text.contains(span.as_str()))
                .count();
            assert_eq!(count, 1, "span {span:?}");
        }
    }

    #[test]
    fn oversized_formula_becomes_its_own_chunk() {
        let formula = "$$\\frac{a+b}{c+d} = \\frac{e}{f}$$";
        let text = format!("Short. {formula} Tail.");
        let chunks = chunker(10, 0).chunk(&text);
        assert!(chunks.iter().any(|chunk| chunk.text == formula));
        assert_no_fractured_math(&chunks);
    }

    #[test]
    fn chunks_are_numbered_contiguously_from_one() {
        let text = "Sentence one is here. Sentence two is here. Sentence three is here.\n\nNew paragraph with words.";
        let chunks = chunker(25, 0).chunk(text);
        let indexes: Vec<usize> = chunks.iter().map(|chunk| chunk.index).collect();
        let expected: Vec<usize> = (1..=chunks.len()).collect();
        assert_eq!(indexes, expected);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 25));
    }

    #[test]
    fn paragraph_breaks_are_preferred() {
        let text = "First paragraph text.\n\nSecond paragraph text.";
        let chunks = chunker(30, 0).chunk(text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph text.");
        assert_eq!(chunks[1].text, "Second paragraph text.");
    }

    #[test]
    fn overlap_repeats_trailing_words() {
        let text = "alpha beta gamma delta epsilon zeta";
        let chunks: Vec<String> = chunker(12, 6)
            .chunk(text)
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        assert_eq!(
            chunks,
            vec!["alpha beta", "beta gamma", "gamma delta", "epsilon zeta"]
        );
    }

    #[test]
    fn prose_math_symbols_set_has_math() {
        let chunks = chunker(200, 0).chunk("Bound: x ≤ y and y = z.");
        assert!(chunks[0].has_math);
        let plain = chunker(200, 0).chunk("A plain sentence about history.");
        assert!(!plain[0].has_math);
    }

    #[test]
    fn blank_input_yields_no_chunks() {
        assert!(chunker(10, 0).chunk("  \n\n ").is_empty());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let error = MathAwareChunker::with_counter(0, 0, char_counter()).expect_err("invalid");
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn unit_parses_from_env_values() {
        assert_eq!("Tokens".parse::<ChunkUnit>(), Ok(ChunkUnit::Tokens));
        assert_eq!("chars".parse::<ChunkUnit>(), Ok(ChunkUnit::Chars));
        assert!("words".parse::<ChunkUnit>().is_err());
    }

    #[test]
    fn token_unit_respects_tiktoken_budget() {
        let settings = ChunkingSettings {
            chunk_size: 5,
            overlap: 0,
            unit: ChunkUnit::Tokens,
            tokenizer_model: "text-embedding-3-small".into(),
        };
        let text = "The quick brown fox jumps over the lazy dog.";
        let chunks = MathAwareChunker::new(&settings).expect("chunker").chunk(text);
        let counter = build_token_counter("text-embedding-3-small");
        for chunk in &chunks {
            assert!(counter.as_ref()(&chunk.text) <= 5);
        }
        let words: Vec<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.text.split_whitespace())
            .collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }
}
