//! Overlapping-window text chunker with page attribution.
//!
//! Splits extracted document text into overlapping [`Chunk`]s that respect
//! a configurable target size. Chunk ends are pulled back to the best
//! available break point so records and sentences are not severed
//! mid-thought, with extra care for financial documents (bank statements,
//! transaction exports) where a multi-line transaction record should stay
//! inside one chunk.
//!
//! # Algorithm
//!
//! 1. Scan the first ~3000 characters for financial vocabulary, monetary
//!    amounts, and date patterns. If the document looks financial, widen
//!    the target size and overlap so transaction records survive intact.
//! 2. Walk the text left to right. Each chunk's nominal end is
//!    `start + target_size`, adjusted to the best break point in priority
//!    order: transaction boundary (financial documents only), paragraph
//!    break (`\n\n`), line break, sentence-ending period. Break points are
//!    never accepted earlier than ~25% into the chunk; if none qualifies,
//!    the raw nominal end is used (a mid-word cut beats an endless search).
//! 3. Trim whitespace from each slice; empty slices are skipped, not
//!    emitted. Offsets always describe the raw slice so chunk spans tile
//!    the input.
//! 4. Estimate each chunk's page from the document-wide characters-per-page
//!    average: the chunk is attributed to whichever page holds the larger
//!    share of its span, clamped to `[1, total_pages]`.
//! 5. Advance `start` to `end - overlap`. `overlap < target_size` is a hard
//!    precondition (checked up front), so the walk always terminates.
//!
//! Chunking is a pure function of its inputs: identical arguments yield
//! byte-identical output.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ContentFlags};

/// How much of the document head is sampled for financial detection.
const DETECTION_SAMPLE_BYTES: usize = 3000;

/// Break points are rejected before this fraction of the chunk (1/4).
const MIN_BREAK_DIVISOR: usize = 4;

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[$€£]\s?\d[\d,]*(?:\.\d{2})?|\b\d{1,3}(?:,\d{3})*\.\d{2}\b").unwrap()
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b\d{4}-\d{2}-\d{2}\b|\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}\b",
    )
    .unwrap()
});

/// A line that starts like a transaction record: a leading date or a
/// transaction keyword.
static TRANSACTION_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?|pos|ach|atm|debit|credit|payment|deposit|withdrawal|transfer|check|fee|interest)\b",
    )
    .unwrap()
});

static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\baccount\s*(?:no\.?|number|#|ending)|\b(?:x{2,}|\*{2,})\d{2,4}\b|\brouting\s+number\b|\biban\b")
        .unwrap()
});

const FINANCIAL_KEYWORDS: &[&str] = &[
    "balance",
    "transaction",
    "account",
    "deposit",
    "withdrawal",
    "statement",
    "payment",
    "credit",
    "debit",
    "interest",
];

/// Split `text` into overlapping chunks with page attribution.
///
/// `total_pages <= 0` is treated as a single page. Returns
/// [`PipelineError::InvalidConfiguration`] if `target_size` is zero or
/// `overlap >= target_size` (which would make the walk non-terminating).
///
/// Text shorter than `target_size` yields a single chunk; empty or
/// whitespace-only text yields no chunks.
pub fn chunk_text(
    text: &str,
    target_size: usize,
    overlap: usize,
    total_pages: i64,
) -> Result<Vec<Chunk>> {
    if target_size == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "chunk target_size must be > 0".to_string(),
        ));
    }
    if overlap >= target_size {
        return Err(PipelineError::InvalidConfiguration(format!(
            "chunk overlap ({}) must be < target_size ({})",
            overlap, target_size
        )));
    }

    let total_pages = if total_pages <= 0 { 1 } else { total_pages as u32 };
    let len = text.len();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let financial = is_financial(text);
    let (target_size, overlap) = if financial {
        // Larger windows keep multi-line transaction records whole.
        let widened = target_size + target_size / 2;
        (widened, (overlap * 2).min(widened / 3))
    } else {
        (target_size, overlap)
    };

    let chars_per_page = ((len + total_pages as usize - 1) / total_pages as usize).max(1);

    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut start = 0usize;

    loop {
        let nominal_end = snap_to_char_boundary(text, (start + target_size).min(len));
        let end = if nominal_end >= len {
            len
        } else {
            find_break(text, start, nominal_end, target_size, overlap, financial)
        };

        let slice = &text[start..end];
        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                start_offset: start,
                end_offset: end,
                estimated_page: estimate_page(start, end, chars_per_page, total_pages),
                chunk_index,
                flags: detect_flags(trimmed),
            });
            chunk_index += 1;
        }

        if end >= len {
            break;
        }
        let next = snap_to_char_boundary(text, end.saturating_sub(overlap));
        // The min-break floor guarantees end > start + overlap, so this
        // always advances; the guard only covers char-boundary snapping.
        start = if next > start { next } else { end };
    }

    Ok(chunks)
}

/// Heuristic financial-document detection over the document head.
///
/// A document is considered financial when several distinct financial
/// keywords appear, or when at least one keyword co-occurs with both a
/// monetary amount and a date pattern.
pub(crate) fn is_financial(text: &str) -> bool {
    let sample_end = snap_to_char_boundary(text, DETECTION_SAMPLE_BYTES.min(text.len()));
    let sample = &text[..sample_end];
    let lower = sample.to_lowercase();

    let keyword_hits = FINANCIAL_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();
    if keyword_hits >= 3 {
        return true;
    }

    keyword_hits >= 1 && AMOUNT_RE.is_match(sample) && DATE_RE.is_match(sample)
}

/// Find the best break point for a chunk spanning `[start, nominal_end)`.
///
/// Candidates are searched no earlier than `min_break` (roughly 25% into
/// the chunk, and never inside the overlap region, which would stall the
/// walk). Priority: transaction boundary (financial only, with a little
/// forward slack past the nominal end), then `\n\n`, then `\n`, then `.`.
fn find_break(
    text: &str,
    start: usize,
    nominal_end: usize,
    target_size: usize,
    overlap: usize,
    financial: bool,
) -> usize {
    let min_break = snap_to_char_boundary(
        text,
        start + (target_size / MIN_BREAK_DIVISOR).max(overlap + 1),
    );
    if min_break >= nominal_end {
        return nominal_end;
    }

    if financial {
        let slack_end = snap_to_char_boundary(text, (nominal_end + target_size / 10).min(text.len()));
        let window = &text[min_break..slack_end];
        let mut best: Option<usize> = None;
        for re in [&*TRANSACTION_LINE_RE, &*DATE_RE, &*AMOUNT_RE] {
            if let Some(m) = re.find_iter(window).last() {
                let abs = min_break + m.start();
                if best.map_or(true, |b| abs > b) {
                    best = Some(abs);
                }
            }
        }
        // Break *before* the record so it opens the next chunk.
        if let Some(abs) = best {
            if abs > min_break {
                return snap_to_char_boundary(text, abs);
            }
        }
    }

    let window = &text[min_break..nominal_end];
    if let Some(pos) = window.rfind("\n\n") {
        if pos > 0 {
            return min_break + pos;
        }
    }
    if let Some(pos) = window.rfind('\n') {
        if pos > 0 {
            return min_break + pos + 1;
        }
    }
    if let Some(pos) = window.rfind('.') {
        if pos > 0 {
            return snap_to_char_boundary(text, min_break + pos + 1);
        }
    }

    // Last resort: a mid-word cut beats searching forever.
    nominal_end
}

/// Attribute a chunk span to the page holding the larger share of it.
///
/// Pages are modeled as equal-width character bands (`chars_per_page`).
/// For spans straddling a band boundary, the band with the most overlap
/// wins (ties go to the earlier page). Result is clamped to
/// `[1, total_pages]`.
fn estimate_page(start: usize, end: usize, chars_per_page: usize, total_pages: u32) -> u32 {
    let first_band = start / chars_per_page;
    let last_band = end.saturating_sub(1) / chars_per_page;

    let band = if first_band == last_band {
        first_band
    } else {
        let mut best_band = first_band;
        let mut best_share = 0usize;
        for b in first_band..=last_band {
            let band_start = b * chars_per_page;
            let band_end = band_start + chars_per_page;
            let share = end.min(band_end) - start.max(band_start);
            if share > best_share {
                best_share = share;
                best_band = b;
            }
        }
        best_band
    };

    ((band + 1) as u32).clamp(1, total_pages)
}

/// Detect advisory content flags for a single chunk.
pub(crate) fn detect_flags(text: &str) -> ContentFlags {
    ContentFlags {
        contains_amounts: AMOUNT_RE.is_match(text),
        contains_dates: DATE_RE.is_match(text),
        contains_transactions: TRANSACTION_LINE_RE.is_match(text),
        contains_account_info: ACCOUNT_RE.is_match(text),
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
