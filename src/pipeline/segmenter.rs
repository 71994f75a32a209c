//! Paragraph-aware splitting of a document into overlapping segments.
//!
//! Sizes and offsets are counted in characters. Consecutive segments share
//! exactly `overlap_size` characters, so dropping the trailing overlap of
//! every non-final segment and concatenating reproduces the input.

use crate::error::PipelineError;
use crate::models::Segment;
use tracing::debug;

const PARAGRAPH_BREAK: &str = "\n\n";

/// Split `text` into ordered segments of at most `max_size` characters.
///
/// A window boundary snaps to just after the last blank line found in its
/// final `overlap_size` characters. Empty text yields no segments.
pub fn segment(
    text: &str,
    max_size: usize,
    overlap_size: usize,
) -> Result<Vec<Segment<'_>>, PipelineError> {
    if max_size == 0 {
        return Err(PipelineError::SegmentationConfig(
            "max segment size must be at least 1".to_string(),
        ));
    }
    if overlap_size >= max_size {
        return Err(PipelineError::SegmentationConfig(format!(
            "overlap ({}) must be smaller than the max segment size ({})",
            overlap_size, max_size
        )));
    }

    // Byte position of every character, plus the end of the text.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = offsets.len() - 1;

    if char_len == 0 {
        return Ok(Vec::new());
    }

    let mut spans = Vec::new();
    let mut start = 0;
    loop {
        let raw_end = start + max_size;
        if raw_end >= char_len {
            spans.push((start, char_len));
            break;
        }
        let end = snap_to_paragraph(text, &offsets, start, raw_end, overlap_size);
        spans.push((start, end));
        start = end - overlap_size;
    }

    let total_count = spans.len();
    debug!(
        "Split {} chars into {} segment(s) (max {}, overlap {})",
        char_len, total_count, max_size, overlap_size
    );

    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Segment {
            index,
            total_count,
            text: &text[offsets[start]..offsets[end]],
            start_offset: start,
            end_offset: end,
        })
        .collect())
}

/// Pick the end of a non-final window.
///
/// The search region is clipped so the next segment starts strictly after
/// `start`.
fn snap_to_paragraph(
    text: &str,
    offsets: &[usize],
    start: usize,
    raw_end: usize,
    overlap_size: usize,
) -> usize {
    let min_break = raw_end
        .saturating_sub(overlap_size)
        .max((start + overlap_size + 1).saturating_sub(PARAGRAPH_BREAK.len()));
    if min_break >= raw_end {
        return raw_end;
    }

    let region = &text[offsets[min_break]..offsets[raw_end]];
    match region.rfind(PARAGRAPH_BREAK) {
        Some(byte) => {
            let absolute = offsets[min_break] + byte;
            match offsets.binary_search(&absolute) {
                Ok(char_index) => char_index + PARAGRAPH_BREAK.len(),
                Err(_) => raw_end,
            }
        }
        None => raw_end,
    }
}
