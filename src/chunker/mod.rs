//! Size-based, line-aligned splitting of log content.

use std::sync::Arc;
use thiserror::Error;

use crate::config::types::{ChunkingConfig, OversizedLinePolicy};
use crate::model::{Chunk, ChunkId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line} at byte {offset} is {length} bytes, over the {limit} byte chunk size")]
pub struct OversizedLineError {
    /// 1-based line number.
    pub line: usize,
    pub offset: usize,
    pub length: usize,
    pub limit: usize,
}

fn clamp_to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Splits `content` into chunks.
///
/// Content at or below the threshold comes back as a single chunk. Larger
/// content is packed line by line into chunks of at most `chunk_size` bytes.
/// The returned chunks always partition `content` exactly: contiguous,
/// non-overlapping, ordered, and split only after a `\n`.
pub fn chunk_log(content: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>, OversizedLineError> {
    let threshold = clamp_to_usize(config.threshold);
    let limit = clamp_to_usize(config.chunk_size).max(1);

    if content.len() <= threshold {
        return Ok(vec![make_chunk(content, 0, 0, content.len(), None)]);
    }

    let mut builder = ChunkBuilder::new(content);
    let mut start = 0;
    let mut offset = 0;

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let length = line.len();

        if length > limit {
            let truncated_to = match config.oversized_lines {
                OversizedLinePolicy::Reject => {
                    return Err(OversizedLineError {
                        line: index + 1,
                        offset,
                        length,
                        limit,
                    });
                }
                OversizedLinePolicy::Singleton => None,
                OversizedLinePolicy::Truncate => Some(floor_char_boundary(line, limit)),
            };

            tracing::warn!(
                line = index + 1,
                length,
                limit,
                policy = ?config.oversized_lines,
                "Oversized line placed in its own chunk"
            );

            builder.push(start, offset, None);
            builder.push(offset, offset + length, truncated_to);
            offset += length;
            start = offset;
            continue;
        }

        if offset + length - start > limit {
            builder.push(start, offset, None);
            start = offset;
        }
        offset += length;
    }

    builder.push(start, offset, None);

    let chunks = builder.finish();
    tracing::debug!(
        chunks = chunks.len(),
        bytes = content.len(),
        chunk_size = limit,
        "Split log into chunks"
    );
    Ok(chunks)
}

struct ChunkBuilder<'a> {
    content: &'a str,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            chunks: Vec::new(),
        }
    }

    /// Appends `[start, end)`; empty ranges are skipped.
    fn push(&mut self, start: usize, end: usize, truncated_to: Option<usize>) {
        if end <= start {
            return;
        }
        let id = self.chunks.len() as ChunkId;
        self.chunks
            .push(make_chunk(self.content, id, start, end, truncated_to));
    }

    fn finish(self) -> Vec<Chunk> {
        self.chunks
    }
}

fn make_chunk(
    content: &str,
    id: ChunkId,
    start: usize,
    end: usize,
    truncated_to: Option<usize>,
) -> Chunk {
    let analyzed_end = truncated_to.map_or(end, |limit| start + limit);
    Chunk {
        id,
        start_offset: start,
        end_offset: end,
        truncated_to,
        content: Arc::from(&content[start..analyzed_end]),
    }
}

/// Largest index `<= limit` that falls on a char boundary of `line`.
/// The text the run is categorized from: the whole log when it stays
/// unchunked, otherwise the lines that make up the first chunk.
pub fn categorization_sample<'a>(content: &'a str, config: &ChunkingConfig) -> &'a str {
    if content.len() <= clamp_to_usize(config.threshold) {
        return content;
    }

    let window = &content[..floor_char_boundary(content, clamp_to_usize(config.chunk_size).max(1))];
    match window.rfind('\n') {
        Some(end) => &content[..=end],
        // The first line alone exceeds the chunk size.
        None => window,
    }
}

fn floor_char_boundary(line: &str, limit: usize) -> usize {
    let mut end = limit.min(line.len());
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    end
}
