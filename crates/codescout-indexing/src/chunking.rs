//! Token-window chunking
//!
//! Slides a fixed-size token window with overlap across a file's token
//! stream. Byte offsets of window boundaries come from decoding the token
//! prefix at each boundary (memoized per file); line numbers come from a
//! binary search over line-start offsets. Decoding per token is
//! deliberately avoided.

use codescout_embeddings::Tokenizer;
use std::collections::HashMap;

/// One contiguous token-window slice of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// 1-based first line
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
    /// Window width in tokens (`end_token - start_token`)
    pub token_count: usize,
}

/// Token-window chunker with clamped parameters
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    target_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Clamp rules: target is capped by the embedding request limit and
    /// at least 1; overlap is capped at `target - 1` so the window always
    /// advances.
    pub fn new(target_tokens: usize, overlap_tokens: usize, max_embedding_tokens: usize) -> Self {
        let target = target_tokens.min(max_embedding_tokens).max(1);
        let overlap = overlap_tokens.min(target.saturating_sub(1));
        Self {
            target_tokens: target,
            overlap_tokens: overlap,
        }
    }

    /// Effective window size after clamping
    pub const fn target_tokens(&self) -> usize {
        self.target_tokens
    }

    /// Effective overlap after clamping
    pub const fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Split content into overlapping token windows.
    ///
    /// Empty content, or content that tokenizes to nothing, yields no
    /// chunks. A window of exactly `target_tokens` yields one chunk.
    pub fn chunk(&self, content: &str, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
        let tokens = tokenizer.encode(content);
        if tokens.is_empty() {
            return Vec::new();
        }

        let line_starts = line_start_offsets(content);
        // Boundary memo: token index -> byte offset. Ends are known.
        let mut offsets: HashMap<usize, usize> = HashMap::new();
        offsets.insert(0, 0);
        offsets.insert(tokens.len(), content.len());

        let step = self.target_tokens.saturating_sub(self.overlap_tokens).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let end = start.saturating_add(self.target_tokens).min(tokens.len());
            let byte_start = boundary_offset(tokenizer, &tokens, start, content.len(), &mut offsets);
            let byte_end = boundary_offset(tokenizer, &tokens, end, content.len(), &mut offsets);

            if byte_end > byte_start
                && let Some(text) = content.get(byte_start..byte_end)
            {
                chunks.push(Chunk {
                    text: text.to_string(),
                    start_line: line_for_offset(&line_starts, byte_start),
                    end_line: line_for_offset(&line_starts, byte_end.saturating_sub(1)),
                    token_count: end.saturating_sub(start),
                });
            }

            if end == tokens.len() {
                break;
            }
            start = start.saturating_add(step);
        }

        chunks
    }
}

/// Byte offset of a token boundary, by decoding the token prefix.
///
/// BPE merges can split a multi-byte character across a boundary; when
/// the prefix fails to decode, the boundary is nudged forward token by
/// token until it lands on a character edge.
fn boundary_offset(
    tokenizer: &dyn Tokenizer,
    tokens: &[u32],
    index: usize,
    content_len: usize,
    memo: &mut HashMap<usize, usize>,
) -> usize {
    if let Some(&offset) = memo.get(&index) {
        return offset;
    }

    let mut probe = index;
    while probe <= tokens.len() {
        if let Some(prefix) = tokens.get(..probe).and_then(|t| tokenizer.decode(t)) {
            let offset = prefix.len().min(content_len);
            memo.insert(index, offset);
            return offset;
        }
        probe = probe.saturating_add(1);
    }

    memo.insert(index, content_len);
    content_len
}

/// Byte offsets where lines start: 0, then one past each newline
fn line_start_offsets(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, byte) in content.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(i.saturating_add(1));
        }
    }
    starts
}

/// 1-based line containing a byte offset, by binary search
fn line_for_offset(line_starts: &[usize], offset: usize) -> usize {
    line_starts.partition_point(|&start| start <= offset).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_embeddings::{MockTokenizerProvider, TokenizerProvider};
    use std::sync::Arc;

    fn tokenizer() -> Arc<dyn Tokenizer> {
        MockTokenizerProvider::new().tokenizer("any").unwrap()
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        let chunker = Chunker::new(10, 2, 100);
        assert!(chunker.chunk("", tokenizer().as_ref()).is_empty());
    }

    #[test]
    fn test_exactly_target_tokens_is_one_chunk() {
        // Char tokenizer: 10 chars = 10 tokens
        let chunker = Chunker::new(10, 2, 100);
        let chunks = chunker.chunk("abcdefghij", tokenizer().as_ref());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[0].token_count, 10);
    }

    #[test]
    fn test_target_plus_one_is_two_chunks_with_overlap() {
        let chunker = Chunker::new(10, 2, 100);
        let content = "abcdefghijk"; // 11 tokens
        let chunks = chunker.chunk(content, tokenizer().as_ref());
        assert_eq!(chunks.len(), 2);
        // Second window begins at target - overlap = 8
        assert_eq!(chunks[1].text, "ijk");
        assert_eq!(chunks[0].token_count, 10);
        assert_eq!(chunks[1].token_count, 3);
    }

    #[test]
    fn test_overlap_ge_target_clamps_to_target_minus_one() {
        let chunker = Chunker::new(5, 9, 100);
        assert_eq!(chunker.overlap_tokens(), 4);
        // Step of 1: windows advance one token at a time and terminate
        let chunks = chunker.chunk("abcdefg", tokenizer().as_ref());
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].text, "abcde");
        assert_eq!(chunks[1].text, "bcdef");
    }

    #[test]
    fn test_target_clamped_by_embedding_limit() {
        let chunker = Chunker::new(500, 10, 8);
        assert_eq!(chunker.target_tokens(), 8);
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let chunker = Chunker::new(100, 0, 1000);
        let content = "line one\nline two\nline three";
        let chunks = chunker.chunk(content, tokenizer().as_ref());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_window_line_ranges() {
        let chunker = Chunker::new(10, 0, 1000);
        // 10 chars per line including newline: each window is one line
        let content = "aaaaaaaaa\nbbbbbbbbb\nccccccccc";
        let chunks = chunker.chunk(content, tokenizer().as_ref());
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 2));
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (3, 3));
    }

    #[test]
    fn test_chunks_reassemble_content_without_overlap() {
        let chunker = Chunker::new(7, 0, 1000);
        let content = "fn main() { println!(\"hi\"); }";
        let chunks = chunker.chunk(content, tokenizer().as_ref());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_multibyte_content() {
        let chunker = Chunker::new(4, 1, 1000);
        let content = "héllo wörld ünïcode";
        let chunks = chunker.chunk(content, tokenizer().as_ref());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(content.contains(&chunk.text));
        }
    }
}
