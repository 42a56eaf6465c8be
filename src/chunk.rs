//! Token-aware windowing chunker.
//!
//! Splits file text into overlapping fixed-size token windows using the
//! `cl100k_base` BPE. When the tokenizer cannot be initialized the chunker
//! falls back to whitespace tokens with the identical windowing algorithm.
//!
//! Each chunk carries a deterministic id hashed from its file path, start
//! token offset, and text, so re-chunking byte-identical content always
//! produces the same ordered id sequence and upserts stay idempotent.

use sha2::{Digest, Sha256};
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, IngestedFile};

pub struct Chunker {
    bpe: Option<CoreBPE>,
    target: usize,
    overlap: usize,
    max_chunks_per_file: usize,
    chunk_budget: usize,
    max_chunk_bytes: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let bpe = match cl100k_base() {
            Ok(enc) => Some(enc),
            Err(e) => {
                warn!("failed to initialize cl100k tokenizer, using whitespace tokens: {e}");
                None
            }
        };
        Self {
            bpe,
            target: config.target_tokens,
            overlap: config.overlap_tokens,
            max_chunks_per_file: config.max_chunks_per_file,
            chunk_budget: config.chunk_budget,
            max_chunk_bytes: config.max_chunk_bytes,
        }
    }

    /// Window one file into chunks, respecting the per-file cap.
    pub fn chunk_file(&self, file: &IngestedFile) -> Vec<Chunk> {
        self.windows(file, self.max_chunks_per_file)
    }

    /// Window a whole corpus, additionally enforcing the repo-wide chunk
    /// budget. The budget stops iteration even mid-file.
    pub fn chunk_corpus(&self, files: &[IngestedFile]) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for file in files {
            let remaining = self.chunk_budget.saturating_sub(chunks.len());
            if remaining == 0 {
                warn!(
                    budget = self.chunk_budget,
                    "repo-wide chunk budget reached, remaining files not chunked"
                );
                break;
            }
            let cap = remaining.min(self.max_chunks_per_file);
            chunks.extend(self.windows(file, cap));
        }
        chunks
    }

    fn windows(&self, file: &IngestedFile, cap: usize) -> Vec<Chunk> {
        if cap == 0 {
            return Vec::new();
        }
        match &self.bpe {
            Some(bpe) => self.windows_bpe(bpe, file, cap),
            None => self.windows_whitespace(file, cap),
        }
    }

    fn windows_bpe(&self, bpe: &CoreBPE, file: &IngestedFile, cap: usize) -> Vec<Chunk> {
        let tokens = bpe.encode_ordinary(&file.content);
        let mut out = Vec::new();
        for (start, end) in window_spans(tokens.len(), self.target, self.overlap) {
            if out.len() >= cap {
                break;
            }
            // A window boundary can split a multi-byte character; fall back
            // to a character-proportional slice of the original text.
            let text = match bpe.decode(tokens[start..end].to_vec()) {
                Ok(decoded) => decoded,
                Err(_) => proportional_slice(&file.content, start, end, tokens.len()),
            };
            self.push_chunk(&mut out, file, start, text);
        }
        out
    }

    fn windows_whitespace(&self, file: &IngestedFile, cap: usize) -> Vec<Chunk> {
        let words: Vec<&str> = file.content.split_whitespace().collect();
        let mut out = Vec::new();
        for (start, end) in window_spans(words.len(), self.target, self.overlap) {
            if out.len() >= cap {
                break;
            }
            let text = words[start..end].join(" ");
            self.push_chunk(&mut out, file, start, text);
        }
        out
    }

    fn push_chunk(&self, out: &mut Vec<Chunk>, file: &IngestedFile, start: usize, text: String) {
        if text.trim().is_empty() {
            return;
        }
        if text.len() > self.max_chunk_bytes {
            warn!(file = %file.path, start, bytes = text.len(), "discarding oversized chunk");
            return;
        }
        let chunk_id = chunk_id(&file.path, start, &text);
        out.push(Chunk {
            text,
            file: file.path.clone(),
            chunk_id,
        });
    }
}

/// Window start/end pairs over a token sequence of length `len`, advancing
/// by `max(1, target - overlap)`. The final window may be shorter than
/// `target`; the iteration ends once a window reaches the sequence end.
fn window_spans(len: usize, target: usize, overlap: usize) -> Vec<(usize, usize)> {
    let step = target.saturating_sub(overlap).max(1);
    let mut spans = Vec::new();
    let mut start = 0usize;
    while start < len {
        let end = (start + target).min(len);
        spans.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    spans
}

/// Deterministic content-addressed chunk id.
fn chunk_id(path: &str, start: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update((start as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn proportional_slice(text: &str, start: usize, end: usize, total: usize) -> String {
    if total == 0 {
        return String::new();
    }
    let chars = text.chars().count();
    let s_char = chars * start / total;
    let e_char = chars * end / total;
    text.chars()
        .skip(s_char)
        .take(e_char.saturating_sub(s_char))
        .collect()
}
