//! Safe wrapper around `llama_batch`.

use crate::token::LlamaToken;

/// Sequence id used for every token; contexts here hold one conversation.
const SEQ_ID: i32 = 0;

/// RAII batch of tokens to feed into the decoder.
pub struct LlamaBatch {
    inner: llama_sys::llama_batch,
    capacity: usize,
}

impl LlamaBatch {
    /// Allocate a batch with room for `capacity` tokens of one sequence.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = unsafe { llama_sys::llama_batch_init(capacity as i32, 0, 1) };
        Self { inner, capacity }
    }

    /// Lay `tokens` out at positions `n_past..`. When `want_logits` is set,
    /// only the final token requests an output row.
    pub fn for_sequence(tokens: &[LlamaToken], n_past: i32, want_logits: bool) -> Self {
        let mut batch = Self::new(tokens.len());
        let last = tokens.len().saturating_sub(1);
        for (i, &tok) in tokens.iter().enumerate() {
            batch.add(tok, n_past + i as i32, want_logits && i == last);
        }
        batch
    }

    /// Return the raw batch struct (passed by value, `Copy` in C).
    pub fn raw(&self) -> llama_sys::llama_batch {
        self.inner
    }

    /// Number of tokens currently stored.
    pub fn n_tokens(&self) -> i32 {
        self.inner.n_tokens
    }

    /// Push a token at absolute position `pos`.
    ///
    /// `logits` requests an output row for this position.
    pub fn add(&mut self, token: LlamaToken, pos: i32, logits: bool) {
        let i = self.inner.n_tokens as usize;
        assert!(
            i < self.capacity,
            "LlamaBatch capacity ({}) exceeded",
            self.capacity
        );

        unsafe {
            *self.inner.token.add(i) = token;
            *self.inner.pos.add(i) = pos;
            *self.inner.n_seq_id.add(i) = 1;
            *(*self.inner.seq_id.add(i)) = SEQ_ID;
            *self.inner.logits.add(i) = i8::from(logits);
        }
        self.inner.n_tokens += 1;
    }
}

impl Drop for LlamaBatch {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_batch_free(self.inner) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(batch: &LlamaBatch) -> (Vec<i32>, Vec<i8>) {
        let raw = batch.raw();
        let n = batch.n_tokens() as usize;
        unsafe {
            (
                std::slice::from_raw_parts(raw.pos, n).to_vec(),
                std::slice::from_raw_parts(raw.logits, n).to_vec(),
            )
        }
    }

    #[test]
    fn sequence_positions_start_at_n_past() {
        let batch = LlamaBatch::for_sequence(&[11, 12, 13], 5, true);
        assert_eq!(batch.n_tokens(), 3);
        let (pos, logits) = flags(&batch);
        assert_eq!(pos, vec![5, 6, 7]);
        assert_eq!(logits, vec![0, 0, 1]);
    }

    #[test]
    fn leading_chunk_requests_no_logits() {
        let batch = LlamaBatch::for_sequence(&[1, 2], 0, false);
        let (_, logits) = flags(&batch);
        assert_eq!(logits, vec![0, 0]);
    }
}
