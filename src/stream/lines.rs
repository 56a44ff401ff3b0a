//! Line reassembly for upstream response bodies.
//!
//! Transport chunks arrive on arbitrary byte boundaries: a UTF-8 codepoint or
//! a logical line may be split across any number of reads. The reassembler
//! carries both the partial codepoint and the unterminated line tail across
//! calls, so the lines it yields do not depend on how the bytes were chunked.

use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::RelayError;

/// Incremental UTF-8 decoder plus newline splitter.
pub struct LineReassembler {
    pending: String,
    partial_codepoint: SmallVec<[u8; 4]>,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            partial_codepoint: SmallVec::new(),
        }
    }

    /// Decode `chunk` and invoke `on_line` for every newline-terminated line,
    /// in order, without the trailing `\n`.
    ///
    /// Lines that were completed by the valid prefix of `chunk` are always
    /// delivered, even when the rest of the chunk fails to decode.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] when `chunk` contains a byte sequence
    /// that can never become valid UTF-8.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_line: F) -> Result<(), RelayError>
    where
        F: FnMut(&str),
    {
        let scan_from = self.pending.len();
        let decoded = self.decode_into_pending(chunk);

        let mut consumed = 0usize;
        let bytes = self.pending.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_from..]) {
            let line_end = scan_from + rel_pos;
            on_line(&self.pending[consumed..line_end]);
            consumed = line_end + 1;
        }
        if consumed == self.pending.len() {
            self.pending.clear();
        } else if consumed > 0 {
            self.pending.drain(..consumed);
        }

        decoded
    }

    /// Convenience wrapper over [`Self::feed_with`] that collects owned lines.
    ///
    /// # Errors
    ///
    /// See [`Self::feed_with`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, RelayError> {
        let mut lines = Vec::new();
        self.feed_with(chunk, |line| lines.push(line.to_owned()))?;
        Ok(lines)
    }

    /// The decoded text that has not been terminated by a newline yet.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// End of stream: the unterminated tail is discarded, never parsed.
    ///
    /// Returns the discarded text so the caller can log it.
    pub fn finish(&mut self) -> Option<String> {
        self.partial_codepoint.clear();
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    fn decode_into_pending(&mut self, chunk: &[u8]) -> Result<(), RelayError> {
        let mut input = chunk;

        // Finish a codepoint that straddled the previous chunk boundary.
        while !self.partial_codepoint.is_empty() {
            let Some((&first, rest)) = input.split_first() else {
                return Ok(());
            };
            self.partial_codepoint.push(first);
            input = rest;
            match std::str::from_utf8(&self.partial_codepoint) {
                Ok(text) => {
                    self.pending.push_str(text);
                    self.partial_codepoint.clear();
                }
                Err(err) if err.error_len().is_some() => {
                    return Err(self.invalid_sequence(chunk.len() - input.len()));
                }
                Err(_) => {}
            }
        }

        match std::str::from_utf8(input) {
            Ok(text) => {
                self.pending.push_str(text);
                Ok(())
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&input[..valid_up_to]) };
                self.pending.push_str(text);
                if err.error_len().is_some() {
                    let offset = chunk.len() - input.len() + valid_up_to;
                    return Err(self.invalid_sequence(offset));
                }
                self.partial_codepoint
                    .extend_from_slice(&input[valid_up_to..]);
                Ok(())
            }
        }
    }

    fn invalid_sequence(&mut self, offset_in_chunk: usize) -> RelayError {
        self.partial_codepoint.clear();
        RelayError::Decode(format!(
            "invalid UTF-8 sequence in upstream body at chunk offset {offset_in_chunk}"
        ))
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}
