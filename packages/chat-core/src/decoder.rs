//! Incremental UTF-8 decoding for streamed replies.
//!
//! Reply bodies arrive as arbitrary byte chunks; a chunk boundary can fall in
//! the middle of a multi-byte character. The decoder carries an incomplete
//! trailing sequence over to the next call and never fails: bytes that can
//! never form a valid character become U+FFFD, one per maximal invalid
//! subpart, and decoding carries on.

/// Substituted for malformed input.
pub const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Stateful byte-to-text decoder. Feed chunks in arrival order.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    /// Incomplete trailing sequence from the previous chunk (at most 3 bytes)
    carry: Vec<u8>,
    /// Some text has already been emitted for the current stream
    started: bool,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk.
    ///
    /// With `is_final` set, any incomplete tail is flushed as a single
    /// replacement character and the decoder is ready for a new stream.
    pub fn decode(&mut self, chunk: &[u8], is_final: bool) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match err.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            if is_final {
                                out.push(REPLACEMENT_CHARACTER);
                            } else {
                                self.carry = after.to_vec();
                            }
                            break;
                        }
                    }
                }
            }
        }

        if !self.started && !out.is_empty() {
            self.started = true;
            if out.starts_with(BYTE_ORDER_MARK) {
                out.replace_range(..BYTE_ORDER_MARK.len_utf8(), "");
            }
        }

        if is_final {
            self.reset();
        }

        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        self.decode(&[], true)
    }

    /// Bytes currently held back waiting for the rest of a character.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    pub fn reset(&mut self) {
        self.carry.clear();
        self.started = false;
    }
}
