//! Streaming substitution of a fixed byte pattern.
//!
//! Compiler and extractor output is post-processed in chunks as it arrives;
//! the rewriter replaces every non-overlapping left-to-right occurrence of a
//! pattern without ever buffering the whole stream. A partial match that a
//! chunk boundary splits is carried in a pending buffer until the next chunk
//! settles it.

use std::io::{self, Write};

/// Default capacity of the committed buffer before it is flushed downstream.
const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Rewrites occurrences of `pattern` to `replacement` in a byte stream.
#[derive(Debug)]
pub struct PatternRewriter<W> {
    out: W,
    pattern: Vec<u8>,
    replacement: Vec<u8>,
    /// Bytes committed for output, flushed when `capacity` is reached.
    committed: Vec<u8>,
    /// Prefix of a potential pattern match, at most `pattern.len()` long.
    pending: Vec<u8>,
    capacity: usize,
}

impl<W: Write> PatternRewriter<W> {
    pub fn new(out: W, pattern: impl Into<Vec<u8>>, replacement: impl Into<Vec<u8>>) -> Self {
        Self::with_capacity(out, pattern, replacement, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(
        out: W,
        pattern: impl Into<Vec<u8>>,
        replacement: impl Into<Vec<u8>>,
        capacity: usize,
    ) -> Self {
        let pattern = pattern.into();
        Self {
            out,
            committed: Vec::with_capacity(capacity.max(1)),
            pending: Vec::with_capacity(pattern.len()),
            pattern,
            replacement: replacement.into(),
            capacity: capacity.max(1),
        }
    }

    /// Feeds one chunk through the rewriter.
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if self.pattern.is_empty() {
            // nothing to match, pass the chunk through
            return self.out.write_all(data);
        }
        for &byte in data {
            if byte == self.pattern[self.pending.len()] {
                self.pending.push(byte);
            } else {
                if !self.pending.is_empty() {
                    self.commit_pending()?;
                }
                // the byte itself may open a new match
                if byte == self.pattern[0] {
                    self.pending.push(byte);
                } else {
                    self.commit_byte(byte)?;
                }
            }
            if self.pending.len() == self.pattern.len() {
                self.pending.clear();
                let replacement = std::mem::take(&mut self.replacement);
                self.commit_slice(&replacement)?;
                self.replacement = replacement;
            }
        }
        Ok(())
    }

    /// Emits everything held back, including a dangling partial match.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.committed.is_empty() {
            self.out.write_all(&self.committed)?;
            self.committed.clear();
        }
        if !self.pending.is_empty() {
            self.out.write_all(&self.pending)?;
            self.pending.clear();
        }
        self.out.flush()
    }

    /// Consumes the rewriter, flushing it and handing back the writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.finish()?;
        Ok(self.out)
    }

    fn commit_pending(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.commit_slice(&pending)?;
        self.pending = pending;
        self.pending.clear();
        Ok(())
    }

    fn commit_byte(&mut self, byte: u8) -> io::Result<()> {
        self.make_room(1)?;
        self.committed.push(byte);
        Ok(())
    }

    fn commit_slice(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.make_room(bytes.len())?;
        if bytes.len() >= self.capacity {
            // larger than the whole buffer, write through
            return self.out.write_all(bytes);
        }
        self.committed.extend_from_slice(bytes);
        Ok(())
    }

    fn make_room(&mut self, needed: usize) -> io::Result<()> {
        if self.committed.len() + needed > self.capacity && !self.committed.is_empty() {
            self.out.write_all(&self.committed)?;
            self.committed.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for PatternRewriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(chunks: &[&str], pattern: &str, replacement: &str) -> String {
        let mut rewriter = PatternRewriter::new(Vec::new(), pattern, replacement);
        for chunk in chunks {
            rewriter.write_chunk(chunk.as_bytes()).unwrap();
        }
        String::from_utf8(rewriter.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn replaces_across_chunk_boundaries() {
        assert_eq!(rewrite(&["AAB", "CAB", "CX"], "ABC", "Z"), "AZZX");
    }

    #[test]
    fn partition_independence() {
        let input = "xABCyABABCABCz";
        let expected = "xZyABZZz";
        assert_eq!(rewrite(&[input], "ABC", "Z"), expected);
        for split in 1..input.len() {
            let (a, b) = input.split_at(split);
            assert_eq!(rewrite(&[a, b], "ABC", "Z"), expected, "split at {split}");
        }
    }

    #[test]
    fn empty_pattern_is_a_passthrough() {
        assert_eq!(rewrite(&["abc", "def"], "", "X"), "abcdef");
    }

    #[test]
    fn dangling_partial_match_is_flushed() {
        assert_eq!(rewrite(&["xyAB"], "ABC", "Z"), "xyAB");
    }

    #[test]
    fn matches_do_not_overlap() {
        // after a full match the pending buffer is cleared, not shifted
        assert_eq!(rewrite(&["aaaa"], "aa", "a"), "aa");
    }

    #[test]
    fn tiny_capacity_still_correct() {
        let mut rewriter = PatternRewriter::with_capacity(Vec::new(), "ABC", "longer", 2);
        rewriter.write_chunk(b"AABCB").unwrap();
        let out = rewriter.into_inner().unwrap();
        assert_eq!(out, b"AlongerB");
    }

    #[test]
    fn replacement_longer_than_capacity() {
        let mut rewriter = PatternRewriter::with_capacity(Vec::new(), "AB", "0123456789", 4);
        rewriter.write_chunk(b"xxAByy").unwrap();
        let out = rewriter.into_inner().unwrap();
        assert_eq!(out, b"xx0123456789yy");
    }
}
