//! Bounded accumulation of child-process output.
//!
//! The pipe between a child and the session store carries no backpressure,
//! so memory is bounded by discarding the oldest bytes and marking the cut.

/// Fixed marker inserted where the oldest output was discarded. The exact
/// text is part of the server's external interface.
pub const TRUNCATION_NOTICE: &str =
    "\n\n[Output truncated due to size limits. Oldest output has been discarded.]\n\n";

/// Append-only text accumulator capped at `max_bytes`. Overflow keeps the
/// most recent bytes and prepends [`TRUNCATION_NOTICE`] exactly once per
/// overflow event.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    contents: String,
    max_bytes: usize,
}

impl BoundedBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            contents: String::new(),
            max_bytes,
        }
    }

    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.contents.push_str(text);
        if self.contents.len() <= self.max_bytes {
            return;
        }

        let keep = self.max_bytes.saturating_sub(TRUNCATION_NOTICE.len());
        let mut start = self.contents.len() - keep;
        while start < self.contents.len() && !self.contents.is_char_boundary(start) {
            start += 1;
        }
        let tail = self.contents.split_off(start);
        self.contents.clear();
        self.contents.push_str(TRUNCATION_NOTICE);
        self.contents.push_str(&tail);
    }

    /// Returns the current contents and resets the buffer to empty.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.contents)
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}
