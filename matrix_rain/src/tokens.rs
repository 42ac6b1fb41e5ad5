//! Bounded token buffers shared between the feed producers and the renderer.
//!
//! Producers push; the renderer pulls once per frame. Nothing here blocks on
//! I/O and nothing here fails: overflow evicts the oldest element.

use crate::normalize::Normalized;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const CHAR_CAPACITY: usize = 3000;
pub const VALUE_CAPACITY: usize = 500;
pub const HEAD_POOL_CAPACITY: usize = 250;

const LABEL_MAX_CHARS: usize = 12;

/// A readable `(tag, label, value)` triple shown at the head of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueToken {
    pub tag: String,
    pub label: String,
    pub value: String,
}

impl ValueToken {
    /// Returns `None` when `value` is blank.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Option<Self> {
        let tag = tag.into();
        let label = short_label(&tag);
        Self::with_label(tag, label, value)
    }

    pub fn with_label(
        tag: impl Into<String>,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            tag: tag.into(),
            label: label.into(),
            value,
        })
    }

    /// Text form pushed into the character stream.
    pub fn snippet(&self) -> String {
        format!("{}={} ", self.label, self.value)
    }

    /// Text form drawn at a column head.
    pub fn display(&self) -> String {
        format!("{}:{}", self.label, self.value)
    }
}

/// Last path-like segment of a tag, capped for display.
fn short_label(tag: &str) -> String {
    let seg = tag
        .rsplit(['.', '/', '\\', ':'])
        .find(|s| !s.trim().is_empty())
        .unwrap_or(tag)
        .trim();
    seg.chars().take(LABEL_MAX_CHARS).collect()
}

/// FIFO with a hard capacity. Pushing into a full buffer drops the oldest item.
#[derive(Debug, Clone)]
pub struct BoundedFifo<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> BoundedFifo<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, item: T) -> bool {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.evicted += 1;
            true
        } else {
            false
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items dropped by overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Fallback glyphs for column tails.
#[derive(Debug, Clone)]
pub struct CharBuffer {
    fifo: BoundedFifo<char>,
}

impl CharBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            fifo: BoundedFifo::new(capacity),
        }
    }

    pub fn push_str(&mut self, s: &str) {
        for ch in s.chars() {
            self.fifo.push(ch);
        }
    }

    /// Skips whitespace; `None` once the buffer is exhausted.
    pub fn take(&mut self) -> Option<char> {
        while let Some(ch) = self.fifo.pop() {
            if !ch.is_whitespace() {
                return Some(ch);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &char> {
        self.fifo.iter()
    }
}

/// Ring of recently seen tokens, read round-robin without removal.
#[derive(Debug, Clone)]
pub struct HeadPool {
    ring: BoundedFifo<ValueToken>,
    cursor: usize,
}

impl HeadPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: BoundedFifo::new(capacity),
            cursor: 0,
        }
    }

    pub fn push(&mut self, token: ValueToken) {
        // keep the cursor on the same logical entry when the front is evicted
        if self.ring.push(token) {
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    pub fn next(&mut self) -> Option<ValueToken> {
        let len = self.ring.len();
        if len == 0 {
            return None;
        }
        let idx = self.cursor % len;
        self.cursor = (idx + 1) % len;
        self.ring.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamCapacities {
    pub chars: usize,
    pub values: usize,
    pub head_pool: usize,
}

impl Default for StreamCapacities {
    fn default() -> Self {
        Self {
            chars: CHAR_CAPACITY,
            values: VALUE_CAPACITY,
            head_pool: HEAD_POOL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferDepth {
    pub chars: usize,
    pub values: usize,
    pub pool: usize,
}

#[derive(Debug)]
struct Streams {
    chars: CharBuffer,
    values: BoundedFifo<ValueToken>,
    pool: HeadPool,
}

/// What the renderer needs from the data side. Both calls return immediately.
pub trait TokenSource {
    fn take_char(&self) -> Option<char>;
    fn take_value_or_reuse(&self) -> Option<ValueToken>;
}

/// Cloneable handle over the character buffer, value queue and head pool.
#[derive(Debug, Clone)]
pub struct TokenStreams {
    inner: Arc<Mutex<Streams>>,
}

impl Default for TokenStreams {
    fn default() -> Self {
        Self::new(StreamCapacities::default())
    }
}

impl TokenStreams {
    pub fn new(caps: StreamCapacities) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Streams {
                chars: CharBuffer::new(caps.chars),
                values: BoundedFifo::new(caps.values),
                pool: HeadPool::new(caps.head_pool),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Streams> {
        // a panicked writer leaves the buffers structurally valid
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_chars(&self, s: &str) {
        if s.is_empty() {
            return;
        }
        self.lock().chars.push_str(s);
    }

    /// Writes the token to both the value queue and the head pool.
    pub fn enqueue_token(&self, token: ValueToken) {
        let mut g = self.lock();
        g.values.push(token.clone());
        g.pool.push(token);
    }

    /// Inserts a normalized payload. Token text is repeated `repeat` times in
    /// the character buffer; a token-less character stream is inserted once.
    /// Returns the number of tokens accepted.
    pub fn ingest(&self, out: &Normalized, repeat: usize) -> usize {
        if out.is_empty() {
            return 0;
        }
        let repeat = repeat.max(1);
        let mut g = self.lock();
        if out.tokens.is_empty() {
            g.chars.push_str(&out.char_stream);
            return 0;
        }
        for token in &out.tokens {
            let snippet = token.snippet();
            for _ in 0..repeat {
                g.chars.push_str(&snippet);
            }
            g.values.push(token.clone());
            g.pool.push(token.clone());
        }
        out.tokens.len()
    }

    pub fn depth(&self) -> BufferDepth {
        let g = self.lock();
        BufferDepth {
            chars: g.chars.len(),
            values: g.values.len(),
            pool: g.pool.len(),
        }
    }

    pub fn has_live_data(&self) -> bool {
        !self.lock().pool.is_empty()
    }
}

impl TokenSource for TokenStreams {
    fn take_char(&self) -> Option<char> {
        self.lock().chars.take()
    }

    fn take_value_or_reuse(&self) -> Option<ValueToken> {
        let mut g = self.lock();
        if let Some(tok) = g.values.pop() {
            return Some(tok);
        }
        g.pool.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tok(tag: &str, value: &str) -> ValueToken {
        ValueToken::new(tag, value).unwrap()
    }

    #[test]
    fn blank_values_are_rejected() {
        assert!(ValueToken::new("Flow", "   ").is_none());
        assert!(ValueToken::new("Flow", "").is_none());
        assert_eq!(tok("Flow", " 1.00 ").value, "1.00");
    }

    #[test]
    fn label_uses_last_path_segment() {
        assert_eq!(tok("Plant.Line2/Flow", "1").label, "Flow");
        assert_eq!(tok("VeryLongTagNameForSensor", "1").label, "VeryLongTagN");
        assert_eq!(tok("Flow.", "1").label, "Flow");
    }

    #[test]
    fn fifo_keeps_most_recent_items() {
        let mut f = BoundedFifo::new(3);
        for i in 0..7 {
            f.push(i);
        }
        assert_eq!(f.iter().copied().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(f.evicted(), 4);
        assert_eq!(f.capacity(), 3);
    }

    #[test]
    fn take_skips_whitespace_and_returns_none_when_drained() {
        let mut b = CharBuffer::new(16);
        b.push_str("  a \t b  ");
        assert_eq!(b.take(), Some('a'));
        assert_eq!(b.take(), Some('b'));
        assert_eq!(b.take(), None);
        assert!(b.is_empty());
    }

    #[test]
    fn reuse_is_none_until_first_token() {
        let s = TokenStreams::default();
        assert_eq!(s.take_value_or_reuse(), None);
        s.push_chars("abc");
        assert_eq!(s.take_value_or_reuse(), None);
        s.enqueue_token(tok("Flow", "1.00"));
        assert_eq!(s.take_value_or_reuse().map(|t| t.tag), Some("Flow".into()));
        // queue drained, pool still serves it
        assert_eq!(s.take_value_or_reuse().map(|t| t.tag), Some("Flow".into()));
        assert_eq!(s.depth().values, 0);
        assert_eq!(s.depth().pool, 1);
    }

    #[test]
    fn queue_is_consumed_before_pool() {
        let s = TokenStreams::default();
        s.enqueue_token(tok("A", "1"));
        s.enqueue_token(tok("B", "2"));
        let got: Vec<_> = (0..4)
            .filter_map(|_| s.take_value_or_reuse())
            .map(|t| t.tag)
            .collect();
        assert_eq!(got, vec!["A", "B", "A", "B"]);
    }

    #[test]
    fn pool_round_robin_is_fair() {
        let s = TokenStreams::new(StreamCapacities {
            chars: 10,
            values: 10,
            head_pool: 4,
        });
        for (i, t) in ["a", "b", "c"].iter().enumerate() {
            s.enqueue_token(tok(t, &i.to_string()));
        }
        while s.depth().values > 0 {
            s.take_value_or_reuse();
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..31 {
            let t = s.take_value_or_reuse().unwrap();
            *counts.entry(t.tag).or_default() += 1;
        }
        for tag in ["a", "b", "c"] {
            assert!(counts[tag] >= 31 / 3, "{tag} served {}", counts[tag]);
        }
    }

    #[test]
    fn pool_eviction_keeps_newest() {
        let mut p = HeadPool::new(2);
        p.push(tok("a", "1"));
        p.push(tok("b", "1"));
        p.push(tok("c", "1"));
        let seen: Vec<_> = (0..4).filter_map(|_| p.next()).map(|t| t.tag).collect();
        assert!(!seen.contains(&"a".to_string()));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn ingest_repeats_token_text() {
        let s = TokenStreams::default();
        let out = Normalized::from_tokens(vec![tok("T", "21.00")]);
        assert_eq!(s.ingest(&out, 2), 1);
        let mut drained = String::new();
        while let Some(c) = s.take_char() {
            drained.push(c);
        }
        assert_eq!(drained, "T=21.00T=21.00");
    }

    #[test]
    fn ingest_of_empty_payload_touches_nothing() {
        let s = TokenStreams::default();
        assert_eq!(s.ingest(&Normalized::default(), 3), 0);
        assert_eq!(s.depth(), BufferDepth::default());
    }
}
