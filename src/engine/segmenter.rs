//! Sentence-boundary segmentation for streaming assistant output
//!
//! Accumulates text deltas and emits complete sentences as soon as they can
//! be safely handed to speech synthesis, handling sentence boundaries that
//! span token boundaries.

/// A complete sentence extracted from the stream.
///
/// `text` is the raw span, including any leading whitespace carried over
/// from the previous split point; consumers trim before synthesis. `seq` is
/// strictly increasing within one assistant turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub seq: usize,
}

impl Sentence {
    pub fn new(text: String, seq: usize) -> Self {
        Self { text, seq }
    }

    /// The text as it should be spoken or displayed.
    pub fn spoken_text(&self) -> &str {
        self.text.trim()
    }
}

/// Streaming sentence segmenter.
///
/// Invariant: the concatenation of every emitted sentence plus the current
/// buffer equals the full text fed in, byte for byte.
///
/// Boundary rules, in precedence order:
/// 1. Quoted span: once the buffer holds two double quotes, everything
///    through the second quote is one sentence, terminal punctuation or not.
/// 2. Punctuation: split before the first whitespace run that follows a
///    `.`, `!` or `?`, but only while the candidate holds an even number of
///    quotes; an odd count means the sentence is still inside a quotation.
#[derive(Clone, Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    next_seq: usize,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new assistant turn.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_seq = 0;
    }

    /// Feed a text delta and extract any sentences it completes.
    ///
    /// Rules are applied repeatedly, so a single large delta may yield
    /// several sentences.
    pub fn feed(&mut self, delta: &str) -> Vec<Sentence> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        while let Some(end) = boundary(&self.buffer) {
            let rest = self.buffer.split_off(end);
            let text = std::mem::replace(&mut self.buffer, rest);
            sentences.push(Sentence::new(text, self.next_seq));
            self.next_seq += 1;
        }

        sentences
    }

    /// Flush the residual buffer as a final sentence at stream end.
    pub fn flush(&mut self) -> Option<Sentence> {
        if self.buffer.is_empty() {
            return None;
        }

        let text = std::mem::take(&mut self.buffer);
        let sentence = Sentence::new(text, self.next_seq);
        self.next_seq += 1;
        Some(sentence)
    }

    /// Text accumulated but not yet emitted.
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    pub fn next_seq(&self) -> usize {
        self.next_seq
    }
}

/// Find the end (byte index past the last char) of the first complete
/// sentence in `buffer`, or `None` if no boundary exists yet.
fn boundary(buffer: &str) -> Option<usize> {
    // Quoted-span rule: emit through the second quote, inclusive.
    let mut quote_indices = buffer.char_indices().filter(|(_, c)| *c == '"');
    if let (Some(_), Some((second, _))) = (quote_indices.next(), quote_indices.next()) {
        return Some(second + 1);
    }

    // Punctuation rule: first `.`/`!`/`?` followed by whitespace. The
    // whitespace run stays with the residual so no characters are dropped.
    let mut chars = buffer.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_idx, next_char)) = chars.peek() {
            if next_char.is_whitespace() {
                let candidate = &buffer[..next_idx];
                if candidate.matches('"').count() % 2 == 0 {
                    return Some(next_idx);
                }
                // Inside an open quotation; wait for the closing quote.
                return None;
            }
        }
    }

    None
}

/// Segment a complete response in one pass (non-streaming).
pub fn segment_all(text: &str) -> Vec<Sentence> {
    let mut segmenter = SentenceSegmenter::new();
    let mut sentences = segmenter.feed(text);
    if let Some(last) = segmenter.flush() {
        sentences.push(last);
    }
    sentences
}
