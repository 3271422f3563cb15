use rand::Rng;
use rand::distributions::{IndependentSample, Range};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub word: u32,
    pub topic: u32,
}

/// A document's tokens, kept sorted by word id so that the tokens of one
/// vocabulary slice are contiguous, plus the position where the next
/// slice-bounded sweep resumes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Document {
    pub fn new(mut tokens: Vec<Token>) -> Document {
        tokens.sort_by_key(|t| t.word);
        Document { tokens, cursor: 0 }
    }

    /// Expand `(word, count)` pairs into tokens with uniformly random topics.
    pub fn with_random_topics<R: Rng>(words: &[(u32, usize)], num_topics: usize, rng: &mut R) -> Document {
        let among_topics = Range::new(0, num_topics as u32);
        let mut tokens = Vec::with_capacity(words.iter().map(|&(_, c)| c).sum());
        for &(word, count) in words {
            for _ in 0..count {
                tokens.push(Token { word, topic: among_topics.ind_sample(rng) });
            }
        }
        Document::new(tokens)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[inline]
    pub fn word(&self, index: usize) -> u32 {
        self.tokens[index].word
    }

    #[inline]
    pub fn topic(&self, index: usize) -> u32 {
        self.tokens[index].topic
    }

    #[inline]
    pub fn set_topic(&mut self, index: usize, topic: u32) {
        self.tokens[index].topic = topic;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.tokens.len());
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }
}
