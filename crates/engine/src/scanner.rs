//! Multi-pattern tag scanner.
//!
//! Finds the next tag opening or `}` terminator in one left-to-right pass.
//! The vocabulary is static and grouped by first character: `{` introduces
//! the inline tags, `<` the multiline tags, and `}` matches on its own.
//! Candidates are rejected cheaply by probing the word's last character
//! before comparing the middle.
//!
//! One call to [`Scanner::next_segment`] produces at most one match; the
//! cursor is left right after the matched word and never moves backward.

/// `}` terminator.
pub const LINE_END: u32 = 1;
/// `{var:`
pub const VARIABLE: u32 = 2;
/// `{raw:`
pub const RAW_VARIABLE: u32 = 3;
/// `{math:`
pub const MATH: u32 = 4;
/// `{svar:`
pub const SUPER_VARIABLE: u32 = 5;
/// `{if`
pub const INLINE_IF: u32 = 6;
/// `<loop`
pub const LOOP: u32 = 7;
/// `</loop>`
pub const LOOP_END: u32 = 8;
/// `<if`
pub const IF: u32 = 9;
/// `</if>`
pub const IF_END: u32 = 10;
/// `<else`
pub const ELSE: u32 = 11;

/// Words following `{`, with their pattern ids.
const INLINE_WORDS: [(&[u8], u32); 5] = [
    (b"var:", VARIABLE),
    (b"raw:", RAW_VARIABLE),
    (b"math:", MATH),
    (b"svar:", SUPER_VARIABLE),
    (b"if", INLINE_IF),
];

/// Words following `<`, with their pattern ids.
const MULTILINE_WORDS: [(&[u8], u32); 5] = [
    (b"loop", LOOP),
    (b"/loop>", LOOP_END),
    (b"if", IF),
    (b"/if>", IF_END),
    (b"else", ELSE),
];

pub struct Scanner<'t> {
    content: &'t [u8],
    offset: usize,
    match_id: u32,
}

impl<'t> Scanner<'t> {
    pub fn new(content: &'t [u8]) -> Self {
        Self {
            content,
            offset: 0,
            match_id: 0,
        }
    }

    /// Advances to the next match. Zero in [`Self::current_match`] means no
    /// more matches before the end.
    pub fn next_segment(&mut self) {
        self.match_id = 0;

        while self.offset < self.content.len() {
            match self.content[self.offset] {
                b'{' => {
                    self.offset += 1;

                    if self.match_group(&INLINE_WORDS) {
                        return;
                    }
                }

                b'<' => {
                    self.offset += 1;

                    if self.match_group(&MULTILINE_WORDS) {
                        return;
                    }
                }

                b'}' => {
                    self.match_id = LINE_END;
                    self.offset += 1;
                    return;
                }

                _ => {
                    self.offset += 1;
                }
            }
        }
    }

    fn match_group(&mut self, words: &[(&[u8], u32)]) -> bool {
        let start = self.offset;

        for &(word, id) in words {
            // Probe the last character first; cheap rejection for most text.
            let middle = word.len() - 1;
            let word_end = start + middle;

            if word_end < self.content.len()
                && self.content[word_end] == word[middle]
                && self.content[start..word_end] == word[..middle]
            {
                self.match_id = id;
                self.offset = word_end + 1;
                return true;
            }
        }

        false
    }

    /// Pattern id of the last match; zero when exhausted.
    #[inline]
    pub fn current_match(&self) -> u32 {
        self.match_id
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Repositions the cursor; the parser uses this after manual scans.
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }
}
