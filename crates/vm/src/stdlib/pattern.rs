//! Backtracking matcher for string patterns (`%a`, sets, `*+-?`, anchors,
//! captures, `%b` and `%f`), working on bytes.

use thiserror::Error;

const MAX_CAPTURES: usize = 32;
const MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(super) enum PatternError {
    #[error("malformed pattern (ends with '%')")]
    EndsWithEscape,
    #[error("malformed pattern (missing ']')")]
    MissingBracket,
    #[error("malformed pattern (missing arguments to '%b')")]
    MissingBalanceArgs,
    #[error("missing '[' after '%f' in pattern")]
    MissingFrontierSet,
    #[error("invalid capture index %{0}")]
    InvalidCaptureIndex(usize),
    #[error("invalid pattern capture")]
    InvalidCapture,
    #[error("unfinished capture")]
    UnfinishedCapture,
    #[error("too many captures")]
    TooManyCaptures,
    #[error("pattern too complex")]
    TooComplex,
}

type MatchResult = Result<Option<usize>, PatternError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureLen {
    Unfinished,
    Position,
    Closed(usize),
}

#[derive(Debug, Clone, Copy)]
struct CaptureSlot {
    start: usize,
    len: CaptureLen,
}

/// One capture of a successful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Capture {
    /// Byte range into the subject.
    Range(usize, usize),
    /// `()` capture: 1-based position in the subject.
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Match {
    pub start: usize,
    pub end: usize,
    /// Explicit captures; empty when the pattern has none.
    pub captures: Vec<Capture>,
}

impl Match {
    /// The captures a caller sees: the whole match when there are none.
    pub fn values(&self) -> Vec<Capture> {
        if self.captures.is_empty() {
            vec![Capture::Range(self.start, self.end)]
        } else {
            self.captures.clone()
        }
    }
}

struct Matcher<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    depth: usize,
    captures: Vec<CaptureSlot>,
}

/// Search `src` for `pat` starting at byte offset `init`.
pub(super) fn find(src: &[u8], pat: &[u8], init: usize) -> Result<Option<Match>, PatternError> {
    let (anchored, pat) = match pat.strip_prefix(b"^") {
        Some(rest) => (true, rest),
        None => (false, pat),
    };
    let mut matcher = Matcher {
        src,
        pat,
        depth: 0,
        captures: Vec::new(),
    };
    let mut start = init;
    while start <= src.len() {
        matcher.captures.clear();
        if let Some(end) = matcher.do_match(start, 0)? {
            let captures = matcher.finish()?;
            return Ok(Some(Match {
                start,
                end,
                captures,
            }));
        }
        if anchored {
            break;
        }
        start += 1;
    }
    Ok(None)
}

/// Whether `pat` contains characters with special meaning.
pub(super) fn has_specials(pat: &[u8]) -> bool {
    pat.iter().any(|b| b"^$*+?.([%-".contains(b))
}

fn match_class(c: u8, class: u8) -> bool {
    let matched = match class.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => c.is_ascii_whitespace() || c == 0x0b,
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        _ => return class == c,
    };
    if class.is_ascii_uppercase() {
        !matched
    } else {
        matched
    }
}

impl Matcher<'_> {
    fn do_match(&mut self, s: usize, p: usize) -> MatchResult {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PatternError::TooComplex);
        }
        let result = self.match_here(s, p);
        self.depth -= 1;
        result
    }

    fn match_here(&mut self, mut s: usize, mut p: usize) -> MatchResult {
        let len = self.pat.len();
        loop {
            if p == len {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CaptureLen::Position)
                    } else {
                        self.start_capture(s, p + 1, CaptureLen::Unfinished)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == len => {
                    return Ok((s == self.src.len()).then_some(s));
                }
                b'%' => match self.pat.get(p + 1) {
                    Some(b'b') => {
                        s = match self.match_balance(s, p + 2)? {
                            Some(end) => end,
                            None => return Ok(None),
                        };
                        p += 4;
                        continue;
                    }
                    Some(b'f') => {
                        p += 2;
                        if self.pat.get(p) != Some(&b'[') {
                            return Err(PatternError::MissingFrontierSet);
                        }
                        let ep = self.class_end(p)?;
                        let prev = if s == 0 { 0 } else { self.src[s - 1] };
                        let cur = self.src.get(s).copied().unwrap_or(0);
                        if !self.match_set(prev, p, ep - 1) && self.match_set(cur, p, ep - 1) {
                            p = ep;
                            continue;
                        }
                        return Ok(None);
                    }
                    Some(&d) if d.is_ascii_digit() => {
                        s = match self.match_back_reference(s, d)? {
                            Some(end) => end,
                            None => return Ok(None),
                        };
                        p += 2;
                        continue;
                    }
                    _ => {}
                },
                _ => {}
            }
            let ep = self.class_end(p)?;
            let matched = s < self.src.len() && self.single_match(self.src[s], p, ep);
            match self.pat.get(ep) {
                Some(b'?') => {
                    if matched {
                        if let Some(end) = self.do_match(s + 1, ep + 1)? {
                            return Ok(Some(end));
                        }
                    }
                    p = ep + 1;
                }
                Some(b'+') => {
                    return if matched {
                        self.max_expand(s + 1, p, ep)
                    } else {
                        Ok(None)
                    };
                }
                Some(b'*') => return self.max_expand(s, p, ep),
                Some(b'-') => return self.min_expand(s, p, ep),
                _ => {
                    if !matched {
                        return Ok(None);
                    }
                    s += 1;
                    p = ep;
                }
            }
        }
    }

    /// Index just past the single-character class starting at `p`.
    fn class_end(&self, p: usize) -> Result<usize, PatternError> {
        let len = self.pat.len();
        match self.pat[p] {
            b'%' => {
                if p + 1 >= len {
                    return Err(PatternError::EndsWithEscape);
                }
                Ok(p + 2)
            }
            b'[' => {
                let mut q = p + 1;
                if self.pat.get(q) == Some(&b'^') {
                    q += 1;
                }
                // The first character of a set is literal, so `[]]` works.
                loop {
                    if q >= len {
                        return Err(PatternError::MissingBracket);
                    }
                    let c = self.pat[q];
                    q += 1;
                    if c == b'%' && q < len {
                        q += 1;
                    }
                    if self.pat.get(q) == Some(&b']') {
                        return Ok(q + 1);
                    }
                }
            }
            _ => Ok(p + 1),
        }
    }

    fn single_match(&self, c: u8, p: usize, ep: usize) -> bool {
        match self.pat[p] {
            b'.' => true,
            b'%' => match_class(c, self.pat[p + 1]),
            b'[' => self.match_set(c, p, ep - 1),
            literal => literal == c,
        }
    }

    /// `c` against the set between `pat[p] == '['` and `pat[end] == ']'`.
    fn match_set(&self, c: u8, p: usize, end: usize) -> bool {
        let mut p = p + 1;
        let mut found = true;
        if self.pat[p] == b'^' {
            found = false;
            p += 1;
        }
        while p < end {
            if self.pat[p] == b'%' {
                p += 1;
                if match_class(c, self.pat[p]) {
                    return found;
                }
                p += 1;
            } else if self.pat[p + 1] == b'-' && p + 2 < end {
                if self.pat[p] <= c && c <= self.pat[p + 2] {
                    return found;
                }
                p += 3;
            } else {
                if self.pat[p] == c {
                    return found;
                }
                p += 1;
            }
        }
        !found
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> MatchResult {
        let mut count = 0;
        while s + count < self.src.len() && self.single_match(self.src[s + count], p, ep) {
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> MatchResult {
        loop {
            if let Some(end) = self.do_match(s, ep + 1)? {
                return Ok(Some(end));
            }
            if s < self.src.len() && self.single_match(self.src[s], p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, len: CaptureLen) -> MatchResult {
        if self.captures.len() >= MAX_CAPTURES {
            return Err(PatternError::TooManyCaptures);
        }
        self.captures.push(CaptureSlot { start: s, len });
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures.pop();
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> MatchResult {
        let index = self
            .captures
            .iter()
            .rposition(|slot| slot.len == CaptureLen::Unfinished)
            .ok_or(PatternError::InvalidCapture)?;
        let start = self.captures[index].start;
        self.captures[index].len = CaptureLen::Closed(s - start);
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures[index].len = CaptureLen::Unfinished;
        }
        Ok(result)
    }

    fn match_balance(&self, s: usize, p: usize) -> MatchResult {
        if p + 1 >= self.pat.len() {
            return Err(PatternError::MissingBalanceArgs);
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&open) {
            return Ok(None);
        }
        let mut depth = 1;
        for (i, &c) in self.src.iter().enumerate().skip(s + 1) {
            if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                depth += 1;
            }
        }
        Ok(None)
    }

    fn match_back_reference(&self, s: usize, digit: u8) -> MatchResult {
        let index = usize::from(digit - b'0');
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.captures.get(i))
            .ok_or(PatternError::InvalidCaptureIndex(index))?;
        let CaptureLen::Closed(len) = slot.len else {
            return Err(PatternError::InvalidCaptureIndex(index));
        };
        let captured = &self.src[slot.start..slot.start + len];
        Ok(self.src[s..].starts_with(captured).then_some(s + len))
    }

    fn finish(&self) -> Result<Vec<Capture>, PatternError> {
        self.captures
            .iter()
            .map(|slot| match slot.len {
                CaptureLen::Closed(len) => Ok(Capture::Range(slot.start, slot.start + len)),
                CaptureLen::Position => Ok(Capture::Position(slot.start + 1)),
                CaptureLen::Unfinished => Err(PatternError::UnfinishedCapture),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_str<'a>(src: &'a str, pat: &str) -> Option<(&'a str, Vec<String>)> {
        let m = find(src.as_bytes(), pat.as_bytes(), 0).unwrap()?;
        let captures = m
            .captures
            .iter()
            .map(|capture| match *capture {
                Capture::Range(s, e) => src[s..e].to_owned(),
                Capture::Position(pos) => pos.to_string(),
            })
            .collect();
        Some((&src[m.start..m.end], captures))
    }

    #[test]
    fn test_classes_and_quantifiers() {
        assert_eq!(find_str("hello 123 world", "%d+").unwrap().0, "123");
        assert_eq!(find_str("  key = value", "%a+").unwrap().0, "key");
        assert_eq!(find_str("aaab", "a-b").unwrap().0, "aaab");
        assert_eq!(find_str("color colour", "colou?r").unwrap().0, "color");
        assert_eq!(find_str("x = [[abc]]", "%[%[.*%]%]").unwrap().0, "[[abc]]");
        assert_eq!(find_str("abc", "[^a]+").unwrap().0, "bc");
        assert_eq!(find_str("a-z", "[%-]").unwrap().0, "-");
        assert!(find_str("abc", "^b").is_none());
        assert_eq!(find_str("abc", "c$").unwrap().0, "c");
    }

    #[test]
    fn test_captures() {
        let (whole, caps) = find_str("name=lunapr", "(%w+)=(%w+)").unwrap();
        assert_eq!(whole, "name=lunapr");
        assert_eq!(caps, ["name", "lunapr"]);
        let (_, caps) = find_str("hello", "()ll()").unwrap();
        assert_eq!(caps, ["3", "5"]);
        let (whole, _) = find_str("say 'hi' now", "(['\"]).-%1").unwrap();
        assert_eq!(whole, "'hi'");
    }

    #[test]
    fn test_balance_and_frontier() {
        assert_eq!(find_str("f(a(b)c) d", "%b()").unwrap().0, "(a(b)c)");
        assert_eq!(find_str("THE (quick) fox", "%f[%a]%a+").unwrap().0, "THE");
        assert_eq!(find_str("THE (quick) fox", "%f[%l]%a+").unwrap().0, "quick");
    }

    #[test]
    fn test_malformed_patterns() {
        assert_eq!(find(b"abc", b"[a", 0), Err(PatternError::MissingBracket));
        assert_eq!(find(b"abc", b"a%", 0), Err(PatternError::EndsWithEscape));
        assert_eq!(find(b"abc", b"a)", 0), Err(PatternError::InvalidCapture));
        assert_eq!(find(b"abc", b"(a", 0), Err(PatternError::UnfinishedCapture));
    }
}
