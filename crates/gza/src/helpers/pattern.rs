//! A hand-rolled traditional pattern matcher (spec §4.7, §9): character classes, sets,
//! quantifiers, anchors, captures, and `%1`..`%9` backreferences — deliberately not a
//! full regular-expression engine (see DESIGN.md: the teacher's `modules/re.rs` wraps a
//! regex crate, which this spec scopes out in favor of "traditional minimalist patterns").
//!
//! Operates on bytes, matching the classic single-pass backtracking algorithm this style
//! of pattern engine is built around: try to match at each successive start position,
//! backtracking through quantifiers via recursion rather than building an NFA/DFA.
//!
//! `pattern` strings reach here straight from script arguments (`str_find`/`str_match`/
//! `str_replace`), so malformed syntax (a trailing `%`, an unterminated `[...]`, more
//! than nine open captures, a stray `)`) is attacker-reachable, not just a programmer
//! error — every such case is a `TypeError`, never a panic.

use crate::error::RuntimeError;

const MAX_CAPTURES: usize = 10;
/// Sentinel capture length: the capture is open (its start was seen, not yet its end).
const CAP_UNFINISHED: isize = -1;

#[derive(Debug, Clone, Copy)]
struct Capture {
    start: usize,
    len: isize,
}

struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<Capture>,
}

/// One matched span plus whatever `(...)` groups it captured.
#[derive(Debug, Clone)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<(usize, usize)>,
}

fn malformed(what: &str) -> RuntimeError {
    RuntimeError::type_error(format!("malformed pattern: {what}"))
}

fn match_class(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'd' => c.is_ascii_digit(),
        b'l' => c.is_ascii_lowercase(),
        b's' => c.is_ascii_whitespace(),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'c' => c.is_ascii_control(),
        b'p' => c.is_ascii_punctuation(),
        b'x' => c.is_ascii_hexdigit(),
        other => return other == c,
    };
    if cl.is_ascii_uppercase() { !res } else { res }
}

/// Returns the index just past the end of the class/set/literal starting at `p`.
fn class_end(pat: &[u8], p: usize) -> Result<usize, RuntimeError> {
    let mut p = p;
    let c = pat[p];
    p += 1;
    if c == b'%' {
        if p >= pat.len() {
            return Err(malformed("trailing '%'"));
        }
        return Ok(p + 1);
    }
    if c == b'[' {
        if p < pat.len() && pat[p] == b'^' {
            p += 1;
        }
        loop {
            if p >= pat.len() {
                return Err(malformed("unterminated '['"));
            }
            let cc = pat[p];
            p += 1;
            if cc == b'%' {
                if p >= pat.len() {
                    return Err(malformed("trailing '%' in set"));
                }
                p += 1;
            } else if cc == b']' {
                return Ok(p);
            }
        }
    }
    Ok(p)
}

fn match_set(c: u8, pat: &[u8], mut p: usize, ep: usize) -> bool {
    let mut negate = false;
    p += 1; // skip '['
    if pat[p] == b'^' {
        negate = true;
        p += 1;
    }
    let mut found = false;
    while p < ep - 1 {
        if pat[p] == b'%' {
            p += 1;
            if match_class(c, pat[p]) {
                found = true;
            }
            p += 1;
        } else if p + 2 < ep - 1 && pat[p + 1] == b'-' {
            if pat[p] <= c && c <= pat[p + 2] {
                found = true;
            }
            p += 3;
        } else {
            if pat[p] == c {
                found = true;
            }
            p += 1;
        }
    }
    found != negate
}

fn single_match(ms: &MatchState, s: usize, p: usize, ep: usize) -> bool {
    if s >= ms.src.len() {
        return false;
    }
    let c = ms.src[s];
    match ms.pat[p] {
        b'.' => true,
        b'%' => match_class(c, ms.pat[p + 1]),
        b'[' => match_set(c, ms.pat, p, ep),
        lit => lit == c,
    }
}

impl<'a> MatchState<'a> {
    /// Attempts to match `pat[p..]` against `src[s..]`, returning the end index in `src`
    /// on success. Mirrors the classic recursive-descent pattern matcher: each pattern
    /// construct (literal, class, set, quantifier, capture, anchor, backreference) is
    /// handled by one case, with `*`/`+`/`-` quantifiers recursing to backtrack.
    fn do_match(&mut self, s: usize, p: usize) -> Result<Option<usize>, RuntimeError> {
        if p >= self.pat.len() {
            return Ok(Some(s));
        }
        match self.pat[p] {
            b'(' => {
                if self.pat.get(p + 1) == Some(&b')') {
                    self.start_capture(s, p + 2, -2)
                } else {
                    self.start_capture(s, p + 1, CAP_UNFINISHED)
                }
            }
            b')' => self.end_capture(s, p + 1),
            b'$' if p + 1 == self.pat.len() => {
                Ok(if s == self.src.len() { Some(s) } else { None })
            }
            b'%' if matches!(self.pat.get(p + 1), Some(b'1'..=b'9')) => {
                let idx = (self.pat[p + 1] - b'1') as usize;
                Ok(self.match_capture(s, p + 2, idx))
            }
            _ => {
                let ep = class_end(self.pat, p)?;
                let matches_here = single_match(self, s, p, ep);
                match self.pat.get(ep) {
                    Some(b'?') => {
                        if matches_here {
                            if let Some(r) = self.do_match(s + 1, ep + 1)? {
                                return Ok(Some(r));
                            }
                        }
                        self.do_match(s, ep + 1)
                    }
                    Some(b'+') => {
                        if matches_here { self.max_expand(s + 1, p, ep) } else { Ok(None) }
                    }
                    Some(b'*') => self.max_expand(s, p, ep),
                    Some(b'-') => self.min_expand(s, p, ep),
                    _ => {
                        if matches_here { self.do_match(s + 1, ep) } else { Ok(None) }
                    }
                }
            }
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        let mut count = 0usize;
        while single_match(self, s + count, p, ep) {
            count += 1;
        }
        loop {
            if let Some(r) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(r));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        loop {
            if let Some(r) = self.do_match(s, ep + 1)? {
                return Ok(Some(r));
            }
            if single_match(self, s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: isize) -> Result<Option<usize>, RuntimeError> {
        if self.captures.len() >= MAX_CAPTURES {
            return Err(malformed("too many captures"));
        }
        self.captures.push(Capture { start: s, len: what });
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures.pop();
        }
        Ok(res)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, RuntimeError> {
        let idx = self
            .captures
            .iter()
            .rposition(|c| c.len == CAP_UNFINISHED)
            .ok_or_else(|| malformed("')' with no open capture"))?;
        self.captures[idx].len = (s - self.captures[idx].start) as isize;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures[idx].len = CAP_UNFINISHED;
        }
        Ok(res)
    }

    fn match_capture(&mut self, s: usize, p: usize, idx: usize) -> Option<usize> {
        let cap = *self.captures.get(idx)?;
        if cap.len < 0 {
            return None;
        }
        let len = cap.len as usize;
        let text = &self.src[cap.start..cap.start + len];
        if s + len <= self.src.len() && &self.src[s..s + len] == text {
            self.do_match(s + len, p).ok().flatten()
        } else {
            None
        }
    }
}

/// Finds the first match of `pattern` in `s` at or after byte offset `init`.
///
/// Returns a `TypeError` if `pattern` is malformed (trailing `%`, unterminated `[...]`,
/// too many captures, unmatched `)`).
pub fn find(s: &str, pattern: &str, init: usize) -> Result<Option<Match>, RuntimeError> {
    let src = s.as_bytes();
    let (anchored, pat) = match pattern.as_bytes().first() {
        Some(b'^') => (true, &pattern.as_bytes()[1..]),
        _ => (false, pattern.as_bytes()),
    };
    let mut start = init.min(src.len());
    loop {
        let mut ms = MatchState { src, pat, captures: Vec::new() };
        if let Some(end) = ms.do_match(start, 0)? {
            let captures = ms
                .captures
                .iter()
                .map(|c| (c.start, c.start + c.len.max(0) as usize))
                .collect();
            return Ok(Some(Match { start, end, captures }));
        }
        if anchored || start >= src.len() {
            return Ok(None);
        }
        start += 1;
    }
}

/// Replaces up to `max` (or all, if `None`) matches of `pattern` in `s` with `repl`,
/// expanding `%0`..`%9` backreferences (`%0` is the whole match) and `%%` as a literal
/// percent.
pub fn gsub(s: &str, pattern: &str, repl: &str, max: Option<usize>) -> Result<(String, usize), RuntimeError> {
    let mut out = String::with_capacity(s.len());
    let mut count = 0usize;
    let mut pos = 0usize;
    while pos <= s.len() {
        if max.is_some_and(|m| count >= m) {
            break;
        }
        let Some(m) = find(s, pattern, pos)? else { break };
        out.push_str(&s[pos..m.start]);
        out.push_str(&expand_replacement(s, &m, repl));
        count += 1;
        pos = if m.end > m.start {
            m.end
        } else {
            if m.end < s.len() {
                out.push_str(&s[m.end..m.end + 1]);
            }
            m.end + 1
        };
    }
    if pos <= s.len() {
        out.push_str(&s[pos..]);
    }
    Ok((out, count))
}

fn expand_replacement(s: &str, m: &Match, repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let bytes = repl.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            match next {
                b'0' => out.push_str(&s[m.start..m.end]),
                b'1'..=b'9' => {
                    let idx = (next - b'1') as usize;
                    if let Some((cs, ce)) = m.captures.get(idx) {
                        out.push_str(&s[*cs..*ce]);
                    }
                }
                b'%' => out.push('%'),
                other => out.push(other as char),
            }
            i += 2;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_find() {
        let m = find("hello world", "world", 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (6, 11));
    }

    #[test]
    fn digit_class_quantifier() {
        let m = find("abc123def", "%d+", 0).unwrap().unwrap();
        assert_eq!(&"abc123def"[m.start..m.end], "123");
    }

    #[test]
    fn anchored_pattern_only_matches_at_start() {
        assert!(find("abc", "^b", 0).unwrap().is_none());
        assert!(find("abc", "^a", 0).unwrap().is_some());
    }

    #[test]
    fn capture_group_extracted() {
        let m = find("key=value", "(%a+)=(%a+)", 0).unwrap().unwrap();
        let (ks, ke) = m.captures[0];
        let (vs, ve) = m.captures[1];
        assert_eq!(&"key=value"[ks..ke], "key");
        assert_eq!(&"key=value"[vs..ve], "value");
    }

    #[test]
    fn gsub_with_backreference() {
        let (out, count) = gsub("a=1,b=2", "(%a)=(%d)", "%2=%1", None).unwrap();
        assert_eq!(out, "1=a,2=b");
        assert_eq!(count, 2);
    }

    #[test]
    fn character_set_negation() {
        assert!(find("abc", "[^a]", 0).unwrap().unwrap().start == 1);
    }

    #[test]
    fn malformed_pattern_errors_instead_of_panicking() {
        assert!(find("x", "[", 0).is_err());
        assert!(find("x", "%", 0).is_err());
        assert!(find("x", ")", 0).is_err());
        let too_many = "(".repeat(MAX_CAPTURES + 1) + &")".repeat(MAX_CAPTURES + 1);
        assert!(find("", &too_many, 0).is_err());
    }
}
