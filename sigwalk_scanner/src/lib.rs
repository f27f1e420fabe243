pub mod cipher;

use std::fmt::Display;

use itertools::Itertools;

/// Byte signature where every position is either an exact byte or a wildcard.
///
/// Wildcards are stored as `sig = 0, mask = 0` so a position matches when
/// `data & mask == sig`.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct Pattern {
    pub sig: Vec<u8>,
    pub mask: Vec<u8>,
}

impl Pattern {
    /// Parse IDA style pattern text (`"48 8B ? ?? 01"`).
    ///
    /// Tokens are separated by exactly one delimiter character which is skipped without
    /// inspection. `?` and `??` are wildcards, anything else is read as a base-16 number that
    /// consumes every hex digit it can. Malformed tokens produce a best-effort byte instead of an
    /// error; this only ever sees decoded or built-in text.
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        let text = s.as_ref().as_bytes();

        let mut sig = vec![];
        let mut mask = vec![];

        let mut i = 0;
        while i < text.len() {
            let next = if text[i] == b'?' {
                sig.push(0);
                mask.push(0);
                if text.get(i + 1) == Some(&b'?') {
                    i + 2
                } else {
                    i + 1
                }
            } else {
                let (value, consumed) = parse_hex_prefix(&text[i..]);
                sig.push(value as u8);
                mask.push(0xff);
                i + consumed
            };
            i = next + 1;
        }

        Self { sig, mask }
    }

    /// Create a pattern from a literal byte string with every position exact.
    pub fn from_bytes(sig: Vec<u8>) -> Self {
        Self {
            mask: vec![0xff; sig.len()],
            sig,
        }
    }

    /// Create a pattern from tokens where `None` is a wildcard.
    pub fn from_tokens<I: IntoIterator<Item = Option<u8>>>(tokens: I) -> Self {
        let (sig, mask) = tokens
            .into_iter()
            .map(|token| match token {
                Some(byte) => (byte, 0xff),
                None => (0, 0),
            })
            .unzip();
        Self { sig, mask }
    }

    pub fn tokens(&self) -> impl Iterator<Item = Option<u8>> + '_ {
        self.sig
            .iter()
            .zip(&self.mask)
            .map(|(sig, mask)| (*mask != 0).then_some(*sig))
    }

    pub fn len(&self) -> usize {
        self.sig.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sig.is_empty()
    }

    #[inline(always)]
    pub fn is_match(&self, data: &[u8], index: usize) -> bool {
        for i in 0..self.len() {
            if data[index + i] & self.mask[i] != self.sig[i] {
                return false;
            }
        }
        true
    }

    /// Brute force search for the first offset in `data` matching the pattern.
    ///
    /// Candidate offsets are `0..data.len() - self.len()`, so a match ending exactly on the last
    /// byte of `data` is not reported. Empty patterns and patterns longer than `data` never match.
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        if self.is_empty() || self.len() > data.len() {
            return None;
        }
        let scan_range = data.len() - self.len();
        (0..scan_range).find(|&index| self.is_match(data, index))
    }

    /// Render tokens joined by `delimiter`, bytes as two uppercase hex digits and wildcards as
    /// `?`. Parsing the result reproduces `self`.
    pub fn render(&self, delimiter: char) -> String {
        self.tokens()
            .map(|token| match token {
                Some(byte) => format!("{byte:02X}"),
                None => "?".to_string(),
            })
            .join(&delimiter.to_string())
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render(' '))
    }
}
impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern(\"{self}\")")
    }
}

/// `strtoul(s, &end, 16)` over a byte slice: leading whitespace, optional sign, optional `0x`
/// prefix, then every hex digit. Returns the value (saturated to 32 bits) and the number of bytes
/// consumed, which is 0 when no digit was found.
fn parse_hex_prefix(s: &[u8]) -> (u32, usize) {
    let mut i = 0;
    while i < s.len() && s[i].is_ascii_whitespace() {
        i += 1;
    }

    let negative = match s.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    if s.get(i) == Some(&b'0')
        && matches!(s.get(i + 1), Some(b'x' | b'X'))
        && s.get(i + 2).is_some_and(u8::is_ascii_hexdigit)
    {
        i += 2;
    }

    let digits_start = i;
    let mut value: u32 = 0;
    let mut overflow = false;
    while let Some(digit) = s.get(i).and_then(|c| (*c as char).to_digit(16)) {
        match value.checked_mul(16).and_then(|v| v.checked_add(digit)) {
            Some(v) => value = v,
            None => overflow = true,
        }
        i += 1;
    }

    if i == digits_start {
        return (0, 0);
    }
    if overflow {
        return (u32::MAX, i);
    }
    (if negative { value.wrapping_neg() } else { value }, i)
}

/// Scan `data` mapped at `base_address` and return the absolute address of the first match.
pub fn scan_pattern(pattern: &Pattern, base_address: usize, data: &[u8]) -> Option<usize> {
    pattern.find(data).map(|offset| base_address + offset)
}
