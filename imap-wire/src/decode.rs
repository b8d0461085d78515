use crate::error::{DecodeError, DecodeResult};
use crate::{is_atom_char, is_atom_special};

/// Info extracted from a literal's `{N}`/`{N+}`/`~{N}`/`~{N+}` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralInfo {
    pub size: u64,
    pub non_sync: bool,
    pub binary: bool,
}

/// A cursor over a borrowed byte slice implementing every `Read*`
/// primitive spec.md §4.1 names. This is the "argument tail" decoder:
/// it never reads from the network directly, it only advances a
/// position within a slice the caller already buffered (typically one
/// command line). Literal *bodies* are read separately, straight off
/// the connection, via [`crate::literal::read_literal_body`] — see the
/// module docs.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.peek()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    pub fn expect_byte(&mut self, expected: u8) -> DecodeResult<()> {
        match self.peek() {
            Some(b) if b == expected => {
                self.advance(1);
                Ok(())
            }
            Some(found) => Err(DecodeError::UnexpectedByte { expected, found }),
            None => Err(DecodeError::Eof),
        }
    }

    pub fn read_sp(&mut self) -> DecodeResult<()> {
        self.expect_byte(b' ')
    }

    /// Consumes a trailing CRLF (or bare LF, tolerated the way most
    /// deployed servers tolerate it).
    pub fn read_crlf(&mut self) -> DecodeResult<()> {
        if self.peek() == Some(b'\r') {
            self.advance(1);
        }
        self.expect_byte(b'\n')
    }

    /// Longest run of atom-chars. Rejects an empty run.
    pub fn read_atom(&mut self) -> DecodeResult<&'a str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_atom_char(b) {
                self.advance(1);
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(DecodeError::EmptyAtom);
        }
        std::str::from_utf8(&self.buf[start..self.pos]).map_err(|_| DecodeError::EmptyAtom)
    }

    /// Same grammar as [`Self::read_atom`] but also accepts a leading
    /// `\` (system flags, RFC 3501 §9 `flag`).
    pub fn read_flag_atom(&mut self) -> DecodeResult<&'a str> {
        let start = self.pos;
        if self.peek() == Some(b'\\') {
            self.advance(1);
        }
        while let Some(b) = self.peek() {
            if is_atom_char(b) {
                self.advance(1);
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(DecodeError::EmptyAtom);
        }
        std::str::from_utf8(&self.buf[start..self.pos]).map_err(|_| DecodeError::EmptyAtom)
    }

    pub fn read_quoted_string(&mut self) -> DecodeResult<Vec<u8>> {
        self.expect_byte(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnterminatedQuotedString),
                Some(b'"') => {
                    self.advance(1);
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.advance(1);
                    match self.peek() {
                        Some(b @ (b'"' | b'\\')) => {
                            out.push(b);
                            self.advance(1);
                        }
                        _ => return Err(DecodeError::InvalidEscape),
                    }
                }
                Some(b'\r') | Some(b'\n') => return Err(DecodeError::UnterminatedQuotedString),
                Some(b) => {
                    out.push(b);
                    self.advance(1);
                }
            }
        }
    }

    /// Reads one of `{N}`, `{N+}`, `~{N}`, `~{N+}` followed by CRLF
    /// (RFC 7888 non-sync, RFC 3516 binary).
    pub fn read_literal_info(&mut self) -> DecodeResult<LiteralInfo> {
        let binary = if self.peek() == Some(b'~') {
            self.advance(1);
            true
        } else {
            false
        };
        self.expect_byte(b'{')?;
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.advance(1);
        }
        if self.pos == start {
            return Err(DecodeError::InvalidLiteral);
        }
        let size: u64 = std::str::from_utf8(&self.buf[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::InvalidLiteral)?;
        let non_sync = self.peek() == Some(b'+');
        if non_sync {
            self.advance(1);
        }
        self.expect_byte(b'}')?;
        self.read_crlf()?;
        Ok(LiteralInfo {
            size,
            non_sync,
            binary,
        })
    }

    /// Consumes a literal whose header has already been read off the
    /// wire and whose body has already been spliced into this buffer
    /// at the current position by the connection's command assembler
    /// (spec.md §9 "buffer the command line up to a literal prefix,
    /// parse it fully, then stream the literal from the transport").
    /// Any byte that follows the literal body (a space, or CRLF ending
    /// the line) is left for the caller to consume as usual.
    fn read_spliced_literal(&mut self, info: LiteralInfo) -> DecodeResult<Vec<u8>> {
        let size = usize::try_from(info.size).map_err(|_| DecodeError::InvalidLiteral)?;
        let end = self.pos.checked_add(size).ok_or(DecodeError::InvalidLiteral)?;
        if end > self.buf.len() {
            return Err(DecodeError::Eof);
        }
        let bytes = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    /// `atom | quoted-string | literal`. The literal form requires the
    /// body to already be present in this buffer — see
    /// [`Self::read_spliced_literal`].
    pub fn read_string(&mut self) -> DecodeResult<Vec<u8>> {
        match self.peek() {
            Some(b'"') => self.read_quoted_string(),
            Some(b'{') | Some(b'~') => {
                let info = self.read_literal_info()?;
                self.read_spliced_literal(info)
            }
            _ => self.read_atom().map(|s| s.as_bytes().to_vec()),
        }
    }

    /// astring: atom | quoted-string | literal, with a wider atom-char
    /// set than `read_atom` (list-wildcards and `]` are legal in an
    /// astring atom, RFC 3501 §9 `ASTRING-CHAR`).
    pub fn read_astring(&mut self) -> DecodeResult<Vec<u8>> {
        match self.peek() {
            Some(b'"') => return self.read_quoted_string(),
            Some(b'{') | Some(b'~') => {
                let info = self.read_literal_info()?;
                return self.read_spliced_literal(info);
            }
            _ => {}
        }
        let start = self.pos;
        while let Some(b) = self.peek() {
            let ok = is_atom_char(b) || matches!(b, b'%' | b'*' | b']');
            if ok {
                self.advance(1);
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(DecodeError::EmptyAtom);
        }
        Ok(self.buf[start..self.pos].to_vec())
    }

    /// `NIL` (case-insensitive, whole-token) or a string.
    pub fn read_nstring(&mut self) -> DecodeResult<Option<Vec<u8>>> {
        if self.looks_like_nil() {
            self.advance(3);
            return Ok(None);
        }
        self.read_string().map(Some)
    }

    fn looks_like_nil(&self) -> bool {
        let rest = self.remaining();
        rest.len() >= 3
            && rest[..3].eq_ignore_ascii_case(b"NIL")
            && rest.get(3).map(|b| !is_atom_char(*b)).unwrap_or(true)
    }

    pub fn read_number(&mut self) -> DecodeResult<u32> {
        self.read_number64().and_then(|n| {
            u32::try_from(n).map_err(|_| DecodeError::NumberOutOfRange)
        })
    }

    pub fn read_number64(&mut self) -> DecodeResult<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.advance(1);
        }
        if self.pos == start {
            return Err(DecodeError::NumberOutOfRange);
        }
        std::str::from_utf8(&self.buf[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::NumberOutOfRange)
    }

    /// `(` fn (SP fn)* `)`, empty list `()` allowed. `fn` is called
    /// once per element; it must consume exactly that element.
    pub fn read_list<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> DecodeResult<T>,
    ) -> DecodeResult<Vec<T>> {
        self.expect_byte(b'(')?;
        let mut out = Vec::new();
        if self.peek() == Some(b')') {
            self.advance(1);
            return Ok(out);
        }
        loop {
            out.push(f(self)?);
            match self.peek() {
                Some(b' ') => {
                    self.advance(1);
                }
                Some(b')') => {
                    self.advance(1);
                    return Ok(out);
                }
                _ => return Err(DecodeError::MalformedList),
            }
        }
    }

    /// Parenthesized list of flag atoms (RFC 3501 §9 `flag-list`).
    pub fn read_flags(&mut self) -> DecodeResult<Vec<String>> {
        self.read_list(|d| d.read_flag_atom().map(|s| s.to_string()))
    }

    /// Remaining bytes up to (and excluding) the next LF, with an
    /// optional preceding CR stripped. Leaves the cursor positioned
    /// after the LF.
    pub fn read_line(&mut self) -> DecodeResult<&'a [u8]> {
        let start = self.pos;
        let rel_nl = self.buf[start..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(DecodeError::Eof)?;
        let end = start + rel_nl;
        self.pos = end + 1;
        let line = &self.buf[start..end];
        Ok(line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// Asserts the whole slice has been consumed.
    pub fn finish(&self) -> DecodeResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_rejects_empty() {
        let mut d = Decoder::new(b" ");
        assert_eq!(d.read_atom(), Err(DecodeError::EmptyAtom));
    }

    #[test]
    fn quoted_string_handles_escapes() {
        let mut d = Decoder::new(br#""he said \"hi\" and \\slash""#);
        assert_eq!(d.read_quoted_string().unwrap(), br#"he said "hi" and \slash"#);
    }

    #[test]
    fn quoted_string_rejects_other_escapes() {
        let mut d = Decoder::new(br#""bad \n escape""#);
        assert_eq!(d.read_quoted_string(), Err(DecodeError::InvalidEscape));
    }

    #[test]
    fn literal_info_parses_all_four_prefixes() {
        assert_eq!(
            Decoder::new(b"{12}\r\n").read_literal_info().unwrap(),
            LiteralInfo { size: 12, non_sync: false, binary: false }
        );
        assert_eq!(
            Decoder::new(b"{12+}\r\n").read_literal_info().unwrap(),
            LiteralInfo { size: 12, non_sync: true, binary: false }
        );
        assert_eq!(
            Decoder::new(b"~{12}\r\n").read_literal_info().unwrap(),
            LiteralInfo { size: 12, non_sync: false, binary: true }
        );
        assert_eq!(
            Decoder::new(b"~{12+}\r\n").read_literal_info().unwrap(),
            LiteralInfo { size: 12, non_sync: true, binary: true }
        );
    }

    #[test]
    fn nstring_recognizes_nil_case_insensitively() {
        assert_eq!(Decoder::new(b"nil").read_nstring().unwrap(), None);
        assert_eq!(Decoder::new(b"NIL").read_nstring().unwrap(), None);
        assert_eq!(
            Decoder::new(b"NILS").read_nstring().unwrap(),
            Some(b"NILS".to_vec())
        );
    }

    #[test]
    fn list_allows_empty() {
        let mut d = Decoder::new(b"()");
        let items = d.read_list(|d| d.read_atom().map(str::to_string)).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn flags_list_keeps_backslash() {
        let mut d = Decoder::new(b"(\\Seen \\Deleted Junk)");
        assert_eq!(d.read_flags().unwrap(), vec!["\\Seen", "\\Deleted", "Junk"]);
    }

    #[test]
    fn number_rejects_overflow_of_u32() {
        let mut d = Decoder::new(b"99999999999");
        assert_eq!(d.read_number(), Err(DecodeError::NumberOutOfRange));
    }
}
