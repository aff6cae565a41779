//! Source Lexing - Pluggable Tokenizers for Stripping
//!
//! The transformer only needs to tell comments and whitespace apart from
//! everything else, so tokens carry a coarse kind and the raw bytes they
//! cover. Concatenating the text of every token reproduces the input.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    InlineHtml,
    OpenTag,
    CloseTag,
    Comment,
    DocComment,
    Whitespace,
    /// Strings, heredocs, identifiers, operators.
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a [u8],
}

#[derive(Debug, Error)]
pub enum LexError {
    #[error("Lexer error at byte {offset}: {message}")]
    Invalid { offset: usize, message: String },
}

/// A tokenizer for the embedded source language.
pub trait Lexer {
    fn name(&self) -> &'static str;
    fn tokenize<'a>(&self, source: &'a [u8]) -> Result<Vec<Token<'a>>, LexError>;
}

/// Tokenizer for PHP source, following the PHP 8 lexer's comment rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhpLexer;

impl Lexer for PhpLexer {
    fn name(&self) -> &'static str {
        "php"
    }

    fn tokenize<'a>(&self, source: &'a [u8]) -> Result<Vec<Token<'a>>, LexError> {
        let mut scanner = Scanner { src: source, pos: 0, spans: Vec::new() };
        scanner.run();
        Ok(scanner
            .spans
            .into_iter()
            .map(|(kind, start, end)| Token { kind, text: &source[start..end] })
            .collect())
    }
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    spans: Vec<(TokenKind, usize, usize)>,
}

impl<'a> Scanner<'a> {
    fn run(&mut self) {
        let mut in_php = false;
        while self.pos < self.src.len() {
            if in_php {
                in_php = self.php_token();
            } else {
                self.inline_html();
                in_php = true;
            }
        }
    }

    fn emit(&mut self, kind: TokenKind, start: usize) {
        if start == self.pos {
            return;
        }
        // Adjacent code bytes form one token.
        if let Some((TokenKind::Code, _, end)) = self.spans.last_mut() {
            if kind == TokenKind::Code && *end == start {
                *end = self.pos;
                return;
            }
        }
        self.spans.push((kind, start, self.pos));
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn starts_with(&self, needle: &[u8]) -> bool {
        self.src[self.pos..].starts_with(needle)
    }

    fn starts_with_ignore_case(&self, needle: &[u8]) -> bool {
        self.src.len() - self.pos >= needle.len()
            && self.src[self.pos..self.pos + needle.len()].eq_ignore_ascii_case(needle)
    }

    /// Consume HTML up to and including the next open tag.
    fn inline_html(&mut self) {
        let start = self.pos;
        while self.pos < self.src.len() {
            if let Some(len) = self.open_tag_len() {
                self.emit(TokenKind::InlineHtml, start);
                let tag_start = self.pos;
                self.pos += len;
                self.emit(TokenKind::OpenTag, tag_start);
                return;
            }
            self.pos += 1;
        }
        self.emit(TokenKind::InlineHtml, start);
    }

    fn open_tag_len(&self) -> Option<usize> {
        if self.starts_with(b"<?=") {
            return Some(3);
        }
        if !self.starts_with_ignore_case(b"<?php") {
            return None;
        }
        match self.peek(5) {
            None => Some(5),
            Some(b'\r') if self.peek(6) == Some(b'\n') => Some(7),
            Some(b' ' | b'\t' | b'\n' | b'\r') => Some(6),
            _ => None,
        }
    }

    /// Lex one token in PHP mode. Returns false once a close tag is consumed.
    fn php_token(&mut self) -> bool {
        let start = self.pos;
        let c = self.src[self.pos];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                while matches!(self.peek(0), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                    self.pos += 1;
                }
                self.emit(TokenKind::Whitespace, start);
            }
            b'#' if self.peek(1) != Some(b'[') => self.line_comment(start),
            b'/' if self.peek(1) == Some(b'/') => self.line_comment(start),
            b'/' if self.peek(1) == Some(b'*') => self.block_comment(start),
            b'?' if self.peek(1) == Some(b'>') => {
                self.pos += 2;
                if self.starts_with(b"\r\n") {
                    self.pos += 2;
                } else if matches!(self.peek(0), Some(b'\n')) {
                    self.pos += 1;
                }
                self.emit(TokenKind::CloseTag, start);
                return false;
            }
            b'\'' => {
                self.pos = skip_quoted(self.src, self.pos, b'\'');
                self.emit(TokenKind::Code, start);
            }
            b'"' | b'`' => {
                self.pos = skip_interpolated(self.src, self.pos, c);
                self.emit(TokenKind::Code, start);
            }
            b'<' if self.starts_with(b"<<<") => {
                self.pos = skip_heredoc(self.src, self.pos);
                self.emit(TokenKind::Code, start);
            }
            _ => {
                self.pos += 1;
                self.emit(TokenKind::Code, start);
            }
        }
        true
    }

    /// `//` and `#` comments end before a newline or a close tag.
    fn line_comment(&mut self, start: usize) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' || b == b'\r' || self.starts_with(b"?>") {
                break;
            }
            self.pos += 1;
        }
        self.emit(TokenKind::Comment, start);
    }

    /// An unterminated block comment runs to end of input.
    fn block_comment(&mut self, start: usize) {
        let doc = self.starts_with(b"/**")
            && matches!(self.peek(3), Some(b' ' | b'\t' | b'\r' | b'\n'));
        self.pos += 2;
        match find(&self.src[self.pos..], b"*/") {
            Some(end) => self.pos += end + 2,
            None => self.pos = self.src.len(),
        }
        let kind = if doc { TokenKind::DocComment } else { TokenKind::Comment };
        self.emit(kind, start);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Skip a quoted literal starting at `start`, honoring backslash escapes.
fn skip_quoted(src: &[u8], start: usize, quote: u8) -> usize {
    let mut pos = start + 1;
    while pos < src.len() {
        match src[pos] {
            b'\\' => pos += 2,
            b if b == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    src.len()
}

/// Skip a double-quoted or backtick literal, including `{$...}` and `${...}`
/// expressions that may themselves contain quotes.
fn skip_interpolated(src: &[u8], start: usize, quote: u8) -> usize {
    let mut pos = start + 1;
    while pos < src.len() {
        match src[pos] {
            b'\\' => pos += 2,
            b'{' if src.get(pos + 1) == Some(&b'$') => pos = skip_braced(src, pos),
            b'$' if src.get(pos + 1) == Some(&b'{') => pos = skip_braced(src, pos + 1),
            b if b == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    src.len()
}

/// Skip a brace-balanced code span starting at the opening `{`.
fn skip_braced(src: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut pos = start;
    while pos < src.len() {
        match src[pos] {
            b'{' => {
                depth += 1;
                pos += 1;
            }
            b'}' => {
                depth -= 1;
                pos += 1;
                if depth == 0 {
                    return pos;
                }
            }
            b'\'' => pos = skip_quoted(src, pos, b'\''),
            b'"' => pos = skip_interpolated(src, pos, b'"'),
            _ => pos += 1,
        }
    }
    src.len()
}

/// Skip a heredoc or nowdoc, including its closing identifier.
fn skip_heredoc(src: &[u8], start: usize) -> usize {
    let mut pos = start + 3;
    while matches!(src.get(pos), Some(b' ' | b'\t')) {
        pos += 1;
    }
    let quote = match src.get(pos) {
        Some(&q @ (b'\'' | b'"')) => {
            pos += 1;
            Some(q)
        }
        _ => None,
    };
    let ident_start = pos;
    while src.get(pos).is_some_and(|&b| is_ident_byte(b)) {
        pos += 1;
    }
    let ident = &src[ident_start..pos];
    if ident.is_empty() {
        // Not a heredoc after all; treat `<<<` as an operator.
        return start + 3;
    }
    if let Some(q) = quote {
        if src.get(pos) != Some(&q) {
            return start + 3;
        }
        pos += 1;
    }

    // Body starts on the next line.
    match find(&src[pos..], b"\n") {
        Some(nl) => pos += nl + 1,
        None => return src.len(),
    }
    loop {
        let mut line = pos;
        while matches!(src.get(line), Some(b' ' | b'\t')) {
            line += 1;
        }
        if src[line..].starts_with(ident)
            && !src.get(line + ident.len()).is_some_and(|&b| is_ident_byte(b))
        {
            return line + ident.len();
        }
        match find(&src[pos..], b"\n") {
            Some(nl) => pos += nl + 1,
            None => return src.len(),
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        PhpLexer
            .tokenize(src.as_bytes())
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, String::from_utf8_lossy(t.text).into_owned()))
            .collect()
    }

    fn comments(src: &str) -> Vec<String> {
        kinds(src)
            .into_iter()
            .filter(|(k, _)| matches!(k, TokenKind::Comment | TokenKind::DocComment))
            .map(|(_, t)| t)
            .collect()
    }

    #[test]
    fn test_tokens_cover_input() {
        let src = "<html>\n<?php\n/** doc */\nfunction a() { return 'x'; } // c\n?>\ntail";
        let joined: String = kinds(src).into_iter().map(|(_, t)| t).collect();
        assert_eq!(joined, src);
    }

    #[test]
    fn test_open_tag_includes_one_newline() {
        let toks = kinds("<?php\n\necho 1;");
        assert_eq!(toks[0], (TokenKind::OpenTag, "<?php\n".to_string()));
        assert_eq!(toks[1], (TokenKind::Whitespace, "\n".to_string()));
    }

    #[test]
    fn test_comment_kinds() {
        let toks = kinds("<?php /** a */ /* b */ /**/ # c\n// d\n");
        let found: Vec<_> = toks
            .iter()
            .filter(|(k, _)| matches!(k, TokenKind::Comment | TokenKind::DocComment))
            .cloned()
            .collect();
        assert_eq!(
            found,
            vec![
                (TokenKind::DocComment, "/** a */".to_string()),
                (TokenKind::Comment, "/* b */".to_string()),
                (TokenKind::Comment, "/**/".to_string()),
                (TokenKind::Comment, "# c".to_string()),
                (TokenKind::Comment, "// d".to_string()),
            ]
        );
    }

    #[test]
    fn test_comment_markers_inside_strings_are_code() {
        let src = "<?php $a = '// no'; $b = \"/* no */ {$c[\"#\"]}\"; $d = `# no`;";
        assert!(comments(src).is_empty());
    }

    #[test]
    fn test_dollar_brace_expression_stays_in_string() {
        let toks = kinds("<?php $x = \"${a[\"b  c\"]}\";");
        assert_eq!(toks.last().unwrap(), &(TokenKind::Code, "\"${a[\"b  c\"]}\";".to_string()));
    }

    #[test]
    fn test_line_comment_stops_at_close_tag() {
        let toks = kinds("<?php // c ?>html");
        assert!(toks.contains(&(TokenKind::Comment, "// c ".to_string())));
        assert!(toks.contains(&(TokenKind::CloseTag, "?>".to_string())));
        assert_eq!(toks.last().unwrap(), &(TokenKind::InlineHtml, "html".to_string()));
    }

    #[test]
    fn test_attribute_is_not_a_comment() {
        assert!(comments("<?php #[Attr]\nclass A {}").is_empty());
    }

    #[test]
    fn test_heredoc_body_is_opaque() {
        let src = "<?php $x = <<<EOT\n  // not a comment\n  /* nor this */\n  EOT;\n// real\n";
        assert_eq!(comments(src), vec!["// real".to_string()]);
    }

    #[test]
    fn test_nowdoc_body_is_opaque() {
        let src = "<?php $x = <<<'SQL'\n# keep\nSQL;\n";
        assert!(comments(src).is_empty());
    }

    #[test]
    fn test_unterminated_block_comment_runs_to_end() {
        assert_eq!(comments("<?php /* open"), vec!["/* open".to_string()]);
    }

    #[test]
    fn test_plain_text_is_inline_html() {
        let toks = kinds("just text\n");
        assert_eq!(toks, vec![(TokenKind::InlineHtml, "just text\n".to_string())]);
    }
}
