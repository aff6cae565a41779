//! Content Transformation - What Gets Written for Each Entry

use tracing::warn;

use crate::lexer::{Lexer, TokenKind};
use crate::version::BuildContext;

pub const VERSION_PLACEHOLDER: &str = "@package_version@";
pub const BRANCH_ALIAS_PLACEHOLDER: &str = "@package_branch_alias_version@";
pub const RELEASE_DATE_PLACEHOLDER: &str = "@release_date@";

/// Turns raw file bytes into archive entry bytes.
///
/// With no lexer, stripping is a no-op.
pub struct ContentTransformer {
    lexer: Option<Box<dyn Lexer>>,
}

impl ContentTransformer {
    pub fn new(lexer: Option<Box<dyn Lexer>>) -> Self {
        Self { lexer }
    }

    /// Prepare a file for the archive.
    ///
    /// `file_name` is the last path component, used to spot license files.
    pub fn prepare(&self, file_name: &str, content: Vec<u8>, strip: bool) -> Vec<u8> {
        if strip {
            self.strip_whitespace(content)
        } else if file_name == "LICENSE" {
            wrap_license(&content)
        } else {
            content
        }
    }

    /// Drop comments and redundant whitespace, keeping line numbers intact.
    pub fn strip_whitespace(&self, source: Vec<u8>) -> Vec<u8> {
        let Some(lexer) = self.lexer.as_deref() else {
            return source;
        };
        let tokens = match lexer.tokenize(&source) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(lexer = lexer.name(), error = %e, "tokenizing failed, embedding unstripped");
                return source;
            }
        };

        let mut output = Vec::with_capacity(source.len());
        for token in tokens {
            match token.kind {
                TokenKind::Comment | TokenKind::DocComment => {
                    let lines = token.text.iter().filter(|&&b| b == b'\n').count();
                    output.extend(std::iter::repeat(b'\n').take(lines));
                }
                TokenKind::Whitespace => output.extend(squeeze_whitespace(token.text)),
                _ => output.extend_from_slice(token.text),
            }
        }
        output
    }
}

impl Default for ContentTransformer {
    fn default() -> Self {
        Self::new(Some(Box::new(crate::lexer::PhpLexer)))
    }
}

/// Collapse blank runs, unify line endings, and drop indentation.
fn squeeze_whitespace(ws: &[u8]) -> Vec<u8> {
    let mut collapsed = Vec::with_capacity(ws.len());
    let mut i = 0;
    while i < ws.len() {
        match ws[i] {
            b' ' | b'\t' => {
                while i < ws.len() && matches!(ws[i], b' ' | b'\t') {
                    i += 1;
                }
                collapsed.push(b' ');
            }
            b'\r' => {
                i += if ws.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                collapsed.push(b'\n');
            }
            b => {
                collapsed.push(b);
                i += 1;
            }
        }
    }

    let mut out = Vec::with_capacity(collapsed.len());
    for b in collapsed {
        if b == b' ' && out.last() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Surround license text with blank lines so it reads cleanly in listings.
pub fn wrap_license(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 2);
    out.push(b'\n');
    out.extend_from_slice(content);
    out.push(b'\n');
    out
}

/// Fill the version placeholders of the versioned source file.
pub fn substitute_version(content: &[u8], ctx: &BuildContext) -> Vec<u8> {
    let release_date = ctx.release_date();
    let replacements: [(&[u8], &[u8]); 3] = [
        (VERSION_PLACEHOLDER.as_bytes(), ctx.version.as_bytes()),
        (BRANCH_ALIAS_PLACEHOLDER.as_bytes(), ctx.branch_alias_version.as_bytes()),
        (RELEASE_DATE_PLACEHOLDER.as_bytes(), release_date.as_bytes()),
    ];

    // Single pass, so replacement text is never re-scanned.
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;
    'scan: while i < content.len() {
        for (from, to) in &replacements {
            if content[i..].starts_with(from) {
                out.extend_from_slice(to);
                i += from.len();
                continue 'scan;
            }
        }
        out.push(content[i]);
        i += 1;
    }
    out
}

/// Remove a leading `#!` line and the whitespace after it.
pub fn strip_shebang(content: &[u8]) -> &[u8] {
    if !content.starts_with(b"#!") {
        return content;
    }
    let mut i = content
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .unwrap_or(content.len());
    while i < content.len() && content[i].is_ascii_whitespace() {
        i += 1;
    }
    &content[i..]
}
