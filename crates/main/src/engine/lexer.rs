use compact_str::CompactString;

use crate::{
    engine::source::{SourceText, Span},
    error::ScriptingDetails,
};

#[derive(Clone, PartialEq, Debug)]
pub(crate) enum TokenKind {
    Ident(CompactString),
    Number(f64),
    Str(CompactString),

    Const,
    Let,
    Var,
    Function,
    Return,
    If,
    Else,
    While,
    Delete,
    This,
    True,
    False,
    Null,
    Undefined,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    Assign,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    AndAnd,
    OrOr,

    Eof,
}

#[derive(Clone, Debug)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) span: Span,
    pub(crate) line: u32,
}

/// Tokenizes the whole source upfront.
///
/// Malformed input is reported the way the engine surface words it:
/// `SyntaxError: Invalid or unexpected token` pointing at the offending
/// character.
pub(crate) fn tokenize(source: &SourceText) -> Result<Vec<Token>, ScriptingDetails> {
    let text = source.text();
    let bytes = text.as_bytes();

    let mut tokens = Vec::new();
    let mut position = 0usize;
    let mut line = 0u32;

    macro_rules! push {
        ($kind:expr, $start:expr, $end:expr) => {
            tokens.push(Token {
                kind: $kind,
                span: Span::new($start as u32, $end as u32),
                line,
            })
        };
    }

    while position < bytes.len() {
        let byte = bytes[position];

        match byte {
            b'\n' => {
                line += 1;
                position += 1;
            }

            b' ' | b'\t' | b'\r' => position += 1,

            b'/' if bytes.get(position + 1) == Some(&b'/') => {
                while position < bytes.len() && bytes[position] != b'\n' {
                    position += 1;
                }
            }

            b'/' if bytes.get(position + 1) == Some(&b'*') => {
                let start = position;

                position += 2;

                loop {
                    if position + 1 >= bytes.len() {
                        return Err(source.details(
                            "SyntaxError: Invalid or unexpected token",
                            Span::new(start as u32, start as u32 + 2),
                        ));
                    }

                    if bytes[position] == b'*' && bytes[position + 1] == b'/' {
                        position += 2;
                        break;
                    }

                    if bytes[position] == b'\n' {
                        line += 1;
                    }

                    position += 1;
                }
            }

            b'0'..=b'9' => {
                let start = position;

                while position < bytes.len() && bytes[position].is_ascii_digit() {
                    position += 1;
                }

                if position < bytes.len()
                    && bytes[position] == b'.'
                    && bytes
                        .get(position + 1)
                        .map(u8::is_ascii_digit)
                        .unwrap_or(false)
                {
                    position += 1;

                    while position < bytes.len() && bytes[position].is_ascii_digit() {
                        position += 1;
                    }
                }

                let value: f64 = match text[start..position].parse() {
                    Ok(value) => value,

                    Err(_) => {
                        return Err(source.details(
                            "SyntaxError: Invalid or unexpected token",
                            Span::new(start as u32, position as u32),
                        ));
                    }
                };

                push!(TokenKind::Number(value), start, position);
            }

            b'"' | b'\'' => {
                let quote = byte;
                let start = position;

                position += 1;

                let mut value = CompactString::default();

                loop {
                    if position >= bytes.len() || bytes[position] == b'\n' {
                        return Err(source.details(
                            "SyntaxError: Invalid or unexpected token",
                            Span::new(start as u32, position as u32),
                        ));
                    }

                    let byte = bytes[position];

                    if byte == quote {
                        position += 1;
                        break;
                    }

                    if byte == b'\\' {
                        let escaped = match bytes.get(position + 1) {
                            Some(b'n') => '\n',
                            Some(b't') => '\t',
                            Some(b'r') => '\r',
                            Some(b'0') => '\0',
                            Some(b'\\') => '\\',
                            Some(b'\'') => '\'',
                            Some(b'"') => '"',

                            _ => {
                                return Err(source.details(
                                    "SyntaxError: Invalid or unexpected token",
                                    Span::new(position as u32, position as u32 + 1),
                                ));
                            }
                        };

                        value.push(escaped);
                        position += 2;
                        continue;
                    }

                    // Multi-byte UTF-8 sequences are copied verbatim.
                    let char_start = position;

                    position += 1;

                    while position < bytes.len() && (bytes[position] & 0b1100_0000) == 0b1000_0000 {
                        position += 1;
                    }

                    value.push_str(&text[char_start..position]);
                }

                push!(TokenKind::Str(value), start, position);
            }

            byte if byte == b'_' || byte == b'$' || byte.is_ascii_alphabetic() => {
                let start = position;

                while position < bytes.len() {
                    let byte = bytes[position];

                    if byte == b'_' || byte == b'$' || byte.is_ascii_alphanumeric() {
                        position += 1;
                        continue;
                    }

                    break;
                }

                let word = &text[start..position];

                let kind = match word {
                    "const" => TokenKind::Const,
                    "let" => TokenKind::Let,
                    "var" => TokenKind::Var,
                    "function" => TokenKind::Function,
                    "return" => TokenKind::Return,
                    "if" => TokenKind::If,
                    "else" => TokenKind::Else,
                    "while" => TokenKind::While,
                    "delete" => TokenKind::Delete,
                    "this" => TokenKind::This,
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "undefined" => TokenKind::Undefined,
                    _ => TokenKind::Ident(CompactString::from(word)),
                };

                push!(kind, start, position);
            }

            _ => {
                let start = position;

                let (kind, width) = match byte {
                    b'(' => (TokenKind::LParen, 1),
                    b')' => (TokenKind::RParen, 1),
                    b'{' => (TokenKind::LBrace, 1),
                    b'}' => (TokenKind::RBrace, 1),
                    b'[' => (TokenKind::LBracket, 1),
                    b']' => (TokenKind::RBracket, 1),
                    b',' => (TokenKind::Comma, 1),
                    b';' => (TokenKind::Semicolon, 1),
                    b':' => (TokenKind::Colon, 1),
                    b'.' => (TokenKind::Dot, 1),
                    b'+' => (TokenKind::Plus, 1),
                    b'-' => (TokenKind::Minus, 1),
                    b'*' => (TokenKind::Star, 1),
                    b'/' => (TokenKind::Slash, 1),
                    b'%' => (TokenKind::Percent, 1),

                    b'=' => match (bytes.get(position + 1), bytes.get(position + 2)) {
                        (Some(b'='), Some(b'=')) => (TokenKind::StrictEq, 3),
                        (Some(b'='), _) => (TokenKind::Eq, 2),
                        _ => (TokenKind::Assign, 1),
                    },

                    b'!' => match (bytes.get(position + 1), bytes.get(position + 2)) {
                        (Some(b'='), Some(b'=')) => (TokenKind::StrictNotEq, 3),
                        (Some(b'='), _) => (TokenKind::NotEq, 2),
                        _ => (TokenKind::Not, 1),
                    },

                    b'<' => match bytes.get(position + 1) {
                        Some(b'=') => (TokenKind::Le, 2),
                        _ => (TokenKind::Lt, 1),
                    },

                    b'>' => match bytes.get(position + 1) {
                        Some(b'=') => (TokenKind::Ge, 2),
                        _ => (TokenKind::Gt, 1),
                    },

                    b'&' if bytes.get(position + 1) == Some(&b'&') => (TokenKind::AndAnd, 2),
                    b'|' if bytes.get(position + 1) == Some(&b'|') => (TokenKind::OrOr, 2),

                    _ => {
                        return Err(source.details(
                            "SyntaxError: Invalid or unexpected token",
                            Span::new(start as u32, start as u32 + 1),
                        ));
                    }
                };

                position += width;

                push!(kind, start, position);
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(bytes.len() as u32, bytes.len() as u32),
        line,
    });

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = SourceText::new(text, None);

        tokenize(&source)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn quadruple_equals_lexes_as_strict_eq_then_assign() {
        assert_eq!(
            kinds("a ==== 2"),
            vec![
                TokenKind::Ident(CompactString::from("a")),
                TokenKind::StrictEq,
                TokenKind::Assign,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ],
        );
    }

    #[test]
    fn tracks_lines_for_automatic_semicolons() {
        let source = SourceText::new("a\nb", None);
        let tokens = tokenize(&source).unwrap();

        assert_eq!(tokens[0].line, 0);
        assert_eq!(tokens[1].line, 1);
    }

    #[test]
    fn unterminated_string_is_invalid_token() {
        let source = SourceText::new("'abc", None);
        let details = tokenize(&source).unwrap_err();

        assert_eq!(details.message, "SyntaxError: Invalid or unexpected token");
    }
}
