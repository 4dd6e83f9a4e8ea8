// File: src/lexer.rs
//
// Hand-rolled character-at-a-time scanner for Lox source text. Produces a
// flat token stream terminated by `Eof`; every token carries the line it
// started on so the parser and compiler can report precise diagnostics.

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Single-character punctuation
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One-or-two character operators
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals
    Identifier(String),
    String(String),
    Number(f64),

    // Keywords
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// A lexical error: an unterminated string or an unrecognized character.
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: usize,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    Some(match ident {
        "and" => TokenKind::And,
        "class" => TokenKind::Class,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "fun" => TokenKind::Fun,
        "if" => TokenKind::If,
        "nil" => TokenKind::Nil,
        "or" => TokenKind::Or,
        "print" => TokenKind::Print,
        "return" => TokenKind::Return,
        "super" => TokenKind::Super,
        "this" => TokenKind::This,
        "true" => TokenKind::True,
        "var" => TokenKind::Var,
        "while" => TokenKind::While,
        _ => return None,
    })
}

/// Scans `source` into a token stream, collecting (rather than stopping
/// at) lexical errors so the parser can still report everything it can.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\r' | '\t' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                line += 1;
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    while let Some(&ch) = chars.peek() {
                        if ch == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    tokens.push(Token { kind: TokenKind::Slash, line });
                }
            }
            '(' => push_punct(&mut chars, &mut tokens, line, TokenKind::LeftParen),
            ')' => push_punct(&mut chars, &mut tokens, line, TokenKind::RightParen),
            '{' => push_punct(&mut chars, &mut tokens, line, TokenKind::LeftBrace),
            '}' => push_punct(&mut chars, &mut tokens, line, TokenKind::RightBrace),
            ',' => push_punct(&mut chars, &mut tokens, line, TokenKind::Comma),
            '.' => push_punct(&mut chars, &mut tokens, line, TokenKind::Dot),
            '-' => push_punct(&mut chars, &mut tokens, line, TokenKind::Minus),
            '+' => push_punct(&mut chars, &mut tokens, line, TokenKind::Plus),
            ';' => push_punct(&mut chars, &mut tokens, line, TokenKind::Semicolon),
            '*' => push_punct(&mut chars, &mut tokens, line, TokenKind::Star),
            '!' => {
                chars.next();
                let kind = if chars.peek() == Some(&'=') {
                    chars.next();
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                tokens.push(Token { kind, line });
            }
            '=' => {
                chars.next();
                let kind = if chars.peek() == Some(&'=') {
                    chars.next();
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                tokens.push(Token { kind, line });
            }
            '<' => {
                chars.next();
                let kind = if chars.peek() == Some(&'=') {
                    chars.next();
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                tokens.push(Token { kind, line });
            }
            '>' => {
                chars.next();
                let kind = if chars.peek() == Some(&'=') {
                    chars.next();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                tokens.push(Token { kind, line });
            }
            '"' => {
                let start_line = line;
                chars.next();
                let mut s = String::new();
                let mut terminated = false;
                while let Some(&ch) = chars.peek() {
                    chars.next();
                    if ch == '"' {
                        terminated = true;
                        break;
                    }
                    if ch == '\n' {
                        line += 1;
                    }
                    s.push(ch);
                }
                if terminated {
                    tokens.push(Token { kind: TokenKind::String(s), line: start_line });
                } else {
                    errors.push(LexError {
                        message: "Unterminated string.".to_string(),
                        line: start_line,
                    });
                }
            }
            '0'..='9' => {
                let mut num = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() {
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'.') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                        num.push('.');
                        chars.next();
                        while let Some(&ch) = chars.peek() {
                            if ch.is_ascii_digit() {
                                num.push(ch);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                let value = num.parse().unwrap_or(0.0);
                tokens.push(Token { kind: TokenKind::Number(value), line });
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = keyword(&ident).unwrap_or(TokenKind::Identifier(ident));
                tokens.push(Token { kind, line });
            }
            other => {
                errors.push(LexError {
                    message: format!("Unexpected character '{}'.", other),
                    line,
                });
                chars.next();
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, line });
    (tokens, errors)
}

fn push_punct(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    tokens: &mut Vec<Token>,
    line: usize,
    kind: TokenKind,
) {
    chars.next();
    tokens.push(Token { kind, line });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_punctuation_and_operators() {
        let (tokens, errors) = tokenize("(){}, . - + ; * / ! != = == < <= > >=");
        assert!(errors.is_empty());
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Semicolon,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_number_with_fraction() {
        let (tokens, _) = tokenize("1.5 2 3.");
        assert_eq!(tokens[0].kind, TokenKind::Number(1.5));
        assert_eq!(tokens[1].kind, TokenKind::Number(2.0));
        // trailing '.' with no following digit is not part of the number
        assert_eq!(tokens[2].kind, TokenKind::Number(3.0));
        assert_eq!(tokens[3].kind, TokenKind::Dot);
    }

    #[test]
    fn tokenizes_keywords_vs_identifiers() {
        let (tokens, _) = tokenize("var x = this.class_");
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds[0], TokenKind::Var);
        assert_eq!(kinds[1], TokenKind::Identifier("x".to_string()));
        assert_eq!(kinds[3], TokenKind::This);
        assert_eq!(kinds[5], TokenKind::Identifier("class_".to_string()));
    }

    #[test]
    fn reports_unterminated_string() {
        let (_, errors) = tokenize("\"unterminated");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Unterminated"));
    }

    #[test]
    fn tracks_line_numbers_across_newlines_in_strings() {
        let (tokens, _) = tokenize("\"a\nb\" 1");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn skips_line_comments() {
        let (tokens, _) = tokenize("1 // a comment\n2");
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]);
    }
}
