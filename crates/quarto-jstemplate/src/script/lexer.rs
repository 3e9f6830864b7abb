/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizer for program text.

use std::fmt;

use crate::error::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Break,
    Const,
    Continue,
    Else,
    False,
    For,
    Function,
    If,
    In,
    Let,
    Null,
    Return,
    True,
    Typeof,
    Var,
    While,
    With,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident {
            "break" => Keyword::Break,
            "const" => Keyword::Const,
            "continue" => Keyword::Continue,
            "else" => Keyword::Else,
            "false" => Keyword::False,
            "for" => Keyword::For,
            "function" => Keyword::Function,
            "if" => Keyword::If,
            "in" => Keyword::In,
            "let" => Keyword::Let,
            "null" => Keyword::Null,
            "return" => Keyword::Return,
            "true" => Keyword::True,
            "typeof" => Keyword::Typeof,
            "var" => Keyword::Var,
            "while" => Keyword::While,
            "with" => Keyword::With,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Break => "break",
            Keyword::Const => "const",
            Keyword::Continue => "continue",
            Keyword::Else => "else",
            Keyword::False => "false",
            Keyword::For => "for",
            Keyword::Function => "function",
            Keyword::If => "if",
            Keyword::In => "in",
            Keyword::Let => "let",
            Keyword::Null => "null",
            Keyword::Return => "return",
            Keyword::True => "true",
            Keyword::Typeof => "typeof",
            Keyword::Var => "var",
            Keyword::While => "while",
            Keyword::With => "with",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Ellipsis,
    Colon,
    Question,
    QuestionQuestion,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Semicolon => ";",
            Punct::Comma => ",",
            Punct::Dot => ".",
            Punct::Ellipsis => "...",
            Punct::Colon => ":",
            Punct::Question => "?",
            Punct::QuestionQuestion => "??",
            Punct::Assign => "=",
            Punct::PlusAssign => "+=",
            Punct::MinusAssign => "-=",
            Punct::StarAssign => "*=",
            Punct::SlashAssign => "/=",
            Punct::PercentAssign => "%=",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::PlusPlus => "++",
            Punct::MinusMinus => "--",
            Punct::Bang => "!",
            Punct::Eq => "==",
            Punct::NotEq => "!=",
            Punct::StrictEq => "===",
            Punct::StrictNotEq => "!==",
            Punct::Lt => "<",
            Punct::LtEq => "<=",
            Punct::Gt => ">",
            Punct::GtEq => ">=",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
        }
    }
}

/// Punctuators, longest first so that maximal munch falls out of a linear scan.
const PUNCTUATORS: &[Punct] = &[
    Punct::Ellipsis,
    Punct::StrictEq,
    Punct::StrictNotEq,
    Punct::QuestionQuestion,
    Punct::PlusAssign,
    Punct::MinusAssign,
    Punct::StarAssign,
    Punct::SlashAssign,
    Punct::PercentAssign,
    Punct::PlusPlus,
    Punct::MinusMinus,
    Punct::Eq,
    Punct::NotEq,
    Punct::LtEq,
    Punct::GtEq,
    Punct::AndAnd,
    Punct::OrOr,
    Punct::LParen,
    Punct::RParen,
    Punct::LBrace,
    Punct::RBrace,
    Punct::LBracket,
    Punct::RBracket,
    Punct::Semicolon,
    Punct::Comma,
    Punct::Dot,
    Punct::Colon,
    Punct::Question,
    Punct::Assign,
    Punct::Plus,
    Punct::Minus,
    Punct::Star,
    Punct::Slash,
    Punct::Percent,
    Punct::Bang,
    Punct::Lt,
    Punct::Gt,
];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Keyword(Keyword),
    Number(f64),
    String(String),
    Punct(Punct),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier `{name}`"),
            Token::Keyword(keyword) => write!(f, "`{}`", keyword.as_str()),
            Token::Number(_) => f.write_str("number"),
            Token::String(_) => f.write_str("string"),
            Token::Punct(punct) => write!(f, "`{}`", punct.as_str()),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// Byte offset of the first character of the token.
    pub offset: usize,
    /// Whether a line terminator separates this token from the previous one.
    pub newline_before: bool,
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_ident_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_alphanumeric()
}

/// Split program text into tokens. The last token is always [`Token::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    Lexer {
        source,
        pos: 0,
        newline_before: false,
    }
    .run()
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    newline_before: bool,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let offset = self.pos;
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    offset,
                    newline_before: true,
                });
                return Ok(tokens);
            };

            let token = if is_ident_start(c) {
                let ident = self.take_while(is_ident_continue);
                match Keyword::from_ident(ident) {
                    Some(keyword) => Token::Keyword(keyword),
                    None => Token::Ident(ident.to_string()),
                }
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek_nth(1).is_some_and(|n| n.is_ascii_digit()))
            {
                Token::Number(self.number()?)
            } else if c == '\'' || c == '"' {
                Token::String(self.string(c)?)
            } else {
                Token::Punct(self.punct()?)
            };

            tokens.push(Spanned {
                token,
                offset,
                newline_before: std::mem::take(&mut self.newline_before),
            });
        }
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset,
            program: self.source.to_string(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.source[start..self.pos]
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(c) if is_line_terminator(c) => {
                    self.newline_before = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                Some('/') if self.rest().starts_with("//") => {
                    self.take_while(|c| !is_line_terminator(c));
                }
                Some('/') if self.rest().starts_with("/*") => {
                    let start = self.pos;
                    let Some(close) = self.rest()[2..].find("*/") else {
                        return Err(self.error("unterminated comment", start));
                    };
                    let comment = &self.rest()[2..2 + close];
                    if comment.contains(is_line_terminator) {
                        self.newline_before = true;
                    }
                    self.pos += close + 4;
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<f64, SyntaxError> {
        let start = self.pos;
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.pos += 2;
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            let value = u64::from_str_radix(digits, 16)
                .map_err(|_| self.error("invalid hexadecimal literal", start))?;
            return self.end_of_number(start, value as f64);
        }

        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_start = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if self.take_while(|c| c.is_ascii_digit()).is_empty() {
                return Err(self.error("missing exponent in number literal", exponent_start));
            }
        }
        let text = &self.source[start..self.pos];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number literal `{text}`"), start))?;
        self.end_of_number(start, value)
    }

    /// An identifier may not start directly after a numeric literal.
    fn end_of_number(&self, start: usize, value: f64) -> Result<f64, SyntaxError> {
        match self.peek() {
            Some(c) if is_ident_start(c) || c.is_ascii_digit() => {
                Err(self.error("identifier starts immediately after number", start))
            }
            _ => Ok(value),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal", start));
            };
            match c {
                c if c == quote => return Ok(out),
                '\n' | '\r' => return Err(self.error("unterminated string literal", start)),
                '\\' => self.escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SyntaxError> {
        let start = self.pos - 1;
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated string literal", start));
        };
        match c {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|n| n.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.hex_digits(2, start)?;
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            'u' => {
                let code = self.unicode_escape(start)?;
                out.push(self.surrogate_pair(code, start)?);
            }
            '\r' => {
                // Line continuation; `\r\n` counts as one terminator.
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            c if c.is_ascii_digit() => {
                return Err(self.error("octal escape sequences are not allowed", start));
            }
            c => out.push(c),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize, start: usize) -> Result<u32, SyntaxError> {
        let digits = self.rest().get(..count).unwrap_or("");
        if digits.len() != count || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(self.error("invalid escape sequence", start));
        }
        self.pos += count;
        u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid escape sequence", start))
    }

    /// The code unit (or code point) after `\u`.
    fn unicode_escape(&mut self, start: usize) -> Result<u32, SyntaxError> {
        if self.peek() != Some('{') {
            return self.hex_digits(4, start);
        }
        self.bump();
        let digits = self.take_while(|c| c.is_ascii_hexdigit()).to_string();
        if self.bump() != Some('}') || digits.is_empty() {
            return Err(self.error("invalid Unicode escape sequence", start));
        }
        match u32::from_str_radix(&digits, 16) {
            Ok(code) if code <= 0x10FFFF => Ok(code),
            _ => Err(self.error("Unicode escape out of range", start)),
        }
    }

    /// Combine a high surrogate with a following `\uDC00`-style low
    /// surrogate. Unpaired surrogates become U+FFFD.
    fn surrogate_pair(&mut self, code: u32, start: usize) -> Result<char, SyntaxError> {
        if (0xD800..0xDC00).contains(&code) && self.rest().starts_with("\\u") {
            let checkpoint = self.pos;
            self.pos += 2;
            let low = self.unicode_escape(start)?;
            if (0xDC00..0xE000).contains(&low) {
                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                return Ok(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            self.pos = checkpoint;
        }
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn punct(&mut self) -> Result<Punct, SyntaxError> {
        let rest = self.rest();
        match PUNCTUATORS.iter().find(|p| rest.starts_with(p.as_str())) {
            Some(punct) => {
                self.pos += punct.as_str().len();
                Ok(*punct)
            }
            None => {
                let c = rest.chars().next().unwrap_or(' ');
                Err(self.error(format!("unexpected character `{c}`"), self.pos))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn test_identifiers_and_keywords() {
        assert_eq!(
            tokens("var $x = _y"),
            vec![
                Token::Keyword(Keyword::Var),
                Token::Ident("$x".to_string()),
                Token::Punct(Punct::Assign),
                Token::Ident("_y".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("1 2.5 .5 1e3 0xff"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Number(255.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_member_access_on_number_literal_fraction() {
        assert_eq!(
            tokens("1.5.toFixed"),
            vec![
                Token::Number(1.5),
                Token::Punct(Punct::Dot),
                Token::Ident("toFixed".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#"'it\'s\n' "\x41B\u{43}\\""#),
            vec![
                Token::String("it's\n".to_string()),
                Token::String("ABC\\".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_surrogate_pair_escape() {
        assert_eq!(
            tokens(r"'\uD83D\uDE00'"),
            vec![Token::String("\u{1F600}".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_line_continuation() {
        assert_eq!(
            tokens("'a\\\nb'"),
            vec![Token::String("ab".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_raw_newline_in_string_is_error() {
        let err = tokenize("'a\nb'").unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            tokens("a!==b??c++"),
            vec![
                Token::Ident("a".to_string()),
                Token::Punct(Punct::StrictNotEq),
                Token::Ident("b".to_string()),
                Token::Punct(Punct::QuestionQuestion),
                Token::Ident("c".to_string()),
                Token::Punct(Punct::PlusPlus),
                Token::Eof,
            ]
        );
        assert_eq!(
            tokens("(...a.b)"),
            vec![
                Token::Punct(Punct::LParen),
                Token::Punct(Punct::Ellipsis),
                Token::Ident("a".to_string()),
                Token::Punct(Punct::Dot),
                Token::Ident("b".to_string()),
                Token::Punct(Punct::RParen),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_newline_tracking_and_comments() {
        let spanned = tokenize("a // note\nb /* x\n */ c /* y */ d").unwrap();
        let flags: Vec<bool> = spanned.iter().map(|s| s.newline_before).collect();
        assert_eq!(flags, vec![false, true, true, false, true]);
        assert_eq!(spanned[1].offset, 10);
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("a /* b").unwrap_err();
        assert_eq!(err.message, "unterminated comment");
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.message, "unexpected character `#`");
        assert_eq!(err.offset, 2);
    }
}
