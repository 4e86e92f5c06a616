pub mod source_map;

use std::ops::Range;

use logos::Logos;

pub use source_map::SourceMap;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("let")]
    Let,
    #[token("var")]
    Var,
    #[token("local")]
    Local,
    #[token("loop")]
    Loop,
    #[token("times")]
    Times,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("reverse")]
    Reverse,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("events")]
    Events,
    #[token("on")]
    On,
    #[token("break")]
    Break,
    #[token("return")]
    Return,
    #[token("yield")]
    Yield,
    #[token("exit")]
    Exit,
    #[token("function")]
    Function,
    #[token("sub")]
    Sub,
    #[token("task")]
    Task,
    #[token("type")]
    Type,

    // Punctuation
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("(|")]
    LAbs,
    #[token("|)")]
    RAbs,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("=>")]
    Arrow,
    #[token("@")]
    At,

    // Operators
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("^=")]
    CaretAssign,
    #[token("~=")]
    TildeAssign,
    #[token("++")]
    Increment,
    #[token("--")]
    Decrement,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(&lex.slice()[1..lex.slice().len() - 1]))]
    Str(String),

    #[regex(r"'([^'\\\n]|\\.)'", |lex| char_literal(lex.slice()))]
    Char(u16),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn escape(c: char) -> Option<char> {
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' | '"' | '\'' => c,
        _ => return None,
    })
}

fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(escape(chars.next()?)?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn char_literal(slice: &str) -> Option<u16> {
    let text = unescape(&slice[1..slice.len() - 1])?;
    let mut units = text.encode_utf16();
    let unit = units.next()?;
    units.next().is_none().then_some(unit)
}

/// Lex source code into tokens with byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                let snippet = source[span.clone()].to_string();
                return Err(LexError {
                    line: SourceMap::new(source).line_of(span.start),
                    position: span.start,
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

/// Every lex error carries a suggested fix.
fn suggest_fix(bad: &str) -> String {
    match bad.chars().next() {
        Some('"') => "Close the string with '\"' on the same line, or check its escapes".to_string(),
        Some('\'') => "A character literal holds exactly one character, e.g. 'a' or '\\n'".to_string(),
        Some('&') => "Use '&&' for logical and".to_string(),
        Some('|') => "Use '||' for logical or, or '(| x |)' for an absolute value".to_string(),
        Some('\\') => "Escapes are only valid inside string and character literals".to_string(),
        _ => format!("Unexpected character(s): '{bad}'"),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error on line {line}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub line: usize,
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_declaration() {
        assert_eq!(
            tokens("let x = 1.5;"),
            vec![
                Token::Let,
                Token::Ident("x".into()),
                Token::Assign,
                Token::Number(1.5),
                Token::Semi
            ]
        );
    }

    #[test]
    fn lex_range_is_not_a_decimal() {
        assert_eq!(
            tokens("1..4"),
            vec![Token::Number(1.0), Token::DotDot, Token::Number(4.0)]
        );
    }

    #[test]
    fn lex_string_and_char_escapes() {
        assert_eq!(tokens(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
        assert_eq!(tokens(r"'\t' 'x'"), vec![Token::Char(9), Token::Char(b'x' as u16)]);
    }

    #[test]
    fn lex_compound_operators_and_abs() {
        assert_eq!(
            tokens("x += (| y |); i++; a => b"),
            vec![
                Token::Ident("x".into()),
                Token::PlusAssign,
                Token::LAbs,
                Token::Ident("y".into()),
                Token::RAbs,
                Token::Semi,
                Token::Ident("i".into()),
                Token::Increment,
                Token::Semi,
                Token::Ident("a".into()),
                Token::Arrow,
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn lex_comments_are_skipped() {
        assert_eq!(tokens("// note\n@Main"), vec![Token::At, Token::Ident("Main".into())]);
    }

    #[test]
    fn lex_error_reports_line_and_fix() {
        let err = lex("let a = 1;\nlet b = a & 2;").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.snippet, "&");
        assert!(err.suggestion.contains("&&"));
    }
}
