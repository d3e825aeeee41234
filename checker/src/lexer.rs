// Lexer for the classic (.xta) timed automata syntax.
//
// Tokenizes declarations, templates, instantiations and queries.
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters and overflowing integer literals
//   produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Token types of the classic syntax.
///
/// Keywords and symbols are matched as fixed strings. Integer literals carry
/// parsed values. Identifiers carry no value — use the span to retrieve the
/// text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*|/\*[^*]*\*+([^/*][^*]*\*+)*/")]
pub enum Token {
    // ── Keywords ──
    #[token("const")]
    Const,
    #[token("int")]
    Int,
    #[token("bool")]
    Bool,
    #[token("clock")]
    Clock,
    #[token("chan")]
    Chan,
    #[token("urgent")]
    Urgent,
    #[token("broadcast")]
    Broadcast,
    #[token("struct")]
    Struct,
    #[token("void")]
    Void,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("process")]
    Process,
    #[token("state")]
    State,
    #[token("init")]
    Init,
    #[token("trans")]
    Trans,
    #[token("guard")]
    Guard,
    #[token("sync")]
    Sync,
    #[token("assign")]
    Assign,
    #[token("system")]
    System,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,

    // ── Multi-character operators ──
    //
    // Logos picks the longest match, so `-->` wins over `--` and `->`,
    // and `<<=` wins over `<<`.
    #[token("-->")]
    Leadsto,
    #[token("->")]
    Arrow,
    #[token(":=")]
    ColonEq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("<?")]
    MinOp,
    #[token(">?")]
    MaxOp,

    // ── Single-character symbols ──
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
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
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("?")]
    Question,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
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
    #[token("=")]
    Eq,

    // ── Literals ──
    /// Decimal integer literal.
    #[regex(r"[0-9]+", parse_int)]
    Number(i32),

    /// Identifier. Carries no value — slice the source by span.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

fn parse_int(lex: &mut logos::Lexer<Token>) -> Option<i32> {
    lex.slice().parse().ok()
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Tokenize a source string. Errors are collected, not fatal.
pub fn lex(source: &str) -> LexResult {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in Token::lexer(source).spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(tok) => tokens.push((tok, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unrecognized token '{}'", &source[range]),
            }),
        }
    }

    LexResult { tokens, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(result.errors.is_empty(), "lex errors: {:?}", result.errors);
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("urgent chan a;"),
            vec![Token::Urgent, Token::Chan, Token::Ident, Token::Semi]
        );
    }

    #[test]
    fn leadsto_beats_decrement() {
        assert_eq!(kinds("-->"), vec![Token::Leadsto]);
        assert_eq!(kinds("--"), vec![Token::MinusMinus]);
        assert_eq!(kinds("->"), vec![Token::Arrow]);
    }

    #[test]
    fn compound_assignment_operators() {
        assert_eq!(
            kinds("x <<= 1"),
            vec![Token::Ident, Token::ShlEq, Token::Number(1)]
        );
        assert_eq!(
            kinds("x := y"),
            vec![Token::Ident, Token::ColonEq, Token::Ident]
        );
    }

    #[test]
    fn min_max_operators() {
        assert_eq!(
            kinds("a <? b >? c"),
            vec![
                Token::Ident,
                Token::MinOp,
                Token::Ident,
                Token::MaxOp,
                Token::Ident
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("int /* block\ncomment */ x; // trailing"),
            vec![Token::Int, Token::Ident, Token::Semi]
        );
    }

    #[test]
    fn number_overflow_is_an_error() {
        let result = lex("99999999999");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn unknown_character_is_an_error() {
        let result = lex("int x @ 1;");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains('@'));
    }
}
