//! Lute language lexer.
//!
//! Raw tokenization is built on the [`logos`] crate for compile-time DFA
//! generation. On top of it sits a streaming cursor that implements the parts
//! of the language a DFA cannot express: significant indentation
//! ([`Token::Indent`] / [`Token::Dedent`] / [`Token::Linefeed`]), line
//! continuation after trailing operators, single-token push-back, and an
//! include stack that splices included files into the token stream.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use logos::Logos;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Source positions ─────────────────────────────────────────────────

/// A source position: which file (index into the lexer's file-name table)
/// and which 1-based line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub fileidx: u32,
    pub line: u32,
}

impl Line {
    #[must_use]
    pub fn new(fileidx: u32, line: u32) -> Self {
        Self { fileidx, line }
    }
}

/// Fatal lexical error, carrying the `file:line` it was detected at.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{file}:{line}: {message}")]
pub struct LexError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

// ── Raw tokens ───────────────────────────────────────────────────────

fn block_comment<'s>(lex: &mut logos::Lexer<'s, RawToken<'s>>) -> logos::FilterResult<(), ()> {
    // Called after the opening `/*`; scan the remainder for the matching
    // close, counting nested openers. `prev` holds the previous character
    // so `/*` and `*/` are matched as pairs; it resets after a match so a
    // sequence like `*/*` cannot count one character twice.
    let rest = lex.remainder();
    let mut open: u32 = 1;
    let mut prev = '\0';
    for (at, c) in rest.char_indices() {
        match (prev, c) {
            ('/', '*') => {
                open += 1;
                prev = '\0';
            }
            ('*', '/') => {
                open -= 1;
                if open == 0 {
                    lex.bump(at + c.len_utf8());
                    return logos::FilterResult::Skip;
                }
                prev = '\0';
            }
            _ => prev = c,
        }
    }
    // Unterminated comment: consume what is left rather than rescanning it.
    lex.bump(rest.len());
    logos::FilterResult::Error(())
}

/// A raw token straight out of the DFA. Whitespace, comments, and newlines
/// are skipped; the layout layer reconstructs line structure from spans.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken<'src> {
    // ── Keywords ──────────────────────────────────────────────────────
    #[token("fun")]
    Fun,
    #[token("struct")]
    Struct,
    #[token("class")]
    Class,
    #[token("enum")]
    Enum,
    #[token("enum_flags")]
    EnumFlags,
    #[token("var")]
    Var,
    #[token("const")]
    Const,
    #[token("namespace")]
    Namespace,
    #[token("private")]
    Private,
    #[token("include")]
    Include,
    #[token("return")]
    Return,
    #[token("from")]
    From,
    #[token("program")]
    Program,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("is")]
    Is,
    #[token("typeof")]
    TypeOf,
    #[token("nil")]
    Nil,
    #[token("coroutine")]
    Coroutine,
    #[token("pakfile")]
    Pakfile,
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("void")]
    VoidType,
    #[token("any")]
    AnyType,
    #[token("int")]
    IntType,
    #[token("float")]
    FloatType,
    #[token("string")]
    StrType,
    #[token("resource")]
    ResourceType,

    // ── Multi-char operators (must precede single-char) ───────────────
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<<=")]
    AslEq,
    #[token(">>=")]
    AsrEq,
    #[token("<<")]
    Asl,
    #[token(">>")]
    Asr,
    #[token("=>")]
    Lambda,
    #[token("->")]
    CoDot,
    #[token("::")]
    TypeIn,
    #[token("..")]
    DotDot,
    #[token("++")]
    Incr,
    #[token("--")]
    Decr,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    MultEq,
    #[token("/=")]
    DivEq,
    #[token("%=")]
    ModEq,
    #[token("&=")]
    AndEq,
    #[token("|=")]
    OrEq,
    #[token("^=")]
    XorEq,
    #[token("?=")]
    LogAssign,

    // ── Single-char operators ─────────────────────────────────────────
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Mult,
    #[token("/")]
    Div,
    #[token("%")]
    Mod,
    #[token("=")]
    Assign,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&")]
    BitAnd,
    #[token("|")]
    BitOr,
    #[token("^")]
    Xor,
    #[token("~")]
    Neg,
    #[token("?")]
    Question,

    // ── Delimiters ────────────────────────────────────────────────────
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token("{")]
    LeftCurly,
    #[token("}")]
    RightCurly,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,

    // ── Literals ──────────────────────────────────────────────────────
    /// Floating-point literal with optional scientific notation.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice(), priority = 4)]
    Float(&'src str),

    /// Integer literal (decimal or hex).
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| lex.slice(), priority = 4)]
    #[regex(r"[0-9]+", |lex| lex.slice(), priority = 3)]
    Int(&'src str),

    /// String literal with escape sequences.
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice())]
    Str(&'src str),

    /// Identifier. Keywords take priority via `#[token]`.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    // ── Comments ──────────────────────────────────────────────────────
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*", block_comment)]
    BlockComment,
}

// ── Parser-facing token kinds ────────────────────────────────────────

/// A token kind as seen by the parser. The lexeme itself travels in the
/// cursor state ([`Lexer::attr`]), so this enum stays `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    // Keywords
    Fun,
    Struct,
    Class,
    Enum,
    EnumFlags,
    Var,
    Const,
    Namespace,
    Private,
    Include,
    Return,
    From,
    Program,
    If,
    Elif,
    Else,
    While,
    For,
    Switch,
    Case,
    Default,
    Is,
    TypeOf,
    Nil,
    Coroutine,
    Pakfile,
    Not,
    And,
    Or,
    VoidType,
    AnyType,
    IntType,
    FloatType,
    StrType,
    ResourceType,
    // Operators
    Eq,
    NotEq,
    LtEq,
    GtEq,
    AslEq,
    AsrEq,
    Asl,
    Asr,
    Lambda,
    CoDot,
    TypeIn,
    DotDot,
    Incr,
    Decr,
    PlusEq,
    MinusEq,
    MultEq,
    DivEq,
    ModEq,
    AndEq,
    OrEq,
    XorEq,
    LogAssign,
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    Assign,
    Lt,
    Gt,
    BitAnd,
    BitOr,
    Xor,
    Neg,
    Question,
    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftCurly,
    RightCurly,
    Comma,
    Dot,
    Colon,
    Semicolon,
    // Literals and identifiers
    Int,
    Float,
    Str,
    Ident,
    // Layout
    Indent,
    Dedent,
    Linefeed,
    EndOfFile,
    EndOfInclude,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Fun => "`fun`",
            Token::Struct => "`struct`",
            Token::Class => "`class`",
            Token::Enum => "`enum`",
            Token::EnumFlags => "`enum_flags`",
            Token::Var => "`var`",
            Token::Const => "`const`",
            Token::Namespace => "`namespace`",
            Token::Private => "`private`",
            Token::Include => "`include`",
            Token::Return => "`return`",
            Token::From => "`from`",
            Token::Program => "`program`",
            Token::If => "`if`",
            Token::Elif => "`elif`",
            Token::Else => "`else`",
            Token::While => "`while`",
            Token::For => "`for`",
            Token::Switch => "`switch`",
            Token::Case => "`case`",
            Token::Default => "`default`",
            Token::Is => "`is`",
            Token::TypeOf => "`typeof`",
            Token::Nil => "`nil`",
            Token::Coroutine => "`coroutine`",
            Token::Pakfile => "`pakfile`",
            Token::Not => "`not`",
            Token::And => "`and`",
            Token::Or => "`or`",
            Token::VoidType => "`void`",
            Token::AnyType => "`any`",
            Token::IntType => "`int`",
            Token::FloatType => "`float`",
            Token::StrType => "`string`",
            Token::ResourceType => "`resource`",
            Token::Eq => "`==`",
            Token::NotEq => "`!=`",
            Token::LtEq => "`<=`",
            Token::GtEq => "`>=`",
            Token::AslEq => "`<<=`",
            Token::AsrEq => "`>>=`",
            Token::Asl => "`<<`",
            Token::Asr => "`>>`",
            Token::Lambda => "`=>`",
            Token::CoDot => "`->`",
            Token::TypeIn => "`::`",
            Token::DotDot => "`..`",
            Token::Incr => "`++`",
            Token::Decr => "`--`",
            Token::PlusEq => "`+=`",
            Token::MinusEq => "`-=`",
            Token::MultEq => "`*=`",
            Token::DivEq => "`/=`",
            Token::ModEq => "`%=`",
            Token::AndEq => "`&=`",
            Token::OrEq => "`|=`",
            Token::XorEq => "`^=`",
            Token::LogAssign => "`?=`",
            Token::Plus => "`+`",
            Token::Minus => "`-`",
            Token::Mult => "`*`",
            Token::Div => "`/`",
            Token::Mod => "`%`",
            Token::Assign => "`=`",
            Token::Lt => "`<`",
            Token::Gt => "`>`",
            Token::BitAnd => "`&`",
            Token::BitOr => "`|`",
            Token::Xor => "`^`",
            Token::Neg => "`~`",
            Token::Question => "`?`",
            Token::LeftParen => "`(`",
            Token::RightParen => "`)`",
            Token::LeftBracket => "`[`",
            Token::RightBracket => "`]`",
            Token::LeftCurly => "`{`",
            Token::RightCurly => "`}`",
            Token::Comma => "`,`",
            Token::Dot => "`.`",
            Token::Colon => "`:`",
            Token::Semicolon => "`;`",
            Token::Int => "integer literal",
            Token::Float => "float literal",
            Token::Str => "string literal",
            Token::Ident => "identifier",
            Token::Indent => "indentation",
            Token::Dedent => "de-indentation",
            Token::Linefeed => "linefeed",
            Token::EndOfFile => "end of file",
            Token::EndOfInclude => "end of include",
        };
        f.write_str(s)
    }
}

/// Tokens that cause a following newline to be swallowed, joining the next
/// line onto the current expression.
fn is_continuation(t: Token) -> bool {
    matches!(
        t,
        Token::Plus
            | Token::Minus
            | Token::Mult
            | Token::Div
            | Token::Mod
            | Token::Asl
            | Token::Asr
            | Token::BitAnd
            | Token::BitOr
            | Token::Xor
            | Token::Lt
            | Token::Gt
            | Token::LtEq
            | Token::GtEq
            | Token::Eq
            | Token::NotEq
            | Token::And
            | Token::Or
            | Token::Not
            | Token::Assign
            | Token::PlusEq
            | Token::MinusEq
            | Token::MultEq
            | Token::DivEq
            | Token::ModEq
            | Token::AndEq
            | Token::OrEq
            | Token::XorEq
            | Token::AslEq
            | Token::AsrEq
            | Token::LogAssign
            | Token::Comma
            | Token::Dot
            | Token::CoDot
            | Token::TypeIn
            | Token::Lambda
    )
}

/// Process escape sequences in a string literal body.
fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some('0') => out.push('\0'),
                Some('x') => {
                    let hi = chars.next();
                    let lo = chars.next();
                    if let (Some(h), Some(l)) = (hi, lo) {
                        if let Ok(byte) = u8::from_str_radix(&format!("{h}{l}"), 16) {
                            out.push(byte as char);
                        } else {
                            out.push('\\');
                            out.push('x');
                            out.push(h);
                            out.push(l);
                        }
                    } else {
                        out.push('\\');
                        out.push('x');
                    }
                }
                Some('\\') | None => out.push('\\'),
                Some(other) => {
                    // Unknown escape: preserve as-is.
                    out.push('\\');
                    out.push(other);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ── Pre-lexed token records ──────────────────────────────────────────

#[derive(Debug, Clone)]
struct RawTok {
    kind: Token,
    attr: String,
    line: u32,
    /// Byte column of the token's first character within its line.
    col: u32,
    /// Byte gap between this token and the previous one (or line start).
    ws_before: u32,
    /// True when this token is where a line boundary takes layout effect:
    /// the first token of a line whose prefix is pure indentation. A token
    /// after the tail of a multi-line block comment is not a boundary.
    boundary: bool,
}

/// Scan one file into a flat token list, with line/column bookkeeping done
/// up front so the layout layer can stream over it.
fn scan_file(source: &str, filename: &str) -> Result<Vec<RawTok>, LexError> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of = |pos: usize| line_starts.partition_point(|&s| s <= pos) as u32; // 1-based
    let mut out = Vec::new();
    let mut prev_end = 0usize;
    let mut prev_line = 0u32;
    let mut lexer = RawToken::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let line = line_of(span.start);
        let line_start = line_starts[line as usize - 1];
        let col = (span.start - line_start) as u32;
        let raw = match result {
            Ok(t) => t,
            Err(()) => {
                let message = if source[span.start..].starts_with('"') {
                    "unterminated string literal".to_string()
                } else {
                    format!("unexpected character: `{}`", &source[span.clone()])
                };
                return Err(LexError {
                    file: filename.to_string(),
                    line,
                    message,
                });
            }
        };
        let prefix = &source[line_start..span.start];
        let boundary = line > prev_line && prefix.chars().all(|c| c == ' ' || c == '\t');
        if boundary {
            // Indentation sanity: reject lines that mix tabs and spaces in
            // the leading whitespace, since column equality would be
            // meaningless.
            if prefix.contains(' ') && prefix.contains('\t') {
                return Err(LexError {
                    file: filename.to_string(),
                    line,
                    message: "mixing of spaces and tabs in indentation".to_string(),
                });
            }
        }
        let ws_before = if line > prev_line {
            col.max(1)
        } else {
            (span.start - prev_end) as u32
        };
        let (kind, attr) = classify(raw);
        out.push(RawTok {
            kind,
            attr,
            line,
            col,
            ws_before: if prev_line == 0 && line == 1 { col } else { ws_before },
            boundary,
        });
        prev_end = span.end;
        prev_line = line;
    }
    Ok(out)
}

fn classify(raw: RawToken<'_>) -> (Token, String) {
    use RawToken as R;
    match raw {
        R::Fun => (Token::Fun, String::new()),
        R::Struct => (Token::Struct, String::new()),
        R::Class => (Token::Class, String::new()),
        R::Enum => (Token::Enum, String::new()),
        R::EnumFlags => (Token::EnumFlags, String::new()),
        R::Var => (Token::Var, String::new()),
        R::Const => (Token::Const, String::new()),
        R::Namespace => (Token::Namespace, String::new()),
        R::Private => (Token::Private, String::new()),
        R::Include => (Token::Include, String::new()),
        R::Return => (Token::Return, String::new()),
        R::From => (Token::From, String::new()),
        R::Program => (Token::Program, String::new()),
        R::If => (Token::If, String::new()),
        R::Elif => (Token::Elif, String::new()),
        R::Else => (Token::Else, String::new()),
        R::While => (Token::While, String::new()),
        R::For => (Token::For, String::new()),
        R::Switch => (Token::Switch, String::new()),
        R::Case => (Token::Case, String::new()),
        R::Default => (Token::Default, String::new()),
        R::Is => (Token::Is, String::new()),
        R::TypeOf => (Token::TypeOf, String::new()),
        R::Nil => (Token::Nil, String::new()),
        R::Coroutine => (Token::Coroutine, String::new()),
        R::Pakfile => (Token::Pakfile, String::new()),
        R::Not => (Token::Not, String::new()),
        R::And => (Token::And, String::new()),
        R::Or => (Token::Or, String::new()),
        R::VoidType => (Token::VoidType, String::new()),
        R::AnyType => (Token::AnyType, "any".to_string()),
        R::IntType => (Token::IntType, "int".to_string()),
        R::FloatType => (Token::FloatType, "float".to_string()),
        R::StrType => (Token::StrType, "string".to_string()),
        R::ResourceType => (Token::ResourceType, String::new()),
        R::Eq => (Token::Eq, String::new()),
        R::NotEq => (Token::NotEq, String::new()),
        R::LtEq => (Token::LtEq, String::new()),
        R::GtEq => (Token::GtEq, String::new()),
        R::AslEq => (Token::AslEq, String::new()),
        R::AsrEq => (Token::AsrEq, String::new()),
        R::Asl => (Token::Asl, String::new()),
        R::Asr => (Token::Asr, String::new()),
        R::Lambda => (Token::Lambda, String::new()),
        R::CoDot => (Token::CoDot, String::new()),
        R::TypeIn => (Token::TypeIn, String::new()),
        R::DotDot => (Token::DotDot, String::new()),
        R::Incr => (Token::Incr, String::new()),
        R::Decr => (Token::Decr, String::new()),
        R::PlusEq => (Token::PlusEq, String::new()),
        R::MinusEq => (Token::MinusEq, String::new()),
        R::MultEq => (Token::MultEq, String::new()),
        R::DivEq => (Token::DivEq, String::new()),
        R::ModEq => (Token::ModEq, String::new()),
        R::AndEq => (Token::AndEq, String::new()),
        R::OrEq => (Token::OrEq, String::new()),
        R::XorEq => (Token::XorEq, String::new()),
        R::LogAssign => (Token::LogAssign, String::new()),
        R::Plus => (Token::Plus, String::new()),
        R::Minus => (Token::Minus, String::new()),
        R::Mult => (Token::Mult, String::new()),
        R::Div => (Token::Div, String::new()),
        R::Mod => (Token::Mod, String::new()),
        R::Assign => (Token::Assign, String::new()),
        R::Lt => (Token::Lt, String::new()),
        R::Gt => (Token::Gt, String::new()),
        R::BitAnd => (Token::BitAnd, String::new()),
        R::BitOr => (Token::BitOr, String::new()),
        R::Xor => (Token::Xor, String::new()),
        R::Neg => (Token::Neg, String::new()),
        R::Question => (Token::Question, String::new()),
        R::LeftParen => (Token::LeftParen, String::new()),
        R::RightParen => (Token::RightParen, String::new()),
        R::LeftBracket => (Token::LeftBracket, String::new()),
        R::RightBracket => (Token::RightBracket, String::new()),
        R::LeftCurly => (Token::LeftCurly, String::new()),
        R::RightCurly => (Token::RightCurly, String::new()),
        R::Comma => (Token::Comma, String::new()),
        R::Dot => (Token::Dot, String::new()),
        R::Colon => (Token::Colon, String::new()),
        R::Semicolon => (Token::Semicolon, String::new()),
        R::Float(s) => (Token::Float, s.to_string()),
        R::Int(s) => (Token::Int, s.to_string()),
        R::Str(s) => (Token::Str, unescape_string(&s[1..s.len() - 1])),
        R::Ident(s) => (Token::Ident, s.to_string()),
        R::LineComment | R::BlockComment => unreachable!("skipped by callbacks"),
    }
}

// ── The streaming cursor ─────────────────────────────────────────────

#[derive(Debug)]
struct FileState {
    toks: Vec<RawTok>,
    pos: usize,
    /// Open indentation columns; base level 0 is implicit.
    indents: Vec<u32>,
    /// Layout tokens queued for delivery (dedent runs, end-of-file unwind).
    /// Per file: an include must not see the parent's pending layout.
    layout_queue: Vec<Token>,
    fileidx: u32,
    /// False until the first raw token has been delivered.
    started: bool,
    /// Index of the token whose line boundary has already been handled, so
    /// the layout decision is made once per boundary.
    boundary_handled: usize,
    /// The parent file's in-flight token, restored by `pop_include_continue`.
    stashed: Option<Stash>,
}

#[derive(Debug)]
struct Stash {
    token: Token,
    attr: String,
    line: Line,
    ws_before: u32,
}

/// The token cursor the parser drives.
///
/// Exposes the current token as plain fields (`token`, `attr`,
/// `whitespace_before`) the way a hand-rolled scanner would, with `next()`
/// advancing through the layout algorithm described in the crate docs.
#[derive(Debug)]
pub struct Lexer {
    files: Vec<FileState>,
    pushed: Vec<(Token, String)>,
    bracket_depth: u32,
    cont: bool,
    finished: bool,

    pub token: Token,
    pub attr: String,
    pub whitespace_before: u32,
    line: Line,

    pub filenames: Vec<String>,
    preloaded: HashMap<String, String>,
    search_dirs: Vec<String>,
    included: HashSet<String>,
}

impl Lexer {
    /// Create a cursor over `source` and position it on the first token.
    pub fn new(filename: &str, source: &str) -> Result<Self, LexError> {
        let toks = scan_file(source, filename)?;
        let mut search_dirs = Vec::new();
        if let Some(parent) = Path::new(filename).parent() {
            let p = parent.to_string_lossy();
            if !p.is_empty() {
                search_dirs.push(p.into_owned());
            }
        }
        let mut lex = Self {
            files: vec![FileState {
                toks,
                pos: 0,
                indents: Vec::new(),
                layout_queue: Vec::new(),
                fileidx: 0,
                started: false,
                boundary_handled: usize::MAX,
                stashed: None,
            }],
            pushed: Vec::new(),
            bracket_depth: 0,
            cont: false,
            finished: false,
            token: Token::EndOfFile,
            attr: String::new(),
            whitespace_before: 0,
            line: Line::new(0, 1),
            filenames: vec![filename.to_string()],
            preloaded: HashMap::new(),
            search_dirs,
            included: HashSet::new(),
        };
        lex.next()?;
        Ok(lex)
    }

    /// Register an in-memory source, consulted by `include` before disk.
    pub fn preload(&mut self, name: &str, source: &str) {
        self.preloaded.insert(name.to_string(), source.to_string());
    }

    /// Add a directory to the include search path.
    pub fn add_search_dir(&mut self, dir: &str) {
        self.search_dirs.push(dir.to_string());
    }

    /// Source position of the current token.
    #[must_use]
    pub fn line(&self) -> Line {
        self.line
    }

    /// Index of the file the cursor is currently reading.
    #[must_use]
    pub fn fileidx(&self) -> u32 {
        self.files.last().map_or(0, |f| f.fileidx)
    }

    /// Name of the file a `Line` points into.
    #[must_use]
    pub fn filename(&self, line: Line) -> &str {
        &self.filenames[line.fileidx as usize]
    }

    pub fn error(&self, message: impl Into<String>) -> LexError {
        self.error_at(self.line, message)
    }

    pub fn error_at(&self, line: Line, message: impl Into<String>) -> LexError {
        LexError {
            file: self.filenames[line.fileidx as usize].clone(),
            line: line.line,
            message: message.into(),
        }
    }

    /// Integer payload of the current `Int` token.
    pub fn int_val(&self) -> Result<i64, LexError> {
        let s = &self.attr;
        let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else {
            s.parse::<i64>()
        };
        parsed.map_err(|_| self.error(format!("integer literal out of range: {s}")))
    }

    /// Float payload of the current `Float` token.
    pub fn float_val(&self) -> Result<f64, LexError> {
        self.attr
            .parse::<f64>()
            .map_err(|_| self.error(format!("malformed float literal: {}", self.attr)))
    }

    /// String payload of the current `Str` token (escapes already resolved).
    #[must_use]
    pub fn string_val(&self) -> String {
        self.attr.clone()
    }

    /// Push the current token onto the push-back stack.
    pub fn push_cur(&mut self) {
        self.pushed.push((self.token, std::mem::take(&mut self.attr)));
    }

    /// Push a synthetic token onto the push-back stack.
    pub fn push(&mut self, kind: Token) {
        self.pushed.push((kind, String::new()));
    }

    /// Un-consume: stash the current token and make `(kind, attr)` current.
    pub fn undo(&mut self, kind: Token, attr: &str) {
        self.push_cur();
        self.token = kind;
        self.attr = attr.to_string();
    }

    /// Suppress (or force) the continuation behavior of the current token.
    /// Called right after a `>` that closed a specializer list, so a
    /// following newline terminates the statement instead of joining lines.
    pub fn override_cont(&mut self, cont: bool) {
        self.cont = cont;
    }

    /// Advance to the next token.
    pub fn next(&mut self) -> Result<(), LexError> {
        if let Some((kind, attr)) = self.pushed.pop() {
            self.token = kind;
            self.attr = attr;
            return Ok(());
        }
        {
            let file = self.files.last_mut().expect("file stack never empty");
            if let Some(kind) = file.layout_queue.pop() {
                self.token = kind;
                self.attr.clear();
                return Ok(());
            }
            if file.pos >= file.toks.len() {
                // Physical end of the current file.
                let nested = file.stashed.is_some();
                let levels = file.indents.len();
                file.indents.clear();
                // Queued back-to-front (the queue is a LIFO).
                if nested {
                    // (Linefeed, Dedent) per level, then EndOfInclude: the
                    // statement separator is left to the parent file so the
                    // splice is seamless.
                    file.layout_queue.push(Token::EndOfInclude);
                    for _ in 0..levels {
                        file.layout_queue.push(Token::Dedent);
                        file.layout_queue.push(Token::Linefeed);
                    }
                } else if self.finished {
                    self.token = Token::EndOfFile;
                    self.attr.clear();
                    return Ok(());
                } else {
                    self.finished = true;
                    file.layout_queue.push(Token::EndOfFile);
                    for _ in 0..levels {
                        file.layout_queue.push(Token::Linefeed);
                        file.layout_queue.push(Token::Dedent);
                    }
                    file.layout_queue.push(Token::Linefeed);
                }
                let kind = file.layout_queue.pop().expect("just queued");
                self.token = kind;
                self.attr.clear();
                return Ok(());
            }
            let idx = file.pos;
            let raw_line = file.toks[idx].line;
            let raw_col = file.toks[idx].col;
            let fileidx = file.fileidx;
            if file.toks[idx].boundary
                && file.started
                && self.bracket_depth == 0
                && file.boundary_handled != idx
            {
                file.boundary_handled = idx;
                // A trailing operator joins the lines; otherwise the layout
                // decision happens here, once per boundary.
                if !self.cont {
                    let top = file.indents.last().copied().unwrap_or(0);
                    if raw_col > top {
                        file.indents.push(raw_col);
                        self.token = Token::Indent;
                        self.attr.clear();
                        self.line = Line::new(fileidx, raw_line);
                        return Ok(());
                    }
                    if raw_col == top {
                        self.token = Token::Linefeed;
                        self.attr.clear();
                        self.line = Line::new(fileidx, raw_line);
                        return Ok(());
                    }
                    // Dedent to a shallower level, which must exist.
                    let mut levels = 0;
                    while file.indents.last().copied().unwrap_or(0) > raw_col {
                        file.indents.pop();
                        levels += 1;
                    }
                    if file.indents.last().copied().unwrap_or(0) != raw_col {
                        return Err(LexError {
                            file: self.filenames[fileidx as usize].clone(),
                            line: raw_line,
                            message: "inconsistent indentation".to_string(),
                        });
                    }
                    for _ in 0..levels {
                        file.layout_queue.push(Token::Linefeed);
                        file.layout_queue.push(Token::Dedent);
                    }
                    self.token = Token::Linefeed;
                    self.attr.clear();
                    self.line = Line::new(fileidx, raw_line);
                    return Ok(());
                }
            }
            let raw = file.toks[idx].clone();
            file.pos += 1;
            file.started = true;
            match raw.kind {
                Token::LeftParen | Token::LeftBracket | Token::LeftCurly => {
                    self.bracket_depth += 1;
                }
                Token::RightParen | Token::RightBracket | Token::RightCurly => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                }
                _ => {}
            }
            self.cont = is_continuation(raw.kind);
            self.token = raw.kind;
            self.attr = raw.attr;
            self.whitespace_before = raw.ws_before;
            self.line = Line::new(fileidx, raw.line);
            return Ok(());
        }
    }

    /// Splice `path` into the token stream. The current (already read)
    /// token is stashed and re-delivered after the include finishes.
    /// Including a path twice is a no-op.
    pub fn include(&mut self, path: &str) -> Result<(), LexError> {
        if self.included.contains(path) {
            return Ok(());
        }
        self.included.insert(path.to_string());
        let source = self.load(path)?;
        let toks = scan_file(&source, path)?;
        let fileidx = self.filenames.len() as u32;
        self.filenames.push(path.to_string());
        let stashed = Some(Stash {
            token: self.token,
            attr: std::mem::take(&mut self.attr),
            line: self.line,
            ws_before: self.whitespace_before,
        });
        self.files.push(FileState {
            toks,
            pos: 0,
            indents: Vec::new(),
            layout_queue: Vec::new(),
            fileidx,
            started: false,
            boundary_handled: usize::MAX,
            stashed,
        });
        self.cont = false;
        self.next()
    }

    /// Pop the include stack and resume the parent file where it left off.
    pub fn pop_include_continue(&mut self) {
        let file = self.files.pop().expect("pop_include_continue without include");
        let stash = file.stashed.expect("outermost file popped");
        self.token = stash.token;
        self.attr = stash.attr;
        self.line = stash.line;
        self.whitespace_before = stash.ws_before;
        self.cont = false;
    }

    fn load(&self, path: &str) -> Result<String, LexError> {
        if let Some(src) = self.preloaded.get(path) {
            return Ok(src.clone());
        }
        for dir in &self.search_dirs {
            let candidate = Path::new(dir).join(path);
            if let Ok(src) = fs::read_to_string(&candidate) {
                return Ok(src);
            }
        }
        fs::read_to_string(path).map_err(|_| self.error(format!("could not load include: {path}")))
    }
}
