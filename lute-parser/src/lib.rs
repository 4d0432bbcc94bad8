//! Lute language parser — recursive descent with precedence climbing.
//!
//! The pipeline: `lute-lexer` turns source text into a layout-aware token
//! cursor; [`parser`] consumes it, binding names against a [`SymbolTable`]
//! and producing an AST rooted at an implicit top-level function. Typing and
//! code generation belong to downstream phases.

pub mod ast;
pub mod dump;
pub mod natives;
pub mod parser;
pub mod symbols;
pub mod typeref;

pub use lute_lexer::{LexError, Lexer, Line, Token};
pub use natives::NativeRegistry;
pub use parser::{ParseError, ParseOutput, Parser, Warning};
pub use symbols::SymbolTable;

/// Parse `source` with the standard native registry.
pub fn parse(
    source: &str,
    filename: &str,
    st: &mut SymbolTable,
) -> Result<ParseOutput, ParseError> {
    let natreg = NativeRegistry::core();
    parse_with_natives(source, filename, st, &natreg)
}

/// Parse `source` against a caller-supplied native registry.
pub fn parse_with_natives(
    source: &str,
    filename: &str,
    st: &mut SymbolTable,
    natreg: &NativeRegistry,
) -> Result<ParseOutput, ParseError> {
    let lex = Lexer::new(filename, source)?;
    Parser::new(lex, st, natreg).parse()
}
