//! Source text to syntax tree.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::TranslationUnit;
pub use parser::ParseError;

/// Tokenize and parse a whole translation unit.
pub fn parse_text(text: &str) -> Result<TranslationUnit, ParseError> {
    let tokens = lexer::tokenize(text)?;
    parser::parse(tokens)
}
