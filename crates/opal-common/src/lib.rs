// Opal common -- leaf types shared by every stage of the pipeline.

pub mod literal;
pub mod span;
pub mod token;
pub mod value;

pub use span::{LineMap, Span};
pub use token::{keyword_from_str, Token, TokenKind};
pub use value::Value;
