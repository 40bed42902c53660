//! Restricted formula language used by computed fields, validators and
//! `showWhen` conditions.
//!
//! Formulas are author-supplied but treated as untrusted: the source text is
//! checked against a character allow-list and an identifier denylist, then
//! parsed into a small AST. Nothing outside the grammar (assignment, loops,
//! arbitrary calls, prototype access) can be expressed, and only the helper
//! functions in [`HELPERS`] can be called.
//!
//! ```text
//! "(upperBound - lowerBound) / gridCount"
//!     -> lexer (allow-list, denylist) -> parser (AST) -> eval(Environment)
//! ```

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use eval::{evaluate, is_helper, CompiledExpression, Environment, HELPERS};
pub use lexer::DENYLIST;
pub use parser::Expr;
pub use value::Value;
