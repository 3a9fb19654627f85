//! Filter expressions and SELECT clause assembly.

pub mod clause;
pub mod compile;
pub mod filter;

pub use compile::{CompiledClause, compile};
pub use filter::{Condition, Filter, IsLiteral, Operator, Predicate};
