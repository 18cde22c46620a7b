//! Expression evaluation using CEL (Common Expression Language).

mod cel;

pub use self::cel::{CelContext, CelProgram, compile_cel, evaluate_cel_predicate};
