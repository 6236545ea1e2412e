//! Query language: parsing, planning and evaluation.
//!
//! ```text
//! @task and !completed = true and childof(#project)
//! ```
//!
//! Text is parsed into an [`IndexQuery`] tree, and-chains are reordered by
//! [`planner`], and [`Evaluator`] computes the matching id set against a
//! store snapshot.

mod ast;
mod eval;
mod lexer;
mod parser;
pub mod planner;
pub mod predicate;

pub use ast::{CompareOp, IndexQuery};
pub use eval::Evaluator;
pub use parser::parse;
pub use planner::explain;
pub use predicate::matches_record;
