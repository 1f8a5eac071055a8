//! The globals engine.
//!
//! Globals are user-defined variables declared in `globals` blocks at any
//! directory, visible to every descendant, extensible through labeled
//! blocks, overridable by closer scopes, and deletable with `unset`. This
//! module resolves all declarations visible from a directory into a single
//! evaluated object under the `global` namespace.
//!
//! ```hcl
//! globals {
//!   env  = "prod"
//!   regions = ["eu-west-1", "us-east-1"]
//! }
//!
//! globals "retention" {
//!   days = 30
//! }
//! ```

pub(crate) mod resolver;
pub mod stmt;

pub use resolver::EvalReport;

use crate::eval::Evaluator;
use crate::project::ProjectPath;
use crate::stack::Stack;
use crate::tree::Root;

/// Resolves the globals visible to `stack`, with the stack's runtime
/// metadata available under the `terrastack` namespace.
#[must_use]
pub fn load(root: &Root, stack: &Stack) -> EvalReport {
    let mut evaluator = Evaluator::new();
    evaluator.set_namespace("terrastack", stack.runtime_values());
    resolver::resolve(root, &stack.dir, &mut evaluator)
}

/// Resolves the globals visible at an arbitrary directory, without a stack
/// evaluation scope (`terrastack.stack` is not available).
#[must_use]
pub fn load_at(root: &Root, dir: &ProjectPath) -> EvalReport {
    let mut evaluator = Evaluator::new();
    resolver::resolve(root, dir, &mut evaluator)
}
