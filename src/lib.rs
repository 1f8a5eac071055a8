//! # Terrastack
//!
//! Terrastack manages a hierarchy of infrastructure-as-code directories
//! ("stacks") inside a source repository: it loads a tree of
//! directory-scoped HCL configuration, resolves hierarchical user-defined
//! variables ("globals"), detects which stacks a git revision touched,
//! generates files from declarative blocks, and runs commands across
//! stacks.
//!
//! ## Features
//!
//! - **Configuration tree**: every directory's `.tm`/`.tm.hcl` files are
//!   parsed and merged into a root-anchored tree; imports, skip markers
//!   and dot-directories are handled at load time
//! - **Stacks**: validated metadata (ids, tags, ordering hints, watch
//!   lists) with project-wide id uniqueness
//! - **Globals**: lazy, dependency-ordered evaluation with labeled-block
//!   extension, descendant override, `map` generators, `unset` and cycle
//!   detection
//! - **Change detection**: git-based, with transitive propagation through
//!   local Terraform module references
//! - **Generation**: per-stack file materialization guarded by assertions
//!   and a generated-file header
//!
//! ## Example
//!
//! ```rust,no_run
//! use terrastack::Project;
//!
//! fn main() -> terrastack::Result<()> {
//!     let project = Project::discover(std::path::Path::new("."))?;
//!
//!     for stack in project.stacks()? {
//!         let report = project.globals(&stack);
//!         println!("{}: {:?}", stack.dir, report.globals);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod changes;
pub mod error;
pub mod eval;
pub mod generate;
pub mod globals;
pub mod project;
pub mod runner;
pub mod stack;
pub mod tree;

// Re-export commonly used types at crate root
pub use changes::{ChangeSet, ChangedStack};
pub use error::{ErrorCollector, Origin, Result, TerrastackError};
pub use eval::Evaluator;
pub use globals::EvalReport;
pub use project::{ProjectPath, VersionSpec};
pub use stack::Stack;
pub use tree::{Node, Root};

use std::path::Path;

/// Top-level orchestrator over one loaded project.
///
/// `Project` is the primary entry point for using Terrastack as a
/// library. It owns the loaded configuration tree and exposes the
/// per-stack operations. The tree is read-only after load; operations for
/// different stacks are independent, so drivers may parallelize by
/// partitioning stacks (each operation builds its own evaluation state).
pub struct Project {
    root: Root,
}

impl Project {
    /// Loads the project rooted at `rootdir` (must carry the root marker
    /// configuration).
    ///
    /// # Errors
    ///
    /// Any tree-loading failure; see [`Root::load`].
    pub fn load(rootdir: &Path) -> Result<Self> {
        Ok(Self { root: Root::load(rootdir)? })
    }

    /// Finds the project root by an upward walk from `from`, then loads
    /// it.
    ///
    /// # Errors
    ///
    /// `RootNotFound` when no marker exists on the way up; otherwise as
    /// [`Root::load`].
    pub fn discover(from: &Path) -> Result<Self> {
        Ok(Self { root: Root::discover(from)? })
    }

    /// The loaded configuration tree.
    #[must_use]
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// All validated stacks, in lexicographic directory order.
    ///
    /// # Errors
    ///
    /// Aggregated stack validation errors; valid stacks do not mask
    /// invalid siblings.
    pub fn stacks(&self) -> Result<Vec<Stack>> {
        stack::load_all_stacks(&self.root)
    }

    /// Resolves the globals visible to one stack.
    #[must_use]
    pub fn globals(&self, stack: &Stack) -> EvalReport {
        globals::load(&self.root, stack)
    }

    /// Detects the stacks changed against `base_ref` (or the default base
    /// reference).
    ///
    /// # Errors
    ///
    /// See [`changes::detect`].
    pub fn changed_stacks(&self, base_ref: Option<&str>) -> Result<ChangeSet> {
        let stacks = self.stacks()?;
        changes::detect(&self.root, &stacks, base_ref)
    }

    /// Evaluates and writes every generated file of every stack. Returns
    /// the number of files written.
    ///
    /// # Errors
    ///
    /// Globals or generate-block evaluation failures, aggregated across
    /// stacks; header-guard refusals from the writer.
    pub fn generate(&self) -> Result<usize> {
        let mut files = Vec::new();
        let mut errors = ErrorCollector::new();

        for stack in self.stacks()? {
            match self.globals(&stack).into_result() {
                Ok(globals) => match generate::evaluate(&self.root, &stack, &globals) {
                    Ok(stack_files) => files.extend(stack_files),
                    Err(e) => errors.add(e),
                },
                Err(e) => errors.add(e),
            }
        }
        errors.into_result()?;

        generate::write(&self.root, &files)
    }

    /// Runs a command in every given stack directory, piping output into
    /// the caller's sinks.
    ///
    /// # Errors
    ///
    /// `Run` aggregating the nonzero exits; see [`runner::run_in_stacks`].
    pub fn run(
        &self,
        stacks: &[Stack],
        cmd: &[String],
        sink: &mut runner::RunSink<'_>,
    ) -> Result<runner::RunSummary> {
        runner::run_in_stacks(&self.root, stacks, cmd, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_load_and_discover() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(tree::ROOT_MARKER), "terrastack {\n}\n").unwrap();
        let sub = tmp.path().join("stacks/app");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("stack.tm"), "stack {}\n").unwrap();

        let project = Project::discover(&sub).unwrap();
        let stacks = project.stacks().unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].dir.as_str(), "/stacks/app");
    }
}
