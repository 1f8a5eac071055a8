//! Change detection.
//!
//! Given a base git reference and the working tree's `HEAD`, computes the
//! set of repository paths that changed (three-dot semantics: the diff is
//! taken from the merge base) and maps them onto stacks:
//!
//! - **directly**, when a changed path lies under the stack directory;
//! - via **watch files**, when a configured watch path changed;
//! - **transitively**, when a local `module { source = "…" }` reference
//!   inside the stack's `*.tf` files (followed recursively) reaches a
//!   directory containing a changed file. Remote module sources never
//!   propagate change.

use crate::error::{Result, TerrastackError};
use crate::project::ProjectPath;
use crate::stack::Stack;
use crate::tree::Root;
use git2::{BranchType, Repository};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use walkdir::WalkDir;

/// The name of the required remote.
const DEFAULT_REMOTE: &str = "origin";
/// The name of the default branch.
const DEFAULT_BRANCH: &str = "main";

/// One changed stack with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedStack {
    /// The stack directory.
    pub stack: ProjectPath,
    /// Why the stack is considered changed.
    pub reason: String,
}

/// The result of change detection.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    /// The base reference the diff was computed against.
    pub base_ref: String,
    /// Every changed repository path, sorted.
    pub paths: Vec<ProjectPath>,
    /// Changed stacks in lexicographic order.
    pub stacks: Vec<ChangedStack>,
}

impl ChangeSet {
    /// Whether a stack directory is in the change set.
    #[must_use]
    pub fn contains(&self, dir: &ProjectPath) -> bool {
        self.stacks.iter().any(|c| &c.stack == dir)
    }
}

/// Detects which of `stacks` changed between `base_ref` (default:
/// `HEAD^1` on the default branch, `origin/main` elsewhere) and `HEAD`.
///
/// # Errors
///
/// `NoDefaultRemoteConfig` when the repository lacks an `origin` remote
/// with a `main` branch, `OutdatedLocalRev` when local `main` diverged
/// from `origin/main`, `Git` for underlying repository failures.
pub fn detect(root: &Root, stacks: &[Stack], base_ref: Option<&str>) -> Result<ChangeSet> {
    let repo = Repository::discover(root.host_root())?;
    check_default_remote(&repo)?;

    let head = repo.head()?;
    let branch = head.shorthand().unwrap_or_default().to_string();
    let base_ref = base_ref.map_or_else(
        || {
            if branch == DEFAULT_BRANCH {
                "HEAD^1".to_string()
            } else {
                format!("{DEFAULT_REMOTE}/{DEFAULT_BRANCH}")
            }
        },
        str::to_string,
    );

    let paths = changed_paths(root, &repo, &base_ref)?;
    tracing::info!(
        base = %base_ref,
        branch = %branch,
        changed = paths.len(),
        "computed changed paths"
    );

    let graph = ModuleGraph::build(root, stacks);
    let mut changed = Vec::new();

    let mut ordered: Vec<&Stack> = stacks.iter().collect();
    ordered.sort_by(|a, b| a.dir.cmp(&b.dir));

    for stack in ordered {
        if let Some(reason) = stack_change_reason(stack, &paths, &graph) {
            tracing::debug!(stack = %stack.dir, reason = %reason, "stack changed");
            changed.push(ChangedStack { stack: stack.dir.clone(), reason });
        }
    }

    Ok(ChangeSet { base_ref, paths: paths.into_iter().collect(), stacks: changed })
}

fn check_default_remote(repo: &Repository) -> Result<()> {
    if repo.find_remote(DEFAULT_REMOTE).is_err() {
        return Err(TerrastackError::NoDefaultRemoteConfig {
            message: format!("repository has no '{DEFAULT_REMOTE}' remote"),
        });
    }
    let origin_main = repo
        .find_reference(&format!("refs/remotes/{DEFAULT_REMOTE}/{DEFAULT_BRANCH}"))
        .map_err(|_| TerrastackError::NoDefaultRemoteConfig {
            message: format!("remote '{DEFAULT_REMOTE}' has no '{DEFAULT_BRANCH}' branch"),
        })?;

    if let Ok(local_main) = repo.find_branch(DEFAULT_BRANCH, BranchType::Local) {
        if local_main.get().target() != origin_main.target() {
            return Err(TerrastackError::OutdatedLocalRev {
                message: format!(
                    "local '{DEFAULT_BRANCH}' is not in sync with '{DEFAULT_REMOTE}/{DEFAULT_BRANCH}'"
                ),
            });
        }
    }
    Ok(())
}

/// The paths changed between the merge base of `base_ref`/`HEAD` and
/// `HEAD`, as project paths.
fn changed_paths(root: &Root, repo: &Repository, base_ref: &str) -> Result<BTreeSet<ProjectPath>> {
    let base_commit = repo.revparse_single(base_ref)?.peel_to_commit()?;
    let head_commit = repo.head()?.peel_to_commit()?;

    let merge_base = repo.merge_base(base_commit.id(), head_commit.id())?;
    let merge_base_tree = repo.find_commit(merge_base)?.tree()?;
    let head_tree = head_commit.tree()?;

    let diff = repo.diff_tree_to_tree(Some(&merge_base_tree), Some(&head_tree), None)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| TerrastackError::Git { message: "repository has no worktree".to_string() })?
        .to_path_buf();

    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        for file in [delta.old_file().path(), delta.new_file().path()] {
            let Some(rel) = file else { continue };
            if let Some(path) = ProjectPath::from_host(root.host_root(), &workdir.join(rel)) {
                paths.insert(path);
            }
        }
    }
    Ok(paths)
}

fn stack_change_reason(
    stack: &Stack,
    paths: &BTreeSet<ProjectPath>,
    graph: &ModuleGraph,
) -> Option<String> {
    for path in paths {
        if path.is_inside(&stack.dir) {
            return Some(format!("changed file {path}"));
        }
    }
    for watch in &stack.watch {
        if paths.contains(watch) {
            return Some(format!("watch file {watch}"));
        }
    }
    for module_dir in graph.reachable_from(&stack.dir) {
        if module_dir != stack.dir && paths.iter().any(|p| p.is_inside(&module_dir)) {
            return Some(format!("module {module_dir} changed"));
        }
    }
    None
}

/// The directed graph of local Terraform module references: an edge
/// `a -> b` means some `*.tf` file under `a` sources a module from `b`.
struct ModuleGraph {
    ids: HashMap<ProjectPath, usize>,
    dirs: Vec<ProjectPath>,
    graph: DiGraphMap<usize, ()>,
}

impl ModuleGraph {
    fn build(root: &Root, stacks: &[Stack]) -> Self {
        let mut this = Self { ids: HashMap::new(), dirs: Vec::new(), graph: DiGraphMap::new() };

        let mut queue: VecDeque<ProjectPath> = stacks.iter().map(|s| s.dir.clone()).collect();
        let mut scanned: BTreeSet<ProjectPath> = BTreeSet::new();

        while let Some(dir) = queue.pop_front() {
            if !scanned.insert(dir.clone()) {
                continue;
            }
            let from = this.id_of(&dir);
            for target in local_module_references(root, &dir) {
                let to = this.id_of(&target);
                this.graph.add_edge(from, to, ());
                queue.push_back(target);
            }
        }
        this
    }

    fn id_of(&mut self, dir: &ProjectPath) -> usize {
        if let Some(id) = self.ids.get(dir) {
            return *id;
        }
        let id = self.dirs.len();
        self.dirs.push(dir.clone());
        self.ids.insert(dir.clone(), id);
        self.graph.add_node(id);
        id
    }

    /// Every directory reachable through module references from `dir`.
    fn reachable_from(&self, dir: &ProjectPath) -> Vec<ProjectPath> {
        let Some(&start) = self.ids.get(dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(id) = dfs.next(&self.graph) {
            out.push(self.dirs[id].clone());
        }
        out
    }
}

/// Scans the `*.tf` files under `dir` for local module sources, resolved
/// against the file's own directory.
fn local_module_references(root: &Root, dir: &ProjectPath) -> Vec<ProjectPath> {
    let host_dir = dir.to_host(root.host_root());
    let mut out = Vec::new();

    for entry in WalkDir::new(&host_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(std::result::Result::ok)
    {
        let path = entry.path();
        let is_tf = path.extension().and_then(|ext| ext.to_str()) == Some("tf");
        if !entry.file_type().is_file() || !is_tf {
            continue;
        }
        let Some(file_dir) =
            path.parent().and_then(|p| ProjectPath::from_host(root.host_root(), p))
        else {
            continue;
        };
        for source in tf_module_sources(path) {
            if !(source.starts_with("./") || source.starts_with("../")) {
                continue;
            }
            if let Some(target) = file_dir.resolve_relative(&source) {
                out.push(target);
            }
        }
    }
    out
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// The `module { source = "…" }` strings of one Terraform file. Files
/// that fail to parse are skipped with a warning; change detection is
/// best-effort over foreign files.
fn tf_module_sources(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let body = match hcl::parse(&content) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "failed to parse terraform file");
            return Vec::new();
        }
    };

    let mut sources = Vec::new();
    for block in body.blocks() {
        if block.identifier.as_str() != "module" {
            continue;
        }
        for attr in block.body.attributes() {
            if attr.key.as_str() == "source" {
                if let hcl::Expression::String(source) = &attr.expr {
                    sources.push(source.clone());
                }
            }
        }
    }
    sources
}
