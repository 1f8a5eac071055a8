//! The configuration tree.
//!
//! [`Root::load`] walks a project directory, parses every configuration
//! file under every subdirectory, merges same-typed blocks per directory
//! and assembles a root-anchored tree with one [`Node`] per directory. The
//! tree is the single source of truth after load and is treated as
//! read-only by every consumer.
//!
//! The node map is keyed by [`ProjectPath`]; parent/child links are
//! realized through path arithmetic plus map lookups rather than direct
//! pointers.

pub mod expr;
pub mod file;
mod import;

pub use expr::{Expr, RefPath, UNSET_KEYWORD};
pub use file::{DirConfig, MergedBlock, RawBlock, CONFIG_EXTENSIONS, SKIP_MARKER};

use crate::error::{Result, TerrastackError};
use crate::globals::stmt::{self, LoweredDir};
use crate::project::{check_required_version, ProjectPath};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The canonical file name that marks the project root.
pub const ROOT_MARKER: &str = "terrastack.tm.hcl";

/// One directory of the configuration tree.
#[derive(Debug)]
pub struct Node {
    /// The directory's project path.
    pub dir: ProjectPath,
    /// The directory's merged configuration.
    pub cfg: DirConfig,
    /// Child directory names, sorted.
    pub children: Vec<String>,
}

impl Node {
    /// Whether this directory is a stack.
    #[must_use]
    pub fn is_stack(&self) -> bool {
        self.cfg.stack.is_some()
    }
}

/// The loaded configuration tree, anchored at the project root.
#[derive(Debug)]
pub struct Root {
    host_root: PathBuf,
    nodes: BTreeMap<ProjectPath, Node>,
    experiments: Vec<String>,
    lowered: DashMap<ProjectPath, Arc<LoweredDir>>,
}

impl Root {
    /// Loads the configuration tree rooted at `rootdir`.
    ///
    /// `rootdir` must carry the root marker configuration (a `terrastack`
    /// block). Parse and schema errors anywhere below the root are fatal.
    ///
    /// # Errors
    ///
    /// `Io`, `HclSyntax`, `Schema`, `Import`, or `UnsupportedVersion`.
    pub fn load(rootdir: &Path) -> Result<Self> {
        let host_root = rootdir
            .canonicalize()
            .map_err(|e| TerrastackError::io(rootdir, e))?;

        let mut nodes = BTreeMap::new();
        load_dir(&host_root, &host_root, ProjectPath::root(), &mut nodes)?;

        let root_node = nodes
            .get(&ProjectPath::root())
            .ok_or_else(|| TerrastackError::internal("root node missing after load"))?;
        let experiments = validate_root_config(root_node, &host_root)?;

        tracing::info!(
            root = %host_root.display(),
            directories = nodes.len(),
            "configuration tree loaded"
        );

        Ok(Self { host_root, nodes, experiments, lowered: DashMap::new() })
    }

    /// Finds the project root by walking upward from `from` looking for the
    /// root marker file. Parse errors along the way are ignored; only a
    /// marker that actually declares a `terrastack` block counts.
    ///
    /// # Errors
    ///
    /// `RootNotFound` when the walk reaches the filesystem root without a
    /// match.
    pub fn find_root(from: &Path) -> Result<PathBuf> {
        let start = from.canonicalize().map_err(|e| TerrastackError::io(from, e))?;
        let mut dir = start.as_path();
        loop {
            let marker = dir.join(ROOT_MARKER);
            if marker.is_file() {
                if let Ok(parsed) = file::parse_file(&marker) {
                    if parsed.blocks.iter().any(|b| b.kind == "terrastack") {
                        return Ok(dir.to_path_buf());
                    }
                }
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Err(TerrastackError::RootNotFound { start }),
            }
        }
    }

    /// Finds the project root upward from `from` and loads it.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Root::find_root`] and [`Root::load`].
    pub fn discover(from: &Path) -> Result<Self> {
        let rootdir = Self::find_root(from)?;
        Self::load(&rootdir)
    }

    /// The host directory the tree was loaded from.
    #[must_use]
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Experiments enabled by the root `config` block.
    #[must_use]
    pub fn experiments(&self) -> &[String] {
        &self.experiments
    }

    /// The node at an exact project path.
    #[must_use]
    pub fn lookup(&self, path: &ProjectPath) -> Option<&Node> {
        self.nodes.get(path)
    }

    /// All nodes in lexicographic order of their directories.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All stack nodes in lexicographic order of their directories.
    #[must_use]
    pub fn stacks(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.is_stack()).collect()
    }

    /// The chain of loaded nodes from the root down to `dir` (inclusive).
    /// Paths without a node (inside skipped directories) are omitted.
    #[must_use]
    pub fn node_chain(&self, dir: &ProjectPath) -> Vec<&Node> {
        dir.chain_from_root()
            .iter()
            .filter_map(|p| self.nodes.get(p))
            .collect()
    }

    /// The lowered globals statements of one directory, memoized per tree.
    ///
    /// The cache is append-only: concurrent readers over the same loaded
    /// tree are safe, and repeated resolutions of different stacks share
    /// the lowering work of common ancestors.
    pub(crate) fn lowered_globals(&self, dir: &ProjectPath) -> Arc<LoweredDir> {
        if let Some(cached) = self.lowered.get(dir) {
            return Arc::clone(&cached);
        }
        let lowered = Arc::new(match self.nodes.get(dir) {
            Some(node) => stmt::lower_dir(dir, &node.cfg),
            None => LoweredDir::default(),
        });
        self.lowered.insert(dir.clone(), Arc::clone(&lowered));
        lowered
    }
}

fn load_dir(
    host_root: &Path,
    host_dir: &Path,
    dir: ProjectPath,
    nodes: &mut BTreeMap<ProjectPath, Node>,
) -> Result<()> {
    // Skip-marked directories become empty leaf nodes: lookups for
    // interior paths simply fail.
    if host_dir.join(SKIP_MARKER).is_file() {
        tracing::debug!(dir = %dir, "skip marker found, not loading directory");
        nodes.insert(dir.clone(), Node { dir, cfg: DirConfig::default(), children: Vec::new() });
        return Ok(());
    }

    let mut entries: Vec<_> = std::fs::read_dir(host_dir)
        .map_err(|e| TerrastackError::io(host_dir, e))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| TerrastackError::io(host_dir, e))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    let mut blocks = Vec::new();
    let mut children = Vec::new();

    for entry in &entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| TerrastackError::io(entry.path(), e))?;
        if file_type.is_file() && file::is_config_file(&name) {
            let parsed = file::parse_file(&entry.path())?;
            blocks.extend(import::resolve(host_root, parsed)?);
        } else if file_type.is_dir() {
            children.push(name);
        }
    }

    let cfg = file::merge_dir(&dir, blocks)?;

    if !dir.is_root() {
        if let Some(ts) = &cfg.terrastack {
            return Err(TerrastackError::schema(
                &ts.origin.file,
                "the 'terrastack' block is only allowed at the project root",
            ));
        }
    }

    nodes.insert(dir.clone(), Node { dir: dir.clone(), cfg, children: children.clone() });

    for child in children {
        load_dir(host_root, &host_dir.join(&child), dir.join(&child), nodes)?;
    }
    Ok(())
}

/// Validates the root `terrastack` block: `required_version` gating plus
/// the `config { experiments = [...] }` feature switch.
fn validate_root_config(root_node: &Node, host_root: &Path) -> Result<Vec<String>> {
    let Some(block) = &root_node.cfg.terrastack else {
        return Err(TerrastackError::schema(
            host_root.join(ROOT_MARKER),
            "project root is missing its 'terrastack' configuration block",
        ));
    };

    for (name, expr) in &block.attrs {
        match name.as_str() {
            "required_version" => {
                let constraint = expr.as_str().ok_or_else(|| {
                    TerrastackError::schema(
                        &block.origin.file,
                        "required_version must be a string literal",
                    )
                })?;
                check_required_version(constraint)?;
            }
            other => {
                return Err(TerrastackError::schema(
                    &block.origin.file,
                    format!("unknown attribute '{other}' in terrastack block"),
                ));
            }
        }
    }

    let mut experiments = Vec::new();
    for nested in &block.nested {
        if nested.kind != "config" {
            return Err(TerrastackError::schema(
                &block.origin.file,
                format!("unknown block '{}' in terrastack block", nested.kind),
            ));
        }
        for (name, expr) in &nested.attrs {
            if name != "experiments" {
                return Err(TerrastackError::schema(
                    &block.origin.file,
                    format!("unknown attribute '{name}' in config block"),
                ));
            }
            let hcl::Expression::Array(items) = expr.as_expression() else {
                return Err(TerrastackError::schema(
                    &block.origin.file,
                    "experiments must be a list of strings",
                ));
            };
            for item in items {
                match item {
                    hcl::Expression::String(s) => experiments.push(s.clone()),
                    _ => {
                        return Err(TerrastackError::schema(
                            &block.origin.file,
                            "experiments must be a list of strings",
                        ))
                    }
                }
            }
        }
    }

    Ok(experiments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn init_root(root: &Path) {
        write(root, ROOT_MARKER, "terrastack {\n}\n");
    }

    #[test]
    fn test_load_builds_node_per_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "stacks/app/stack.tm", "stack {\n  name = \"app\"\n}\n");
        write(root, "modules/vpc/main.tf", "# not configuration\n");

        let tree = Root::load(root).unwrap();
        assert!(tree.lookup(&ProjectPath::root()).is_some());
        assert!(tree.lookup(&ProjectPath::new("/stacks").unwrap()).is_some());
        assert!(tree.lookup(&ProjectPath::new("/stacks/app").unwrap()).unwrap().is_stack());
        assert!(tree.lookup(&ProjectPath::new("/modules/vpc").unwrap()).is_some());
        assert!(tree.lookup(&ProjectPath::new("/nope").unwrap()).is_none());
    }

    #[test]
    fn test_stacks_in_lexicographic_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "b/stack.tm", "stack {}\n");
        write(root, "a/z/stack.tm", "stack {}\n");
        write(root, "a/stack.tm", "stack {}\n");

        let tree = Root::load(root).unwrap();
        let dirs: Vec<String> =
            tree.stacks().iter().map(|n| n.dir.as_str().to_string()).collect();
        assert_eq!(dirs, vec!["/a", "/a/z", "/b"]);
    }

    #[test]
    fn test_dot_directories_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, ".git/config.tm", "stack {}\n");
        write(root, "x/.hidden.tm", "not even valid {\n");

        let tree = Root::load(root).unwrap();
        assert!(tree.lookup(&ProjectPath::new("/.git").unwrap()).is_none());
        assert!(tree.lookup(&ProjectPath::new("/x").unwrap()).is_some());
    }

    #[test]
    fn test_skip_marker_produces_empty_node() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "vendored/.tmskip", "");
        write(root, "vendored/broken.tm", "this { would not parse");
        write(root, "vendored/sub/stack.tm", "stack {}\n");

        let tree = Root::load(root).unwrap();
        let node = tree.lookup(&ProjectPath::new("/vendored").unwrap()).unwrap();
        assert!(!node.is_stack());
        assert!(node.children.is_empty());
        assert!(tree.lookup(&ProjectPath::new("/vendored/sub").unwrap()).is_none());
    }

    #[test]
    fn test_parse_error_below_root_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "bad/cfg.tm", "stack {\n");

        assert_eq!(Root::load(root).unwrap_err().kind(), "HCLSyntax");
    }

    #[test]
    fn test_missing_root_marker_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(Root::load(tmp.path()).unwrap_err().kind(), "Schema");
    }

    #[test]
    fn test_find_root_upward() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "a/b/c/stack.tm", "stack {}\n");

        let found = Root::find_root(&root.join("a/b/c")).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());
    }

    #[test]
    fn test_find_root_ignores_broken_configs_on_the_way() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        // An inner marker file that fails to parse must not stop the walk.
        write(root, "a/terrastack.tm.hcl", "broken {\n");
        fs::create_dir_all(root.join("a/b")).unwrap();

        let found = Root::find_root(&root.join("a/b")).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());
    }

    #[test]
    fn test_required_version_gate() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, ROOT_MARKER, "terrastack {\n  required_version = \"> 99.0\"\n}\n");
        assert_eq!(Root::load(root).unwrap_err().kind(), "UnsupportedVersion");
    }

    #[test]
    fn test_experiments_are_root_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(
            root,
            ROOT_MARKER,
            "terrastack {\n  config {\n    experiments = [\"map-blocks\"]\n  }\n}\n",
        );
        let tree = Root::load(root).unwrap();
        assert_eq!(tree.experiments(), ["map-blocks".to_string()]);

        write(root, "sub/cfg.tm", "terrastack {\n}\n");
        assert_eq!(Root::load(root).unwrap_err().kind(), "Schema");
    }

    #[test]
    fn test_node_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        init_root(root);
        write(root, "x/y/stack.tm", "stack {}\n");

        let tree = Root::load(root).unwrap();
        let chain = tree.node_chain(&ProjectPath::new("/x/y").unwrap());
        let dirs: Vec<&str> = chain.iter().map(|n| n.dir.as_str()).collect();
        assert_eq!(dirs, vec!["/", "/x", "/x/y"]);
    }
}
