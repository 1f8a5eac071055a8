//! Configuration file parsing and per-directory block merging.
//!
//! One file parses into a list of [`RawBlock`]s; a directory's files merge
//! into a [`DirConfig`]. Merging unions same-typed blocks (duplicate
//! attributes are a schema error), with one exception: `globals` blocks are
//! concatenated untouched because their statement order is meaningful and
//! duplicate bindings are the globals engine's own diagnostic.

use crate::error::{Origin, Result, TerrastackError};
use crate::project::ProjectPath;
use crate::tree::expr::Expr;
use std::path::{Path, PathBuf};

/// Extensions of configuration files, longest first.
pub const CONFIG_EXTENSIONS: &[&str] = &[".tm.hcl", ".tm"];

/// The sentinel file that stops the loader from descending into a
/// directory.
pub const SKIP_MARKER: &str = ".tmskip";

/// Block types accepted at the top level of a configuration file.
const TOP_LEVEL_KINDS: &[&str] = &["terrastack", "stack", "globals", "generate_file", "import"];

/// A parsed configuration block: type, labels, attributes and nested
/// blocks, in declaration order.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// The block type (`globals`, `stack`, ...).
    pub kind: String,
    /// Block labels, in order.
    pub labels: Vec<String>,
    /// Attributes in declaration order.
    pub attrs: Vec<(String, Expr)>,
    /// Nested blocks in declaration order.
    pub nested: Vec<RawBlock>,
    /// Where the block was declared.
    pub origin: Origin,
}

impl RawBlock {
    /// Looks up an attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Expr> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn from_hcl(block: hcl::Block, file: &Path) -> Self {
        let origin = Origin::new(file, 0);
        let kind = block.identifier.as_str().to_string();
        let labels = block.labels.iter().map(|l| l.as_str().to_string()).collect();

        let mut attrs = Vec::new();
        let mut nested = Vec::new();
        for structure in block.body.into_inner() {
            match structure {
                hcl::Structure::Attribute(attr) => {
                    attrs.push((
                        attr.key.as_str().to_string(),
                        Expr::new(attr.expr, origin.clone()),
                    ));
                }
                hcl::Structure::Block(inner) => {
                    nested.push(Self::from_hcl(inner, file));
                }
            }
        }

        Self { kind, labels, attrs, nested, origin }
    }
}

/// All top-level blocks of one parsed file.
#[derive(Debug, Clone)]
pub struct FileBlocks {
    /// The parsed file.
    pub file: PathBuf,
    /// Top-level blocks in declaration order.
    pub blocks: Vec<RawBlock>,
}

/// Parses one configuration file from disk.
///
/// # Errors
///
/// `Io` when the file cannot be read, `HclSyntax` for lexical/syntactic
/// failures, `Schema` for structural violations (top-level attributes,
/// unknown block types).
pub fn parse_file(path: &Path) -> Result<FileBlocks> {
    let content = std::fs::read_to_string(path).map_err(|e| TerrastackError::io(path, e))?;
    parse_source(&content, path)
}

/// Parses configuration source attributed to `path`.
///
/// # Errors
///
/// Same failure modes as [`parse_file`], minus I/O.
pub fn parse_source(content: &str, path: &Path) -> Result<FileBlocks> {
    let body = hcl::parse(content).map_err(|e| TerrastackError::HclSyntax {
        file: path.to_path_buf(),
        message: e.to_string(),
        line: None,
        column: None,
    })?;

    let mut blocks = Vec::new();
    for structure in body.into_inner() {
        match structure {
            hcl::Structure::Attribute(attr) => {
                return Err(TerrastackError::schema(
                    path,
                    format!(
                        "unexpected top-level attribute '{}': only blocks are allowed at file scope",
                        attr.key.as_str()
                    ),
                ));
            }
            hcl::Structure::Block(block) => {
                let kind = block.identifier.as_str();
                if !TOP_LEVEL_KINDS.contains(&kind) {
                    return Err(TerrastackError::schema(
                        path,
                        format!("unknown block type '{kind}'"),
                    ));
                }
                blocks.push(RawBlock::from_hcl(block, path));
            }
        }
    }

    tracing::debug!(file = %path.display(), blocks = blocks.len(), "parsed configuration file");
    Ok(FileBlocks { file: path.to_path_buf(), blocks })
}

/// Whether `name` is a configuration file name.
#[must_use]
pub fn is_config_file(name: &str) -> bool {
    !name.starts_with('.') && CONFIG_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Same-typed blocks of one directory unioned into a single block.
///
/// The origin is the first occurrence, which keeps diagnostics stable under
/// merging.
#[derive(Debug, Clone)]
pub struct MergedBlock {
    /// Block labels (shared by all merged occurrences).
    pub labels: Vec<String>,
    /// Unioned attributes.
    pub attrs: Vec<(String, Expr)>,
    /// Concatenated nested blocks.
    pub nested: Vec<RawBlock>,
    /// Origin of the first occurrence.
    pub origin: Origin,
}

impl MergedBlock {
    fn new(block: RawBlock) -> Self {
        Self { labels: block.labels, attrs: block.attrs, nested: block.nested, origin: block.origin }
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Expr> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn merge(&mut self, block: RawBlock, file: &Path) -> Result<()> {
        for (name, expr) in block.attrs {
            if self.attrs.iter().any(|(k, _)| *k == name) {
                return Err(TerrastackError::schema(
                    file,
                    format!("attribute '{name}' already defined in a merged block"),
                ));
            }
            self.attrs.push((name, expr));
        }
        self.nested.extend(block.nested);
        Ok(())
    }
}

/// The merged configuration of one directory.
#[derive(Debug, Clone, Default)]
pub struct DirConfig {
    /// The root-level `terrastack` block, when present.
    pub terrastack: Option<MergedBlock>,
    /// The `stack` block, when present (makes the directory a stack).
    pub stack: Option<MergedBlock>,
    /// All `globals` blocks, concatenated in file order.
    pub globals: Vec<RawBlock>,
    /// `generate_file` blocks, merged by label.
    pub generate: Vec<MergedBlock>,
}

/// Merges the blocks of all files of one directory.
///
/// `blocks` must already include imported blocks; `import` blocks
/// themselves are resolved by the loader and never reach this function.
///
/// # Errors
///
/// `Schema` on conflicting attributes, labeled `stack`/`terrastack`
/// blocks, or unlabeled `generate_file` blocks.
pub fn merge_dir(dir: &ProjectPath, blocks: Vec<RawBlock>) -> Result<DirConfig> {
    let mut cfg = DirConfig::default();

    for block in blocks {
        let file = block.origin.file.clone();
        match block.kind.as_str() {
            "terrastack" => {
                require_no_labels(&block, &file)?;
                match &mut cfg.terrastack {
                    Some(merged) => merged.merge(block, &file)?,
                    None => cfg.terrastack = Some(MergedBlock::new(block)),
                }
            }
            "stack" => {
                require_no_labels(&block, &file)?;
                match &mut cfg.stack {
                    Some(merged) => merged.merge(block, &file)?,
                    None => cfg.stack = Some(MergedBlock::new(block)),
                }
            }
            "globals" => cfg.globals.push(block),
            "generate_file" => {
                if block.labels.len() != 1 || block.labels[0].is_empty() {
                    return Err(TerrastackError::schema(
                        &file,
                        "generate_file requires exactly one non-empty label",
                    ));
                }
                match cfg.generate.iter_mut().find(|g| g.labels == block.labels) {
                    Some(merged) => merged.merge(block, &file)?,
                    None => cfg.generate.push(MergedBlock::new(block)),
                }
            }
            "import" => {
                return Err(TerrastackError::internal(format!(
                    "unresolved import block reached merge for {dir}"
                )));
            }
            other => {
                return Err(TerrastackError::schema(
                    &file,
                    format!("unknown block type '{other}'"),
                ));
            }
        }
    }

    Ok(cfg)
}

fn require_no_labels(block: &RawBlock, file: &Path) -> Result<()> {
    if block.labels.is_empty() {
        Ok(())
    } else {
        Err(TerrastackError::schema(
            file,
            format!("block '{}' does not take labels", block.kind),
        ))
    }
}
