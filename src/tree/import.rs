//! Import directive resolution.
//!
//! `import { source = "/path/to/file.tm" }` merges the imported file's
//! blocks as if they were declared locally at the importing directory.
//! Resolution is a pure set union at load time; imported blocks keep the
//! imported file as their origin so diagnostics point at the true source.
//! Cycles among imports fail with `Import`.

use crate::error::{Result, TerrastackError};
use crate::project::ProjectPath;
use crate::tree::file::{self, FileBlocks, RawBlock};
use std::path::Path;

/// Replaces every `import` block in `parsed` with the imported file's
/// blocks, recursively.
///
/// # Errors
///
/// `Import` for a missing/invalid source, an import cycle, or an imported
/// file that declares `stack`/`terrastack` blocks; parse errors of imported
/// files propagate as-is.
pub fn resolve(host_root: &Path, parsed: FileBlocks) -> Result<Vec<RawBlock>> {
    let importing = ProjectPath::from_host(host_root, &parsed.file)
        .unwrap_or_else(ProjectPath::root);
    let mut visited = vec![importing];
    expand(host_root, parsed, &mut visited)
}

fn expand(
    host_root: &Path,
    parsed: FileBlocks,
    visited: &mut Vec<ProjectPath>,
) -> Result<Vec<RawBlock>> {
    let mut out = Vec::with_capacity(parsed.blocks.len());

    for block in parsed.blocks {
        if block.kind != "import" {
            out.push(block);
            continue;
        }

        let file = parsed.file.clone();
        let source_expr = block.attr("source").ok_or_else(|| TerrastackError::Import {
            file: file.clone(),
            message: "import block requires a 'source' attribute".to_string(),
        })?;
        let source = source_expr.as_str().ok_or_else(|| TerrastackError::Import {
            file: file.clone(),
            message: "import source must be a string literal".to_string(),
        })?;

        if !source.starts_with('/') {
            return Err(TerrastackError::Import {
                file,
                message: format!("import source '{source}' must be a project-absolute path"),
            });
        }
        let source_path = ProjectPath::new(source).map_err(|_| TerrastackError::Import {
            file: file.clone(),
            message: format!("import source '{source}' is not a valid project path"),
        })?;

        if visited.contains(&source_path) {
            return Err(TerrastackError::Import {
                file,
                message: format!("import cycle detected through '{source_path}'"),
            });
        }

        let host_path = source_path.to_host(host_root);
        if !host_path.is_file() {
            return Err(TerrastackError::Import {
                file,
                message: format!("imported file '{source_path}' does not exist"),
            });
        }

        tracing::debug!(from = %file.display(), source = %source_path, "resolving import");

        let imported = file::parse_file(&host_path)?;
        for imported_block in &imported.blocks {
            if imported_block.kind == "stack" || imported_block.kind == "terrastack" {
                return Err(TerrastackError::Import {
                    file,
                    message: format!(
                        "imported file '{source_path}' declares a '{}' block, which cannot be imported",
                        imported_block.kind
                    ),
                });
            }
        }

        visited.push(source_path);
        out.extend(expand(host_root, imported, visited)?);
        visited.pop();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_import_merges_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "shared/globals.tm", "globals {\n  team = \"platform\"\n}\n");
        write(root, "app/cfg.tm", "import {\n  source = \"/shared/globals.tm\"\n}\n");

        let parsed = file::parse_file(&root.join("app/cfg.tm")).unwrap();
        let blocks = resolve(root, parsed).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, "globals");
        // Origin points at the imported file, not the importer.
        assert!(blocks[0].origin.file.ends_with("shared/globals.tm"));
    }

    #[test]
    fn test_import_cycle_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "a.tm", "import {\n  source = \"/b.tm\"\n}\n");
        write(root, "b.tm", "import {\n  source = \"/a.tm\"\n}\n");

        let parsed = file::parse_file(&root.join("a.tm")).unwrap();
        let err = resolve(root, parsed).unwrap_err();
        assert_eq!(err.kind(), "Import");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_import_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "a.tm", "import {\n  source = \"/nope.tm\"\n}\n");

        let parsed = file::parse_file(&root.join("a.tm")).unwrap();
        assert_eq!(resolve(root, parsed).unwrap_err().kind(), "Import");
    }

    #[test]
    fn test_import_of_stack_block_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "stackdef.tm", "stack {\n  name = \"x\"\n}\n");
        write(root, "a.tm", "import {\n  source = \"/stackdef.tm\"\n}\n");

        let parsed = file::parse_file(&root.join("a.tm")).unwrap();
        assert_eq!(resolve(root, parsed).unwrap_err().kind(), "Import");
    }

    #[test]
    fn test_relative_import_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "a.tm", "import {\n  source = \"../other.tm\"\n}\n");

        let parsed = file::parse_file(&root.join("a.tm")).unwrap();
        assert_eq!(resolve(root, parsed).unwrap_err().kind(), "Import");
    }
}
