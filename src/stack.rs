//! The stack model.
//!
//! A directory becomes a stack when its merged configuration carries a
//! `stack {}` block. This module validates the block's metadata and derives
//! the [`Stack`] record used by every operation that dispatches over
//! stacks, plus the runtime namespace exposed to evaluation contexts.

use crate::error::{ErrorCollector, Result, TerrastackError};
use crate::project::ProjectPath;
use crate::tree::{MergedBlock, Node, Root};
use hcl::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-zA-Z0-9_-]{1,64}$").unwrap())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-z]([a-z0-9_-]*[a-z0-9])?$").unwrap())
}

/// Validated stack metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// The stack directory.
    pub dir: ProjectPath,
    /// Optional unique id (unique across the project, case-insensitive).
    pub id: Option<String>,
    /// Human-readable name; defaults to the directory basename.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Classification tags.
    pub tags: Vec<String>,
    /// Stacks (or `tag:` filters) ordered before this one.
    pub after: Vec<String>,
    /// Stacks (or `tag:` filters) ordered after this one.
    pub before: Vec<String>,
    /// Stacks pulled into any run that includes this one.
    pub wants: Vec<ProjectPath>,
    /// Stacks that pull this one into their runs.
    pub wanted_by: Vec<ProjectPath>,
    /// Files outside the stack whose changes mark it changed.
    pub watch: Vec<ProjectPath>,
}

impl Stack {
    /// Builds and validates a stack from a loaded tree node.
    ///
    /// # Errors
    ///
    /// `StackValidation`, `StackInvalidTag`, or `StackInvalidWatch`.
    pub fn from_node(root: &Root, node: &Node) -> Result<Self> {
        let block = node.cfg.stack.as_ref().ok_or_else(|| {
            TerrastackError::internal(format!("directory {} is not a stack", node.dir))
        })?;
        let file = block.origin.file.clone();

        let id = match get_string(block, "id", &file)? {
            Some(id) if id.is_empty() => None,
            Some(id) => {
                if !id_regex().is_match(&id) {
                    return Err(TerrastackError::StackValidation {
                        file,
                        message: format!(
                            "invalid id '{id}': must match [a-zA-Z0-9_-], max 64 chars"
                        ),
                    });
                }
                Some(id)
            }
            None => None,
        };

        let name = get_string(block, "name", &file)?
            .unwrap_or_else(|| node.dir.basename().to_string());
        let description = get_string(block, "description", &file)?.unwrap_or_default();

        let tags = get_string_list(block, "tags", &file)?;
        for tag in &tags {
            if !tag_regex().is_match(tag) {
                return Err(TerrastackError::StackInvalidTag { tag: tag.clone(), file });
            }
        }
        check_no_duplicates("tags", &tags, &file)?;

        let after = get_string_list(block, "after", &file)?;
        let before = get_string_list(block, "before", &file)?;
        for (field, entries) in [("after", &after), ("before", &before)] {
            check_no_duplicates(field, entries, &file)?;
            for entry in entries.iter() {
                validate_ordering_entry(field, entry, &file)?;
            }
        }

        let wants = get_path_list(block, "wants", &file)?;
        let wanted_by = get_path_list(block, "wanted_by", &file)?;

        let watch_raw = get_string_list(block, "watch", &file)?;
        check_no_duplicates("watch", &watch_raw, &file)?;
        let mut watch = Vec::with_capacity(watch_raw.len());
        for entry in watch_raw {
            let path = ProjectPath::new(&entry).map_err(|_| TerrastackError::StackInvalidWatch {
                path: entry.clone(),
                file: file.clone(),
                message: "watch entries must be project-absolute paths".to_string(),
            })?;
            let host = path.to_host(root.host_root());
            if host.is_dir() {
                return Err(TerrastackError::StackInvalidWatch {
                    path: entry,
                    file,
                    message: "watch entries must point at files, not directories".to_string(),
                });
            }
            watch.push(path);
        }

        for (name, expr) in &block.attrs {
            if !matches!(
                name.as_str(),
                "id" | "name" | "description" | "tags" | "after" | "before" | "wants"
                    | "wanted_by" | "watch"
            ) {
                return Err(TerrastackError::StackValidation {
                    file: expr.origin().file.clone(),
                    message: format!("unknown stack attribute '{name}'"),
                });
            }
        }

        Ok(Self {
            dir: node.dir.clone(),
            id,
            name,
            description,
            tags,
            after,
            before,
            wants,
            wanted_by,
            watch,
        })
    }

    /// The runtime metadata namespace for evaluation contexts scoped to
    /// this stack: `terrastack.stack.{id,name,description,tags,path.*}`.
    #[must_use]
    pub fn runtime_values(&self) -> Value {
        let mut path = hcl::value::Map::new();
        path.insert("absolute".to_string(), Value::from(self.dir.as_str()));
        path.insert("relative".to_string(), Value::from(self.dir.relative()));
        path.insert("basename".to_string(), Value::from(self.dir.basename()));
        path.insert("to_root".to_string(), Value::from(self.dir.to_root()));

        let mut stack = hcl::value::Map::new();
        stack.insert(
            "id".to_string(),
            self.id.as_deref().map_or(Value::Null, Value::from),
        );
        stack.insert("name".to_string(), Value::from(self.name.as_str()));
        stack.insert("description".to_string(), Value::from(self.description.as_str()));
        stack.insert(
            "tags".to_string(),
            Value::Array(self.tags.iter().map(|t| Value::from(t.as_str())).collect()),
        );
        stack.insert("path".to_string(), Value::Object(path));

        let mut ns = hcl::value::Map::new();
        ns.insert("stack".to_string(), Value::Object(stack));
        Value::Object(ns)
    }
}

/// Loads and validates every stack of the tree, enforcing project-wide
/// case-insensitive id uniqueness.
///
/// Validation failures of one stack do not stop the others from loading;
/// all errors are reported together.
///
/// # Errors
///
/// A single stack error, or `Multiple` aggregating all of them.
pub fn load_all_stacks(root: &Root) -> Result<Vec<Stack>> {
    let mut stacks = Vec::new();
    let mut errors = ErrorCollector::new();
    let mut seen_ids: HashMap<String, ProjectPath> = HashMap::new();

    for node in root.stacks() {
        match Stack::from_node(root, node) {
            Ok(stack) => {
                if let Some(id) = &stack.id {
                    let key = id.to_lowercase();
                    if let Some(other) = seen_ids.get(&key) {
                        errors.add(TerrastackError::StackDuplicatedId {
                            id: id.clone(),
                            stack: stack.dir.as_str().to_string(),
                            other: other.as_str().to_string(),
                        });
                        continue;
                    }
                    seen_ids.insert(key, stack.dir.clone());
                }
                stacks.push(stack);
            }
            Err(e) => errors.add(e),
        }
    }

    errors.into_result()?;
    tracing::debug!(stacks = stacks.len(), "stacks loaded");
    Ok(stacks)
}

fn get_string(block: &MergedBlock, name: &str, file: &std::path::Path) -> Result<Option<String>> {
    match block.attr(name) {
        None => Ok(None),
        Some(expr) => expr.as_str().map(|s| Some(s.to_string())).ok_or_else(|| {
            TerrastackError::StackValidation {
                file: file.to_path_buf(),
                message: format!("'{name}' must be a string literal"),
            }
        }),
    }
}

fn get_string_list(block: &MergedBlock, name: &str, file: &std::path::Path) -> Result<Vec<String>> {
    let Some(expr) = block.attr(name) else {
        return Ok(Vec::new());
    };
    let hcl::Expression::Array(items) = expr.as_expression() else {
        return Err(TerrastackError::StackValidation {
            file: file.to_path_buf(),
            message: format!("'{name}' must be a list of strings"),
        });
    };
    items
        .iter()
        .map(|item| match item {
            hcl::Expression::String(s) => Ok(s.clone()),
            _ => Err(TerrastackError::StackValidation {
                file: file.to_path_buf(),
                message: format!("'{name}' must be a list of strings"),
            }),
        })
        .collect()
}

fn get_path_list(
    block: &MergedBlock,
    name: &str,
    file: &std::path::Path,
) -> Result<Vec<ProjectPath>> {
    let entries = get_string_list(block, name, file)?;
    check_no_duplicates(name, &entries, file)?;
    entries
        .into_iter()
        .map(|entry| {
            if entry.starts_with("tag:") {
                return Err(TerrastackError::StackValidation {
                    file: file.to_path_buf(),
                    message: format!("'{name}' does not accept tag filters ('{entry}')"),
                });
            }
            ProjectPath::new(&entry).map_err(|_| TerrastackError::StackValidation {
                file: file.to_path_buf(),
                message: format!("'{name}' entry '{entry}' is not a project-absolute path"),
            })
        })
        .collect()
}

fn validate_ordering_entry(field: &str, entry: &str, file: &std::path::Path) -> Result<()> {
    if let Some(query) = entry.strip_prefix("tag:") {
        for tag in query.split(',') {
            let tag = tag.trim();
            if !tag_regex().is_match(tag) {
                return Err(TerrastackError::StackInvalidTag {
                    tag: tag.to_string(),
                    file: file.to_path_buf(),
                });
            }
        }
        return Ok(());
    }
    if entry.starts_with('/') {
        ProjectPath::new(entry).map_err(|_| TerrastackError::StackValidation {
            file: file.to_path_buf(),
            message: format!("'{field}' entry '{entry}' is not a valid project path"),
        })?;
        return Ok(());
    }
    Err(TerrastackError::StackValidation {
        file: file.to_path_buf(),
        message: format!("'{field}' entry '{entry}' must be a project path or tag filter"),
    })
}

fn check_no_duplicates(field: &str, entries: &[String], file: &std::path::Path) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        if entries[..i].contains(entry) {
            return Err(TerrastackError::StackValidation {
                file: file.to_path_buf(),
                message: format!("duplicate '{field}' entry '{entry}'"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ROOT_MARKER;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use test_case::test_case;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn load_tree(build: impl FnOnce(&Path)) -> (tempfile::TempDir, Root) {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), ROOT_MARKER, "terrastack {\n}\n");
        build(tmp.path());
        let root = Root::load(tmp.path()).unwrap();
        (tmp, root)
    }

    #[test]
    fn test_stack_defaults() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "stacks/app/stack.tm", "stack {}\n");
        });
        let stacks = load_all_stacks(&root).unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].name, "app");
        assert_eq!(stacks[0].id, None);
        assert_eq!(stacks[0].dir.as_str(), "/stacks/app");
    }

    #[test]
    fn test_full_metadata() {
        let (_tmp, root) = load_tree(|r| {
            write(
                r,
                "s/stack.tm",
                r#"stack {
  id          = "app-1"
  name        = "Application"
  description = "the app"
  tags        = ["team-a", "prod"]
  after       = ["/other", "tag:prod"]
  wants       = ["/net"]
}
"#,
            );
        });
        let stacks = load_all_stacks(&root).unwrap();
        let s = &stacks[0];
        assert_eq!(s.id.as_deref(), Some("app-1"));
        assert_eq!(s.tags, vec!["team-a", "prod"]);
        assert_eq!(s.after, vec!["/other", "tag:prod"]);
        assert_eq!(s.wants[0].as_str(), "/net");
    }

    #[test_case("Tag"; "uppercase start")]
    #[test_case("1tag"; "digit start")]
    #[test_case("tag-"; "trailing dash")]
    #[test_case("-tag"; "leading dash")]
    fn test_invalid_tags(tag: &str) {
        let (_tmp, root) = load_tree(|r| {
            write(r, "s/stack.tm", &format!("stack {{\n  tags = [\"{tag}\"]\n}}\n"));
        });
        let err = load_all_stacks(&root).unwrap_err();
        assert_eq!(err.kind(), "StackInvalidTag");
    }

    #[test]
    fn test_invalid_id() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "s/stack.tm", "stack {\n  id = \"has space\"\n}\n");
        });
        assert_eq!(load_all_stacks(&root).unwrap_err().kind(), "StackValidation");
    }

    #[test]
    fn test_duplicate_ids_case_insensitive() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "a/stack.tm", "stack {\n  id = \"Web\"\n}\n");
            write(r, "b/stack.tm", "stack {\n  id = \"web\"\n}\n");
        });
        let err = load_all_stacks(&root).unwrap_err();
        assert_eq!(err.kind(), "StackDuplicatedID");
    }

    #[test]
    fn test_wants_rejects_tag_filter() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "s/stack.tm", "stack {\n  wants = [\"tag:prod\"]\n}\n");
        });
        assert_eq!(load_all_stacks(&root).unwrap_err().kind(), "StackValidation");
    }

    #[test]
    fn test_watch_rejects_directories() {
        let (_tmp, root) = load_tree(|r| {
            fs::create_dir_all(r.join("shared")).unwrap();
            write(r, "s/stack.tm", "stack {\n  watch = [\"/shared\"]\n}\n");
        });
        assert_eq!(load_all_stacks(&root).unwrap_err().kind(), "StackInvalidWatch");
    }

    #[test]
    fn test_watch_accepts_files_and_missing_paths() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "shared/versions.txt", "1.0\n");
            write(
                r,
                "s/stack.tm",
                "stack {\n  watch = [\"/shared/versions.txt\", \"/not/yet/there\"]\n}\n",
            );
        });
        let stacks = load_all_stacks(&root).unwrap();
        assert_eq!(stacks[0].watch.len(), 2);
    }

    #[test]
    fn test_duplicate_set_entries_rejected() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "s/stack.tm", "stack {\n  tags = [\"a\", \"a\"]\n}\n");
        });
        assert_eq!(load_all_stacks(&root).unwrap_err().kind(), "StackValidation");
    }

    #[test]
    fn test_errors_are_aggregated_across_stacks() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "a/stack.tm", "stack {\n  id = \"!!\"\n}\n");
            write(r, "b/stack.tm", "stack {\n  tags = [\"BAD\"]\n}\n");
        });
        match load_all_stacks(&root).unwrap_err() {
            TerrastackError::Multiple { count, .. } => assert_eq!(count, 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_runtime_values() {
        let (_tmp, root) = load_tree(|r| {
            write(r, "stacks/app/stack.tm", "stack {\n  id = \"app\"\n}\n");
        });
        let stacks = load_all_stacks(&root).unwrap();
        let ns = stacks[0].runtime_values();
        let Value::Object(ns) = ns else { panic!("expected object") };
        let Value::Object(stack) = &ns["stack"] else { panic!("expected object") };
        assert_eq!(stack["id"], Value::from("app"));
        let Value::Object(path) = &stack["path"] else { panic!("expected object") };
        assert_eq!(path["absolute"], Value::from("/stacks/app"));
        assert_eq!(path["relative"], Value::from("stacks/app"));
        assert_eq!(path["basename"], Value::from("app"));
        assert_eq!(path["to_root"], Value::from("../.."));
    }
}
