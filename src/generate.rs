//! The generator driver.
//!
//! `generate_file` blocks declare files to materialize per stack from the
//! evaluated configuration. Blocks are inherited: every block declared at
//! the stack directory or any ancestor applies to the stack. Each block
//! may carry a `condition`, and `assert` blocks that must hold for
//! generation to proceed.
//!
//! ```hcl
//! generate_file "env.json" {
//!   content = tm_format("{\"env\": \"%s\"}", global.env)
//!
//!   assert {
//!     assertion = global.env != ""
//!     message   = "global.env must be set"
//!   }
//! }
//! ```
//!
//! Written files carry a fixed header as their first line; the writer
//! refuses to overwrite any existing file that lacks it.

use crate::error::{Result, TerrastackError};
use crate::eval::Evaluator;
use crate::project::ProjectPath;
use crate::stack::Stack;
use crate::tree::{MergedBlock, Root};
use hcl::Value;

/// First line of every generated file.
pub const GENERATED_HEADER: &str = "// TERRASTACK: GENERATED AUTOMATICALLY DO NOT EDIT";

/// One file to materialize for a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// The stack the file belongs to.
    pub stack: ProjectPath,
    /// Target path, relative to the stack directory.
    pub rel_path: String,
    /// File body (without the generated header).
    pub content: String,
}

impl GeneratedFile {
    /// The full on-disk rendering: header line plus body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(GENERATED_HEADER.len() + self.content.len() + 2);
        out.push_str(GENERATED_HEADER);
        out.push('\n');
        out.push_str(&self.content);
        if !self.content.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Evaluates every `generate_file` block that applies to `stack`, against
/// the stack's already-resolved globals.
///
/// Blocks with a false `condition` are skipped; failed assertions with
/// `warning = true` skip the block with a warning, all other assertion
/// failures fail the block.
///
/// # Errors
///
/// `Schema` for malformed blocks or duplicate labels, `Eval` for failing
/// expressions or assertions.
pub fn evaluate(root: &Root, stack: &Stack, globals: &Value) -> Result<Vec<GeneratedFile>> {
    let mut evaluator = Evaluator::new();
    evaluator.set_namespace("global", globals.clone());
    evaluator.set_namespace("terrastack", stack.runtime_values());
    evaluator.register_func("tm_hcl_expression", tm_hcl_expression);
    evaluator.register_func("tm_vendor", tm_vendor);

    let mut out = Vec::new();
    let mut seen_labels: Vec<&str> = Vec::new();

    for node in root.node_chain(&stack.dir) {
        for block in &node.cfg.generate {
            let label = block.labels[0].as_str();
            if seen_labels.contains(&label) {
                return Err(TerrastackError::schema(
                    &block.origin.file,
                    format!("duplicate generate_file label '{label}' for stack {}", stack.dir),
                ));
            }
            seen_labels.push(label);

            if let Some(file) = evaluate_block(&evaluator, stack, block, label)? {
                out.push(file);
            }
        }
    }
    Ok(out)
}

fn evaluate_block(
    evaluator: &Evaluator,
    stack: &Stack,
    block: &MergedBlock,
    label: &str,
) -> Result<Option<GeneratedFile>> {
    if label.starts_with('/') || label.split('/').any(|c| c == "..") {
        return Err(TerrastackError::schema(
            &block.origin.file,
            format!("generate_file label '{label}' must be a relative path inside the stack"),
        ));
    }

    for (name, _) in &block.attrs {
        if !matches!(name.as_str(), "condition" | "content") {
            return Err(TerrastackError::schema(
                &block.origin.file,
                format!("unknown generate_file attribute '{name}'"),
            ));
        }
    }

    if let Some(condition) = block.attr("condition") {
        match evaluator.eval(condition)? {
            Value::Bool(true) => {}
            Value::Bool(false) => {
                tracing::debug!(stack = %stack.dir, label, "condition is false, skipping");
                return Ok(None);
            }
            other => {
                return Err(TerrastackError::eval(
                    format!("condition must be a boolean, got {other:?}"),
                    condition.origin().clone(),
                ))
            }
        }
    }

    for assert in &block.nested {
        if assert.kind != "assert" {
            return Err(TerrastackError::schema(
                &assert.origin.file,
                format!("unknown block '{}' inside generate_file", assert.kind),
            ));
        }
        let assertion = assert.attr("assertion").ok_or_else(|| {
            TerrastackError::schema(&assert.origin.file, "assert requires an 'assertion' attribute")
        })?;
        let message_expr = assert.attr("message").ok_or_else(|| {
            TerrastackError::schema(&assert.origin.file, "assert requires a 'message' attribute")
        })?;

        let holds = match evaluator.eval(assertion)? {
            Value::Bool(b) => b,
            other => {
                return Err(TerrastackError::eval(
                    format!("assertion must be a boolean, got {other:?}"),
                    assertion.origin().clone(),
                ))
            }
        };
        if holds {
            continue;
        }

        let message = match evaluator.eval(message_expr)? {
            Value::String(s) => s,
            other => format!("{other:?}"),
        };
        let warning = match assert.attr("warning") {
            Some(expr) => matches!(evaluator.eval(expr)?, Value::Bool(true)),
            None => false,
        };
        if warning {
            tracing::warn!(stack = %stack.dir, label, message = %message, "assertion failed");
            return Ok(None);
        }
        return Err(TerrastackError::eval(
            format!("assertion failed: {message}"),
            assertion.origin().clone(),
        ));
    }

    let content_expr = block.attr("content").ok_or_else(|| {
        TerrastackError::schema(&block.origin.file, "generate_file requires a 'content' attribute")
    })?;
    let content = match evaluator.eval(content_expr)? {
        Value::String(s) => s,
        other => {
            return Err(TerrastackError::eval(
                format!("content must be a string, got {other:?}"),
                content_expr.origin().clone(),
            ))
        }
    };

    Ok(Some(GeneratedFile { stack: stack.dir.clone(), rel_path: label.to_string(), content }))
}

/// Writes generated files to disk, guarding against clobbering files that
/// were not generated: an existing target whose first line is not the
/// generated-file header is refused.
///
/// Returns the number of files written.
///
/// # Errors
///
/// `Generate` on header-guard refusal, `Io` on filesystem failures.
pub fn write(root: &Root, files: &[GeneratedFile]) -> Result<usize> {
    let mut written = 0;
    for file in files {
        let target = file.stack.to_host(root.host_root()).join(&file.rel_path);

        if target.exists() {
            let existing =
                std::fs::read_to_string(&target).map_err(|e| TerrastackError::io(&target, e))?;
            if existing.lines().next() != Some(GENERATED_HEADER) {
                return Err(TerrastackError::Generate {
                    path: target,
                    message: "refusing to overwrite a file that was not generated".to_string(),
                });
            }
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TerrastackError::io(parent, e))?;
        }
        std::fs::write(&target, file.render()).map_err(|e| TerrastackError::io(&target, e))?;
        tracing::info!(path = %target.display(), "wrote generated file");
        written += 1;
    }
    Ok(written)
}

/// Generator-phase function: validates that its argument parses as an HCL
/// expression and passes it through verbatim, for splicing raw expressions
/// into generated content.
fn tm_hcl_expression(args: &[Value]) -> std::result::Result<Value, String> {
    let [Value::String(source)] = args else {
        return Err("expects one string argument".to_string());
    };
    hcl::parse(&format!("x = {source}\n"))
        .map_err(|e| format!("not a valid expression: {e}"))?;
    Ok(Value::String(source.clone()))
}

/// Generator-phase function: maps a module source to its vendored
/// location under `/vendor`.
fn tm_vendor(args: &[Value]) -> std::result::Result<Value, String> {
    let [Value::String(source)] = args else {
        return Err("expects one string argument".to_string());
    };
    let (base, reference) = match source.split_once("?ref=") {
        Some((base, reference)) => (base, Some(reference)),
        None => (source.as_str(), None),
    };
    let base = base.trim_start_matches("git::");
    let base = base.split_once("://").map_or(base, |(_, rest)| rest);
    let mut path = format!("/vendor/{}", base.trim_matches('/'));
    if let Some(reference) = reference {
        path.push('/');
        path.push_str(reference);
    }
    Ok(Value::String(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_prepends_header() {
        let file = GeneratedFile {
            stack: ProjectPath::root(),
            rel_path: "out.txt".to_string(),
            content: "body".to_string(),
        };
        let rendered = file.render();
        assert!(rendered.starts_with(GENERATED_HEADER));
        assert!(rendered.ends_with("body\n"));
    }

    #[test]
    fn test_tm_hcl_expression_validates() {
        let out = tm_hcl_expression(&[Value::from("var.name != \"\"")]).unwrap();
        assert_eq!(out, Value::from("var.name != \"\""));
        assert!(tm_hcl_expression(&[Value::from("not [ valid")]).is_err());
    }

    #[test]
    fn test_tm_vendor_paths() {
        assert_eq!(
            tm_vendor(&[Value::from("github.com/org/mod?ref=v1.2.0")]).unwrap(),
            Value::from("/vendor/github.com/org/mod/v1.2.0")
        );
        assert_eq!(
            tm_vendor(&[Value::from("git::https://example.com/mod.git")]).unwrap(),
            Value::from("/vendor/example.com/mod.git")
        );
    }
}
