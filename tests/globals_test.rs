//! Integration tests for the globals engine: hierarchy override, labeled
//! extension, lazy cross-scope references, map generators, unset and the
//! failure modes.

mod common;

use common::Sandbox;
use hcl::Value;
use pretty_assertions::assert_eq;
use terrastack::{globals, stack, ProjectPath};

fn report_at(sandbox: &Sandbox, dir: &str) -> terrastack::EvalReport {
    let root = sandbox.load().unwrap();
    globals::load_at(&root, &ProjectPath::new(dir).unwrap())
}

#[test]
fn hierarchy_override() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  a = \"root\"\n}\n");
    sandbox.write("x/globals.tm", "globals {\n  a = \"x\"\n}\n");
    sandbox.write("x/s/stack.tm", "stack {}\n");
    sandbox.write("y/s/stack.tm", "stack {}\n");

    let below = report_at(&sandbox, "/x/s");
    assert!(below.is_ok());
    assert_eq!(below.get("a"), Some(&Value::from("x")));

    let outside = report_at(&sandbox, "/y/s");
    assert_eq!(outside.get("a"), Some(&Value::from("root")));
}

#[test]
fn inherited_globals_visible_at_every_descendant() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  team = \"platform\"\n  region = \"eu\"\n}\n");
    sandbox.write("a/b/c/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/a/b/c");
    assert_eq!(report.get("team"), Some(&Value::from("platform")));
    assert_eq!(report.get("region"), Some(&Value::from("eu")));
}

#[test]
fn extend_and_index_dependency() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        r#"globals {
  _p  = { aws = {}, mysql = {} }
  use = {}
  req = { for k, v in global._p : k => v if tm_try(global.use[k], false) }
}

globals "use" {
  aws = true
}

globals "use" {
  mysql = true
}
"#,
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);

    let Some(Value::Object(req)) = report.get("req") else {
        panic!("global.req missing: {:?}", report.globals)
    };
    let mut keys: Vec<&String> = req.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["aws", "mysql"]);
}

#[test]
fn extension_across_scopes() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  obj = { base = 1 }\n}\n");
    sandbox.write("s/globals.tm", "globals \"obj\" {\n  extra = 2\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("obj.base"), Some(&Value::from(1)));
    assert_eq!(report.get("obj.extra"), Some(&Value::from(2)));
}

#[test]
fn closer_assignment_replaces_wholesale() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals \"obj\" {\n  deep = 1\n}\n");
    sandbox.write("s/globals.tm", "globals {\n  obj = \"flat\"\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    // The closer wholesale assignment shadows the farther deep binding.
    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("obj"), Some(&Value::from("flat")));
}

#[test]
fn cycle_detection_leaves_unrelated_statements_alone() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        "globals {\n  a = global.b\n  b = global.c\n  c = global.a\n  d = 1\n}\n",
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(!report.is_ok());
    for path in ["global.a", "global.b", "global.c"] {
        let errors = report.errors_for(path);
        assert!(!errors.is_empty(), "no error for {path}");
        assert_eq!(errors[0].kind(), "Cycle");
    }
    // The statement outside the cycle still evaluated.
    assert_eq!(report.get("d"), Some(&Value::from(1)));
}

#[test]
fn self_reference_is_a_cycle() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  a = global.a.b\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert_eq!(report.errors_for("global.a")[0].kind(), "Cycle");
}

#[test]
fn unset_chain() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  a = 1\n  b = 2\n  c = 3\n}\n");
    sandbox.write("stacks/globals.tm", "globals {\n  b = unset\n}\n");
    sandbox.write("stacks/s1/globals.tm", "globals {\n  c = unset\n}\n");
    sandbox.write("stacks/s1/stack.tm", "stack {}\n");
    sandbox.write("stacks/s2/stack.tm", "stack {}\n");

    let s1 = report_at(&sandbox, "/stacks/s1");
    assert!(s1.is_ok(), "{:?}", s1.errors);
    assert_eq!(s1.get("a"), Some(&Value::from(1)));
    assert_eq!(s1.get("b"), None);
    assert_eq!(s1.get("c"), None);

    let s2 = report_at(&sandbox, "/stacks/s2");
    assert_eq!(s2.get("a"), Some(&Value::from(1)));
    assert_eq!(s2.get("b"), None);
    assert_eq!(s2.get("c"), Some(&Value::from(3)));
}

#[test]
fn unset_removes_inherited_object_leaf() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  obj = { x = 1, y = 2 }\n}\n");
    sandbox.write("s/globals.tm", "globals \"obj\" {\n  x = unset\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("obj.x"), None);
    assert_eq!(report.get("obj.y"), Some(&Value::from(2)));

    // The ancestor scope itself is untouched.
    let root_view = report_at(&sandbox, "/");
    assert_eq!(root_view.get("obj.x"), Some(&Value::from(1)));
}

#[test]
fn map_reduce_with_element_old() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        r#"globals {
  map "counts" {
    for_each = ["x", "y", "x"]
    key      = element.new
    value    = tm_try(element.old, 0) + 1
  }
}
"#,
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("counts.x"), Some(&Value::from(2)));
    assert_eq!(report.get("counts.y"), Some(&Value::from(1)));
}

#[test]
fn map_with_custom_iterator_and_value_block() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        r#"globals {
  envs = ["dev", "prod"]

  map "deployments" {
    for_each = global.envs
    iterator = env
    key      = env.new

    value {
      name = tm_upper(env.new)

      map "flags" {
        for_each = ["audit"]
        key      = element.new
        value    = env.new == "prod"
      }
    }
  }
}
"#,
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("deployments.dev.name"), Some(&Value::from("DEV")));
    assert_eq!(report.get("deployments.prod.flags.audit"), Some(&Value::Bool(true)));
    assert_eq!(report.get("deployments.dev.flags.audit"), Some(&Value::Bool(false)));
}

#[test]
fn map_for_each_must_be_a_list() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        "globals {\n  map \"m\" {\n    for_each = \"nope\"\n    key = element.new\n    value = 1\n  }\n}\n",
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert_eq!(report.errors_for("global.m")[0].kind(), "Eval");
}

#[test]
fn empty_labeled_block_materializes_object() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals \"obj\" {\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok());
    assert_eq!(report.get("obj"), Some(&Value::Object(hcl::value::Map::new())));
}

#[test]
fn lazy_cross_scope_reference() {
    let sandbox = Sandbox::new();
    // The root references a global only defined further down the chain.
    sandbox.write("globals.tm", "globals {\n  greeting = \"hello ${global.who}\"\n}\n");
    sandbox.write("s/globals.tm", "globals {\n  who = \"world\"\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("greeting"), Some(&Value::from("hello world")));

    // At the root itself the reference is undefined.
    let root_view = report_at(&sandbox, "/");
    assert_eq!(root_view.errors_for("global.greeting")[0].kind(), "Eval");
}

#[test]
fn stack_runtime_namespace_is_available() {
    let sandbox = Sandbox::new();
    sandbox.write("s/globals.tm", "globals {\n  here = terrastack.stack.path.absolute\n}\n");
    sandbox.write("s/stack.tm", "stack {\n  name = \"the-stack\"\n}\n");

    let root = sandbox.load().unwrap();
    let stacks = stack::load_all_stacks(&root).unwrap();
    let report = globals::load(&root, &stacks[0]);
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.get("here"), Some(&Value::from("/s")));
}

#[test]
fn redefinition_in_same_scope_is_reported() {
    let sandbox = Sandbox::new();
    sandbox.write("a.tm", "globals {\n  dup = 1\n}\n");
    sandbox.write("b.tm", "globals {\n  dup = 2\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert_eq!(report.errors_for("global.dup")[0].kind(), "Redefined");
    // The surviving statement still evaluated.
    assert_eq!(report.get("dup"), Some(&Value::from(1)));
}

#[test]
fn extending_a_non_object_fails() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  num = 1\n}\nglobals \"num\" {\n  x = 2\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert_eq!(report.errors_for("global.num.x")[0].kind(), "CannotExtendObject");
    // The base binding survives.
    assert_eq!(report.get("num"), Some(&Value::from(1)));
}

#[test]
fn undefined_reference_is_an_eval_error() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  a = global.missing\n  b = 2\n}\n");
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert_eq!(report.errors_for("global.a")[0].kind(), "Eval");
    assert_eq!(report.get("b"), Some(&Value::from(2)));
}

#[test]
fn evaluation_is_deterministic() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        r#"globals {
  list = ["c", "a", "b"]
  obj  = { z = 1, a = 2 }

  map "m" {
    for_each = global.list
    key      = element.new
    value    = element.new
  }
}
"#,
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let first = report_at(&sandbox, "/s");
    let second = report_at(&sandbox, "/s");
    assert!(first.is_ok());
    assert_eq!(first.globals, second.globals);
    assert_eq!(
        serde_json::to_string(&first.globals).unwrap(),
        serde_json::to_string(&second.globals).unwrap()
    );
}

#[test]
fn serialize_reparse_round_trip() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "globals.tm",
        r#"globals {
  name    = "app"
  replicas = 3
  enabled = true
  regions = ["eu", "us"]
  limits  = { cpu = 2, mem = "4Gi" }
}
"#,
    );
    sandbox.write("s/stack.tm", "stack {}\n");

    let report = report_at(&sandbox, "/s");
    assert!(report.is_ok(), "{:?}", report.errors);

    // Rendering the evaluated globals back to their attribute
    // representation and re-parsing them yields the same value map.
    let rendered = hcl::to_string(&report.globals).unwrap();
    let reparsed: Value = hcl::from_str(&rendered).unwrap();
    assert_eq!(reparsed, report.globals);
}

#[test]
fn statement_cache_is_shared_across_resolutions() {
    let sandbox = Sandbox::new();
    sandbox.write("globals.tm", "globals {\n  shared = \"root\"\n}\n");
    sandbox.write("a/stack.tm", "stack {}\n");
    sandbox.write("b/stack.tm", "stack {}\n");

    let root = sandbox.load().unwrap();
    let a = globals::load_at(&root, &ProjectPath::new("/a").unwrap());
    let b = globals::load_at(&root, &ProjectPath::new("/b").unwrap());
    assert_eq!(a.get("shared"), b.get("shared"));
}
