//! Shared fixtures for integration tests: an on-disk project sandbox and
//! a git-backed variant for change-detection tests.

#![allow(dead_code)]

use anyhow::Context;
use git2::build::CheckoutBuilder;
use git2::{IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};
use std::fs;
use std::path::Path;
use terrastack::{Project, Root};
use tracing_subscriber::EnvFilter;

/// Best-effort log capture; respects `RUST_LOG` for debugging tests.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reads a file with path context on failure.
pub fn read_to_string(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// A temporary project directory with the root marker in place.
pub struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Self { dir };
        sandbox.write("terrastack.tm.hcl", "terrastack {\n}\n");
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file (creating parent directories) relative to the root.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.dir.path().join(rel)).unwrap();
    }

    pub fn load(&self) -> terrastack::Result<Root> {
        Root::load(self.dir.path())
    }

    pub fn project(&self) -> Project {
        Project::load(self.dir.path()).unwrap()
    }
}

/// A sandbox inside a git repository with an `origin` remote whose `main`
/// branch tracks the local one.
pub struct GitSandbox {
    pub sandbox: Sandbox,
    pub repo: Repository,
}

impl GitSandbox {
    /// Initializes the repository on `main`, commits the current sandbox
    /// contents, and marks `origin/main` at that commit.
    pub fn new(sandbox: Sandbox) -> Self {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(sandbox.path(), &opts).unwrap();
        repo.remote("origin", "https://example.com/origin.git").unwrap();

        let this = Self { sandbox, repo };
        let initial = this.commit_all("initial");
        this.set_origin_main(initial);
        this
    }

    fn signature() -> Signature<'static> {
        Signature::now("tester", "tester@example.com").unwrap()
    }

    /// Stages everything and commits, returning the commit id.
    pub fn commit_all(&self, message: &str) -> Oid {
        let mut index = self.repo.index().unwrap();
        index
            .add_all(["*"], IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let signature = Self::signature();
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .map(|oid| self.repo.find_commit(oid).unwrap());
        let parents: Vec<_> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap()
    }

    /// Points `refs/remotes/origin/main` at a commit.
    pub fn set_origin_main(&self, oid: Oid) {
        self.repo
            .reference("refs/remotes/origin/main", oid, true, "test")
            .unwrap();
    }

    /// Creates and checks out a branch at the current HEAD.
    pub fn checkout_branch(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(name, &head, false).unwrap();
        self.repo.set_head(&format!("refs/heads/{name}")).unwrap();
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();
    }
}
