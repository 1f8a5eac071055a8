//! Project-relative paths and version gating.
//!
//! A [`ProjectPath`] is the identity of a directory or file inside the
//! project: slash-rooted, slash-separated, independent of host filesystem
//! conventions. All cross-directory references in configuration (imports,
//! watch lists, ordering hints) are expressed as project paths.
//!
//! [`VersionSpec`] implements the `required_version` constraint grammar used
//! by the root configuration block (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~>`
//! and comma-joined AND lists).

use crate::error::{Result, TerrastackError};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// A slash-rooted path relative to the project root.
///
/// The root itself is `/`. Paths never carry a trailing slash (except the
/// root), never contain `.` or `..` components, and compare
/// lexicographically, which gives the canonical enumeration order for
/// stacks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectPath(String);

impl ProjectPath {
    /// The project root path, `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Builds a project path from a slash-rooted string.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the string is not rooted or contains `.`/`..`
    /// components.
    pub fn new(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(TerrastackError::internal(format!(
                "project path '{path}' must start with '/'"
            )));
        }
        if path.split('/').any(|c| c == "." || c == "..") {
            return Err(TerrastackError::internal(format!(
                "project path '{path}' must not contain '.' or '..'"
            )));
        }
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Converts a host path under `root` into a project path.
    ///
    /// Returns `None` when `host` is not inside `root`.
    #[must_use]
    pub fn from_host(root: &Path, host: &Path) -> Option<Self> {
        let rel = host.strip_prefix(root).ok()?;
        let mut path = String::new();
        for comp in rel.components() {
            match comp {
                Component::Normal(name) => {
                    path.push('/');
                    path.push_str(&name.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        if path.is_empty() {
            Some(Self::root())
        } else {
            Some(Self(path))
        }
    }

    /// Maps this project path back onto the host filesystem under `root`.
    #[must_use]
    pub fn to_host(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for comp in self.components() {
            out.push(comp);
        }
        out
    }

    /// Whether this is the project root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The path as a string, always starting with `/`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components, excluding the root.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// The last component, or `/` for the root.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("/")
    }

    /// The parent directory, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends a single child component.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        if self.is_root() {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// Whether `self` equals `other` or lies underneath it (directory
    /// boundary aware: `/ab` is not inside `/a`).
    #[must_use]
    pub fn is_inside(&self, other: &Self) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes().get(other.0.len()) == Some(&b'/'))
    }

    /// The path relative to the root, without a leading slash. Empty for
    /// the root itself.
    #[must_use]
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches('/')
    }

    /// A `..`-chain from this directory back up to the root (`.` for the
    /// root itself).
    #[must_use]
    pub fn to_root(&self) -> String {
        let depth = self.depth();
        if depth == 0 {
            return ".".to_string();
        }
        let mut out = String::new();
        for i in 0..depth {
            if i > 0 {
                out.push('/');
            }
            out.push_str("..");
        }
        out
    }

    /// The chain of directories from the root down to (and including) this
    /// path.
    #[must_use]
    pub fn chain_from_root(&self) -> Vec<Self> {
        let mut chain = vec![Self::root()];
        let mut cur = Self::root();
        for comp in self.components() {
            cur = cur.join(comp);
            chain.push(cur.clone());
        }
        chain
    }

    /// Resolves a `./`- or `../`-relative reference against this directory,
    /// staying inside the project. Returns `None` when the reference climbs
    /// above the root.
    #[must_use]
    pub fn resolve_relative(&self, reference: &str) -> Option<Self> {
        let mut parts: Vec<String> = self.components().map(str::to_string).collect();
        for seg in reference.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    parts.pop()?;
                }
                name => parts.push(name.to_string()),
            }
        }
        let mut out = Self::root();
        for part in parts {
            out = out.join(&part);
        }
        Some(out)
    }
}

impl std::fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `required_version` constraint.
///
/// The constraint is a comma-separated conjunction of clauses, each an
/// operator (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~>`; bare versions mean
/// `=`) applied to a version that may spell out one, two or three
/// numeric segments (`1`, `1.2`, `1.2.3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    raw: String,
    clauses: Vec<Clause>,
}

/// One clause of a [`VersionSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Clause {
    op: ConstraintOp,
    version: semver::Version,
    /// How many segments the clause wrote out. A `~>` clause pins every
    /// segment above the last written one.
    segments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ConstraintOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Tilde,
}

/// Operator tokens, two-character tokens first so `>=` is never read as
/// `>` followed by garbage.
const OPERATORS: &[(&str, ConstraintOp)] = &[
    ("~>", ConstraintOp::Tilde),
    (">=", ConstraintOp::Gte),
    ("<=", ConstraintOp::Lte),
    ("!=", ConstraintOp::Neq),
    (">", ConstraintOp::Gt),
    ("<", ConstraintOp::Lt),
    ("=", ConstraintOp::Eq),
];

impl VersionSpec {
    /// Parses a constraint string.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` when a clause is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let clauses = input
            .split(',')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(Clause::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { raw: input.to_string(), clauses })
    }

    /// The constraint as written in the configuration.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether `candidate` satisfies every clause.
    #[must_use]
    pub fn is_satisfied_by(&self, candidate: &semver::Version) -> bool {
        self.clauses.iter().all(|clause| clause.admits(candidate))
    }
}

impl Clause {
    fn parse(clause: &str) -> Result<Self> {
        let (op, version_text) = OPERATORS
            .iter()
            .find_map(|(token, op)| clause.strip_prefix(token).map(|rest| (*op, rest)))
            .unwrap_or((ConstraintOp::Eq, clause));
        let (version, segments) = read_version(version_text.trim())?;
        Ok(Self { op, version, segments })
    }

    fn admits(&self, candidate: &semver::Version) -> bool {
        match self.op {
            ConstraintOp::Eq => candidate == &self.version,
            ConstraintOp::Neq => candidate != &self.version,
            ConstraintOp::Gt => candidate > &self.version,
            ConstraintOp::Gte => candidate >= &self.version,
            ConstraintOp::Lt => candidate < &self.version,
            ConstraintOp::Lte => candidate <= &self.version,
            ConstraintOp::Tilde => {
                candidate >= &self.version && candidate < &self.tilde_ceiling()
            }
        }
    }

    /// The first version a `~>` clause no longer admits: the written
    /// version with its second-to-last segment bumped. `~> 1.2.3` stops
    /// at 1.3.0; `~> 1.2` and `~> 1` stop at 2.0.0.
    fn tilde_ceiling(&self) -> semver::Version {
        let v = &self.version;
        if self.segments >= 3 {
            semver::Version::new(v.major, v.minor + 1, 0)
        } else {
            semver::Version::new(v.major + 1, 0, 0)
        }
    }
}

/// Reads a version of up to three dot-separated numeric segments,
/// returning it alongside the number of segments written. Missing
/// segments default to zero; the final segment may carry a prerelease
/// tag (`1.0.0-rc1`); a leading `v` is tolerated.
fn read_version(text: &str) -> Result<(semver::Version, usize)> {
    let malformed = || TerrastackError::UnsupportedVersion {
        constraint: text.to_string(),
        version: "clause does not contain a version number".to_string(),
    };

    let digits = text.strip_prefix('v').unwrap_or(text);
    if digits.is_empty() {
        return Err(malformed());
    }
    let (core, tag) = match digits.split_once('-') {
        Some((core, tag)) => (core, Some(tag)),
        None => (digits, None),
    };

    let mut numbers = [0u64; 3];
    let mut segments = 0;
    for segment in core.split('.') {
        if segments == 3 {
            return Err(malformed());
        }
        numbers[segments] = segment.parse().map_err(|_| malformed())?;
        segments += 1;
    }

    let mut version = semver::Version::new(numbers[0], numbers[1], numbers[2]);
    if let Some(tag) = tag {
        version.pre = semver::Prerelease::new(tag).map_err(|_| malformed())?;
    }
    Ok((version, segments))
}

/// Check a `required_version` constraint against the running crate version.
///
/// # Errors
///
/// Returns `UnsupportedVersion` on mismatch or malformed constraint.
pub fn check_required_version(constraint: &str) -> Result<()> {
    let spec = VersionSpec::parse(constraint)?;
    let version = semver::Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|e| TerrastackError::internal(format!("bad crate version: {e}")))?;
    if spec.is_satisfied_by(&version) {
        Ok(())
    } else {
        Err(TerrastackError::UnsupportedVersion {
            constraint: constraint.to_string(),
            version: version.to_string(),
        })
    }
}
