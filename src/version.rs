//! Version Resolution - Build Identity from Version Control
//!
//! The resolved `BuildContext` is created once per build and passed by
//! reference to every stage that stamps output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::compiler::CompileError;
use crate::config::BuildConfig;
use crate::process::Cmd;

const GIT_FAILURE: &str = "Can't run git log. You must ensure to run compile from a git repository clone and that the git binary is available.";

/// Resolved version identity of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Exact tag at HEAD, or the commit hash.
    pub version: String,
    /// May be empty.
    pub branch_alias_version: String,
    pub version_date: DateTime<Utc>,
}

impl BuildContext {
    pub fn new(
        version: impl Into<String>,
        branch_alias_version: impl Into<String>,
        version_date: DateTime<Utc>,
    ) -> Self {
        Self {
            version: version.into(),
            branch_alias_version: branch_alias_version.into(),
            version_date,
        }
    }

    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn release_date(&self) -> String {
        self.version_date.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// True when the version is a commit hash rather than a tag.
    pub fn is_dev_build(&self) -> bool {
        !self.version.is_empty()
            && self
                .version
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// Epoch seconds after which a dev build is considered stale.
    pub fn dev_warning_time(&self, days: i64) -> i64 {
        self.version_date.timestamp() + days * 86400
    }
}

/// Queries the build needs from version control.
pub trait VersionControl {
    /// Full hash of the checked-out commit.
    fn head_commit(&self) -> Result<String, CompileError>;
    /// Committer date of HEAD as `YYYY-MM-DD HH:MM:SS +HHMM`.
    fn head_commit_date(&self) -> Result<String, CompileError>;
    /// Tag pointing exactly at HEAD, if any.
    fn exact_tag(&self) -> Option<String>;
}

/// `git` binary run from the project root.
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self { repo_dir: repo_dir.into() }
    }

    fn git(&self, args: &[&str]) -> Result<String, CompileError> {
        let output = Cmd::new("git")
            .args(args)
            .dir(&self.repo_dir)
            .run()
            .map_err(|e| CompileError::VersionControl(format!("{} ({})", GIT_FAILURE, e)))?;

        if !output.success() {
            return Err(CompileError::VersionControl(format!(
                "{} (exit code {}: {})",
                GIT_FAILURE,
                output.code(),
                output.stderr_trimmed()
            )));
        }
        Ok(output.stdout_trimmed().to_string())
    }
}

impl VersionControl for GitCli {
    fn head_commit(&self) -> Result<String, CompileError> {
        self.git(&["log", "--pretty=%H", "-n1", "HEAD"])
    }

    fn head_commit_date(&self) -> Result<String, CompileError> {
        self.git(&["log", "-n1", "--pretty=%ci", "HEAD"])
    }

    fn exact_tag(&self) -> Option<String> {
        self.git(&["describe", "--tags", "--exact-match", "HEAD"])
            .ok()
            .filter(|tag| !tag.is_empty())
    }
}

/// Parse git's `%ci` format and convert to UTC.
pub fn parse_commit_date(raw: &str) -> Result<DateTime<Utc>, CompileError> {
    DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S %z")
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CompileError::VersionControl(format!("Invalid commit date '{}': {}", raw, e)))
}

/// Read `extra.branch-alias.<key>` from the project's composer.json.
///
/// A missing file or key yields an empty alias.
pub fn read_branch_alias(composer_json: &Path, key: &str) -> Result<String, CompileError> {
    if !composer_json.is_file() {
        debug!(path = %composer_json.display(), "no composer.json, branch alias left empty");
        return Ok(String::new());
    }

    let content = fs::read_to_string(composer_json).map_err(|source| CompileError::Io {
        path: composer_json.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| CompileError::Config(format!("{}: {}", composer_json.display(), e)))?;

    Ok(value
        .pointer(&format!("/extra/branch-alias/{}", escape_pointer(key)))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string())
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Resolve the build identity for the checkout at `project_root`.
pub fn resolve(
    vcs: &dyn VersionControl,
    project_root: &Path,
    config: &BuildConfig,
) -> Result<BuildContext, CompileError> {
    let mut version = vcs.head_commit()?;
    let version_date = parse_commit_date(&vcs.head_commit_date()?)?;
    let mut branch_alias_version = String::new();

    match vcs.exact_tag() {
        Some(tag) => version = tag,
        None => {
            branch_alias_version = read_branch_alias(
                &project_root.join(&config.composer_json),
                &config.branch_alias_key,
            )?;
        }
    }

    info!(
        version = %version,
        branch_alias = %branch_alias_version,
        date = %version_date,
        "resolved build version"
    );

    Ok(BuildContext {
        version,
        branch_alias_version,
        version_date,
    })
}
