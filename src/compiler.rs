//! Compilation Pipeline - Single Entry Point
//!
//! `compile` is the only way an archive gets built: resolve the version,
//! collect, transform, assemble, then normalize for reproducibility.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::collect::{FileCollector, SourceFile};
use crate::config::BuildConfig;
use crate::hashing::{sha256_hex, SignatureAlgorithm};
use crate::lexer::{Lexer, PhpLexer};
use crate::phar::{ArchiveState, PharBuilder, PharError};
use crate::transform::{self, ContentTransformer};
use crate::version::{self, BuildContext, GitCli, VersionControl};
use crate::{stub, timestamps};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required file is missing: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk directory: {0}")]
    Walk(String),

    #[error("Archive error: {0}")]
    Archive(#[from] PharError),
}

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    pub version: String,
    pub branch_alias_version: String,
    pub version_date: DateTime<Utc>,
    pub release_date: String,
    pub dev_build: bool,
    pub entries: usize,
    pub signature: SignatureAlgorithm,
    pub sha256: String,
    pub state: ArchiveState,
}

/// The archive compiler - one instance per project checkout.
pub struct Compiler {
    project_root: PathBuf,
    config: BuildConfig,
    vcs: Box<dyn VersionControl>,
    transformer: ContentTransformer,
}

impl Compiler {
    pub fn new(project_root: impl Into<PathBuf>, config: BuildConfig) -> Self {
        let project_root = project_root.into();
        Self {
            vcs: Box::new(GitCli::new(project_root.clone())),
            transformer: ContentTransformer::new(Some(Box::new(PhpLexer))),
            project_root,
            config,
        }
    }

    /// Replace the version-control backend.
    pub fn with_version_control(mut self, vcs: Box<dyn VersionControl>) -> Self {
        self.vcs = vcs;
        self
    }

    /// Replace the source lexer; `None` disables stripping.
    pub fn with_lexer(mut self, lexer: Option<Box<dyn Lexer>>) -> Self {
        self.transformer = ContentTransformer::new(lexer);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the archive at `output`, replacing any existing file.
    pub fn compile(&self, output: &Path) -> Result<BuildReport, CompileError> {
        if output.exists() {
            info!(path = %output.display(), "removing existing archive");
            fs::remove_file(output).map_err(|source| CompileError::Io {
                path: output.to_path_buf(),
                source,
            })?;
        }

        let ctx = version::resolve(self.vcs.as_ref(), &self.project_root, &self.config)?;
        let collector = FileCollector::new(&self.project_root)?;

        let mut phar = PharBuilder::create(output, &self.config.alias, self.config.signature);
        phar.start_buffering()?;

        let sources = collector.sources(&self.config.sources)?;
        info!(count = sources.len(), "adding sources");
        for file in &sources {
            let strip = !self.config.sources.keep_comments.contains(&file.relative);
            self.add_file(&mut phar, file, strip, &ctx)?;
        }

        let resources = collector.resources(&self.config.resources)?;
        info!(count = resources.len(), "adding resources");
        for file in &resources {
            self.add_file(&mut phar, file, false, &ctx)?;
        }

        let vendor = collector.vendor(&self.config.vendor)?;
        info!(count = vendor.len(), "adding vendor files");
        for file in &vendor {
            self.add_file(&mut phar, file, false, &ctx)?;
        }

        for name in &self.config.extra_files {
            let file = collector.named(name)?;
            self.add_file(&mut phar, &file, false, &ctx)?;
        }

        self.add_bin(&mut phar, &collector)?;
        phar.set_stub(stub::generate(&self.config, &ctx))?;
        phar.stop_buffering()?;

        // Flushed on its own, after the buffered batch.
        self.add_license(&mut phar, &collector)?;

        let entries = phar.len();
        let path = phar.close()?;
        timestamps::resign(&path, ctx.version_date, self.config.signature)?;

        let bytes = fs::read(&path).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), entries, version = %ctx.version, "archive compiled");

        Ok(BuildReport {
            output: path,
            release_date: ctx.release_date(),
            dev_build: ctx.is_dev_build(),
            version: ctx.version,
            branch_alias_version: ctx.branch_alias_version,
            version_date: ctx.version_date,
            entries,
            signature: self.config.signature,
            sha256: sha256_hex(&bytes),
            state: ArchiveState::Resigned,
        })
    }

    fn add_file(
        &self,
        phar: &mut PharBuilder,
        file: &SourceFile,
        strip: bool,
        ctx: &BuildContext,
    ) -> Result<(), CompileError> {
        let raw = fs::read(&file.path).map_err(|source| CompileError::Io {
            path: file.path.clone(),
            source,
        })?;
        let mut content = self.transformer.prepare(file.file_name(), raw, strip);

        if file.relative == self.config.versioned_file {
            content = transform::substitute_version(&content, ctx);
        }

        debug!(entry = %file.relative, bytes = content.len(), strip, "adding file");
        phar.add_from_string(&file.relative, content)?;
        Ok(())
    }

    fn add_license(&self, phar: &mut PharBuilder, collector: &FileCollector) -> Result<(), CompileError> {
        let file = collector.named(&self.config.license)?;
        let raw = fs::read(&file.path).map_err(|source| CompileError::Io {
            path: file.path.clone(),
            source,
        })?;
        phar.add_from_string(&file.relative, transform::wrap_license(&raw))?;
        Ok(())
    }

    fn add_bin(&self, phar: &mut PharBuilder, collector: &FileCollector) -> Result<(), CompileError> {
        let file = collector.named(&self.config.bin_script)?;
        let raw = fs::read(&file.path).map_err(|source| CompileError::Io {
            path: file.path.clone(),
            source,
        })?;
        phar.add_from_string(&self.config.bin_entry(), transform::strip_shebang(&raw))?;
        Ok(())
    }
}
