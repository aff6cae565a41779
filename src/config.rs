//! Build Configuration - Project Layout Contract
//!
//! Every field defaults to the layout of a Composer checkout, so an empty
//! JSON object is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::compiler::CompileError;
use crate::hashing::SignatureAlgorithm;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Internal alias the archive registers itself under.
    #[serde(default = "default_alias")]
    pub alias: String,
    #[serde(default)]
    pub signature: SignatureAlgorithm,
    /// Project file holding the branch alias, relative to the project root.
    #[serde(default = "default_composer_json")]
    pub composer_json: String,
    /// Key under `extra.branch-alias` used when HEAD carries no tag.
    #[serde(default = "default_branch_alias_key")]
    pub branch_alias_key: String,
    #[serde(default)]
    pub sources: SourceSet,
    #[serde(default)]
    pub resources: ResourceSet,
    #[serde(default)]
    pub vendor: VendorSet,
    /// Individually named files embedded verbatim, in order.
    #[serde(default = "default_extra_files")]
    pub extra_files: Vec<String>,
    /// Source file whose version placeholders are substituted.
    #[serde(default = "default_versioned_file")]
    pub versioned_file: String,
    /// Executable entry-point script.
    #[serde(default = "default_bin_script")]
    pub bin_script: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default)]
    pub stub: StubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSet {
    #[serde(default = "default_source_dirs")]
    pub dirs: Vec<String>,
    #[serde(default = "default_source_extensions")]
    pub extensions: Vec<String>,
    /// File names never embedded, wherever they appear.
    #[serde(default = "default_source_excludes")]
    pub exclude_names: Vec<String>,
    /// Relative paths embedded without stripping.
    #[serde(default)]
    pub keep_comments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSet {
    #[serde(default = "default_resource_dirs")]
    pub dirs: Vec<String>,
    #[serde(default = "default_resource_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSet {
    #[serde(default = "default_vendor_roots")]
    pub roots: Vec<String>,
    #[serde(default = "default_vendor_extensions")]
    pub extensions: Vec<String>,
    /// Exact file names included regardless of extension.
    #[serde(default = "default_vendor_names")]
    pub include_names: Vec<String>,
    #[serde(default = "default_vendor_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubConfig {
    /// Lines of the copyright block, without comment markers.
    #[serde(default = "default_banner")]
    pub banner: Vec<String>,
    #[serde(default = "default_warning_constant")]
    pub dev_warning_constant: String,
    #[serde(default = "default_warning_days")]
    pub dev_warning_days: i64,
}

fn default_alias() -> String { "composer.phar".to_string() }
fn default_composer_json() -> String { "composer.json".to_string() }
fn default_branch_alias_key() -> String { "dev-master".to_string() }
fn default_versioned_file() -> String { "src/Composer/Composer.php".to_string() }
fn default_bin_script() -> String { "bin/composer".to_string() }
fn default_license() -> String { "LICENSE".to_string() }

fn default_source_dirs() -> Vec<String> { strings(&["src"]) }
fn default_source_extensions() -> Vec<String> { strings(&["php"]) }
fn default_source_excludes() -> Vec<String> { strings(&["Compiler.php"]) }

fn default_resource_dirs() -> Vec<String> {
    strings(&["res", "vendor/composer/spdx-licenses/res"])
}
fn default_resource_extensions() -> Vec<String> { strings(&["json"]) }

fn default_vendor_roots() -> Vec<String> {
    strings(&[
        "vendor/symfony",
        "vendor/seld/jsonlint",
        "vendor/seld/cli-prompt",
        "vendor/justinrainbow/json-schema",
        "vendor/composer/spdx-licenses",
        "vendor/composer/semver",
        "vendor/composer/ca-bundle",
        "vendor/psr",
    ])
}
fn default_vendor_extensions() -> Vec<String> { strings(&["php"]) }
fn default_vendor_names() -> Vec<String> { strings(&["LICENSE"]) }
fn default_vendor_exclude_dirs() -> Vec<String> { strings(&["Tests", "tests", "docs"]) }

fn default_extra_files() -> Vec<String> {
    strings(&[
        "vendor/autoload.php",
        "vendor/composer/autoload_namespaces.php",
        "vendor/composer/autoload_psr4.php",
        "vendor/composer/autoload_classmap.php",
        "vendor/composer/autoload_files.php",
        "vendor/composer/autoload_real.php",
        "vendor/composer/autoload_static.php",
        "vendor/composer/ClassLoader.php",
        "vendor/composer/ca-bundle/res/cacert.pem",
        "vendor/symfony/console/Resources/bin/hiddeninput.exe",
    ])
}

fn default_banner() -> Vec<String> {
    strings(&[
        "This file is part of Composer.",
        "",
        "(c) Nils Adermann <naderman@naderman.de>",
        "    Jordi Boggiano <j.boggiano@seld.be>",
        "",
        "For the full copyright and license information, please view",
        "the license that is distributed with this source code.",
    ])
}
fn default_warning_constant() -> String { "COMPOSER_DEV_WARNING_TIME".to_string() }
fn default_warning_days() -> i64 { 60 }

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SourceSet {
    fn default() -> Self {
        Self {
            dirs: default_source_dirs(),
            extensions: default_source_extensions(),
            exclude_names: default_source_excludes(),
            keep_comments: vec![],
        }
    }
}

impl Default for ResourceSet {
    fn default() -> Self {
        Self {
            dirs: default_resource_dirs(),
            extensions: default_resource_extensions(),
        }
    }
}

impl Default for VendorSet {
    fn default() -> Self {
        Self {
            roots: default_vendor_roots(),
            extensions: default_vendor_extensions(),
            include_names: default_vendor_names(),
            exclude_dirs: default_vendor_exclude_dirs(),
        }
    }
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            banner: default_banner(),
            dev_warning_constant: default_warning_constant(),
            dev_warning_days: default_warning_days(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            alias: default_alias(),
            signature: SignatureAlgorithm::default(),
            composer_json: default_composer_json(),
            branch_alias_key: default_branch_alias_key(),
            sources: SourceSet::default(),
            resources: ResourceSet::default(),
            vendor: VendorSet::default(),
            extra_files: default_extra_files(),
            versioned_file: default_versioned_file(),
            bin_script: default_bin_script(),
            license: default_license(),
            stub: StubConfig::default(),
        }
    }
}

impl BuildConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, CompileError> {
        let content = fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| CompileError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Path of the entry-point script inside the archive.
    pub fn bin_entry(&self) -> String {
        self.bin_script.replace('\\', "/")
    }
}
