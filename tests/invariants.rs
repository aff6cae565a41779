//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use phar_compiler::{
    BuildConfig, CompileError, Compiler, PharArchive, SignatureAlgorithm, VersionControl,
};

const COMPOSER_PHP: &str = "<?php

/*
 * This file is part of Composer.
 */

namespace Composer;

/**
 * @author Jordi Boggiano <j.boggiano@seld.be>
 */
class Composer
{
    const VERSION = '@package_version@';
    const BRANCH_ALIAS_VERSION = '@package_branch_alias_version@';
    const RELEASE_DATE = '@release_date@';

    // keep the line numbers
    public function getVersion()
    {
        return self::VERSION;   /* trailing */
    }
}
";

const HELPER_PHP: &str = "<?php\r\n/** doc */\r\nfunction helper()\r\n{\r\n\t\treturn 'a  // b';\r\n}\r\n";

const DEFAULT_EXTRA_FILES: &[&str] = &[
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
];

struct FakeVcs {
    commit: String,
    date: String,
    tag: Option<String>,
}

impl FakeVcs {
    fn untagged(commit: &str) -> Box<Self> {
        Box::new(Self {
            commit: commit.to_string(),
            date: "2024-01-02 03:04:05 +0100".to_string(),
            tag: None,
        })
    }

    fn tagged(commit: &str, tag: &str) -> Box<Self> {
        let mut vcs = Self::untagged(commit);
        vcs.tag = Some(tag.to_string());
        vcs
    }
}

impl VersionControl for FakeVcs {
    fn head_commit(&self) -> Result<String, CompileError> {
        Ok(self.commit.clone())
    }
    fn head_commit_date(&self) -> Result<String, CompileError> {
        Ok(self.date.clone())
    }
    fn exact_tag(&self) -> Option<String> {
        self.tag.clone()
    }
}

struct BrokenVcs;

impl VersionControl for BrokenVcs {
    fn head_commit(&self) -> Result<String, CompileError> {
        Err(CompileError::VersionControl("git exited with 128".to_string()))
    }
    fn head_commit_date(&self) -> Result<String, CompileError> {
        Err(CompileError::VersionControl("git exited with 128".to_string()))
    }
    fn exact_tag(&self) -> Option<String> {
        None
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn create_project(root: &Path) {
    write(root, "composer.json", r#"{"extra": {"branch-alias": {"dev-master": "2.0-dev"}}}"#);
    write(root, "src/Composer/Composer.php", COMPOSER_PHP);
    write(root, "src/Composer/Util/Helper.php", HELPER_PHP);
    write(root, "src/Composer/Compiler.php", "<?php class Compiler {}");
    write(root, "res/composer-schema.json", "{\"type\": \"object\"}");
    write(root, "vendor/composer/spdx-licenses/res/spdx-licenses.json", "{}");
    write(root, "vendor/psr/log/LICENSE", "Copyright (c) PHP Framework Interoperability Group");
    write(root, "vendor/psr/log/Psr/Log/LoggerInterface.php", "<?php\n/** keep */\ninterface LoggerInterface {}\n");
    write(root, "vendor/psr/log/Psr/Log/tests/LoggerTest.php", "<?php");
    for rel in DEFAULT_EXTRA_FILES {
        write(root, rel, &format!("<?php // {}\n", rel));
    }
    write(root, "bin/composer", "#!/usr/bin/env php\n<?php\nrequire __DIR__.'/../src/bootstrap.php';\n");
    write(root, "LICENSE", "Copyright (c) Nils Adermann, Jordi Boggiano");
}

fn create_compiler(root: &Path, vcs: Box<dyn VersionControl>) -> Compiler {
    Compiler::new(root, BuildConfig::default()).with_version_control(vcs)
}

fn entry_text(archive: &PharArchive, name: &str) -> String {
    let entry = archive.entry(name).unwrap_or_else(|| panic!("missing entry {}", name));
    String::from_utf8(entry.content.clone()).unwrap()
}

fn commit_epoch() -> i64 {
    DateTime::parse_from_str("2024-01-02 03:04:05 +0100", "%Y-%m-%d %H:%M:%S %z")
        .unwrap()
        .timestamp()
}

#[test]
fn invariant_same_commit_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out1 = dir.path().join("one.phar");
    let out2 = dir.path().join("two.phar");

    let report1 = create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out1).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let report2 = create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out2).unwrap();

    assert_eq!(fs::read(&out1).unwrap(), fs::read(&out2).unwrap());
    assert_eq!(report1.sha256, report2.sha256);
}

#[test]
fn invariant_tagged_build_has_no_warning_time() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    let report = create_compiler(dir.path(), FakeVcs::tagged("abcdef0", "v1.2.3")).compile(&out).unwrap();
    assert_eq!(report.version, "v1.2.3");
    assert_eq!(report.branch_alias_version, "");
    assert!(!report.dev_build);

    let archive = PharArchive::open(&out).unwrap();
    let stub = String::from_utf8(archive.stub.clone()).unwrap();
    assert!(!stub.contains("COMPOSER_DEV_WARNING_TIME"));
    assert!(entry_text(&archive, "src/Composer/Composer.php").contains("VERSION = 'v1.2.3'"));
}

#[test]
fn invariant_dev_build_warns_after_sixty_days() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    let report = create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    assert_eq!(report.version, "abcdef0");
    assert_eq!(report.branch_alias_version, "2.0-dev");
    assert!(report.dev_build);

    let archive = PharArchive::open(&out).unwrap();
    let stub = String::from_utf8(archive.stub.clone()).unwrap();
    let expected = format!("define('COMPOSER_DEV_WARNING_TIME', {});", commit_epoch() + 5_184_000);
    assert!(stub.contains(&expected), "stub was:\n{}", stub);
    assert!(stub.starts_with("#!/usr/bin/env php\n"));
    assert!(stub.ends_with("__HALT_COMPILER(); ?>\r\n"));
}

#[test]
fn invariant_placeholders_replaced() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    let archive = PharArchive::open(&out).unwrap();
    let composer = entry_text(&archive, "src/Composer/Composer.php");

    assert!(!composer.contains("@package_version@"));
    assert!(!composer.contains("@package_branch_alias_version@"));
    assert!(!composer.contains("@release_date@"));
    assert!(composer.contains("RELEASE_DATE = '2024-01-02 02:04:05'"));
    assert!(composer.contains("BRANCH_ALIAS_VERSION = '2.0-dev'"));
}

#[test]
fn invariant_stripping_keeps_line_numbers() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    let archive = PharArchive::open(&out).unwrap();

    let composer = entry_text(&archive, "src/Composer/Composer.php");
    assert_eq!(composer.lines().count(), COMPOSER_PHP.lines().count());
    assert!(!composer.contains("keep the line numbers"));
    assert!(!composer.contains("@author"));
    assert!(!composer.contains("trailing"));

    let helper = entry_text(&archive, "src/Composer/Util/Helper.php");
    assert_eq!(helper, "<?php\r\n\nfunction helper()\n{\nreturn 'a  // b';\n}\n");

    // Third-party code is embedded as-is.
    let logger = entry_text(&archive, "vendor/psr/log/Psr/Log/LoggerInterface.php");
    assert!(logger.contains("/** keep */"));
}

#[test]
fn invariant_listing_order_and_layout() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    let archive = PharArchive::open(&out).unwrap();
    let names: Vec<_> = archive.entries.iter().map(|e| e.name.as_str()).collect();

    let mut expected = vec![
        "src/Composer/Composer.php",
        "src/Composer/Util/Helper.php",
        "res/composer-schema.json",
        "vendor/composer/spdx-licenses/res/spdx-licenses.json",
        "vendor/psr/log/LICENSE",
        "vendor/psr/log/Psr/Log/LoggerInterface.php",
    ];
    expected.extend(DEFAULT_EXTRA_FILES);
    expected.push("bin/composer");
    expected.push("LICENSE");
    assert_eq!(names, expected);

    assert!(!names.contains(&"src/Composer/Compiler.php"));
    assert_eq!(
        entry_text(&archive, "bin/composer"),
        "<?php\nrequire __DIR__.'/../src/bootstrap.php';\n"
    );
    assert_eq!(
        entry_text(&archive, "LICENSE"),
        "\nCopyright (c) Nils Adermann, Jordi Boggiano\n"
    );
    assert!(entry_text(&archive, "vendor/psr/log/LICENSE").starts_with('\n'));
}

#[test]
fn invariant_archive_is_normalized_and_signed() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    let report = create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    let archive = PharArchive::open(&out).unwrap();

    assert_eq!(archive.alias, "composer.phar");
    assert_eq!(archive.signature, SignatureAlgorithm::Sha1);
    assert!(archive.signature_valid);
    assert!(archive.entries.iter().all(|e| e.timestamp as i64 == commit_epoch()));
    assert_eq!(report.entries, archive.entries.len());
}

#[test]
fn invariant_existing_output_replaced() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");
    fs::write(&out, "stale bytes from an older build").unwrap();

    create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap();
    let bytes = fs::read(&out).unwrap();
    assert!(!bytes.starts_with(b"stale"));
    assert!(PharArchive::parse(&bytes).unwrap().signature_valid);
}

#[test]
fn invariant_vcs_failure_aborts_build() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    let err = create_compiler(dir.path(), Box::new(BrokenVcs)).compile(&out).unwrap_err();
    assert!(matches!(err, CompileError::VersionControl(_)));
    assert!(!out.exists());
}

#[test]
fn invariant_missing_named_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    fs::remove_file(dir.path().join("vendor/composer/ca-bundle/res/cacert.pem")).unwrap();
    let out = dir.path().join("composer.phar");

    let err = create_compiler(dir.path(), FakeVcs::untagged("abcdef0")).compile(&out).unwrap_err();
    assert!(err.to_string().contains("cacert.pem"));
}

#[test]
fn invariant_stripping_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    create_compiler(dir.path(), FakeVcs::untagged("abcdef0"))
        .with_lexer(None)
        .compile(&out)
        .unwrap();
    let archive = PharArchive::open(&out).unwrap();
    assert_eq!(entry_text(&archive, "src/Composer/Util/Helper.php"), HELPER_PHP);
}

#[test]
fn invariant_keep_comments_embeds_listed_sources_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    let out = dir.path().join("composer.phar");

    let mut config = BuildConfig::default();
    config.sources.keep_comments = vec!["src/Composer/Util/Helper.php".to_string()];
    Compiler::new(dir.path(), config)
        .with_version_control(FakeVcs::untagged("abcdef0"))
        .compile(&out)
        .unwrap();
    let archive = PharArchive::open(&out).unwrap();

    assert_eq!(entry_text(&archive, "src/Composer/Util/Helper.php"), HELPER_PHP);
    let composer = entry_text(&archive, "src/Composer/Composer.php");
    assert!(!composer.contains("keep the line numbers"));
    assert!(!composer.contains("@author"));
}

#[test]
fn invariant_configured_license_is_wrapped_whatever_its_name() {
    let dir = tempfile::tempdir().unwrap();
    create_project(dir.path());
    fs::remove_file(dir.path().join("LICENSE")).unwrap();
    write(dir.path(), "LICENSE.md", "# MIT License");
    let out = dir.path().join("composer.phar");

    let mut config = BuildConfig::default();
    config.license = "LICENSE.md".to_string();
    Compiler::new(dir.path(), config)
        .with_version_control(FakeVcs::untagged("abcdef0"))
        .compile(&out)
        .unwrap();
    let archive = PharArchive::open(&out).unwrap();

    assert_eq!(entry_text(&archive, "LICENSE.md"), "\n# MIT License\n");
    assert_eq!(archive.entries.last().unwrap().name, "LICENSE.md");
    assert!(archive.entry("LICENSE").is_none());
}

#[test]
fn invariant_real_git_checkout() {
    use std::process::Command;

    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("git not available, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    create_project(root);

    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(["-c", "user.name=Build", "-c", "user.email=build@example.com"])
            .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
            .args(args)
            .current_dir(root)
            .env("GIT_AUTHOR_DATE", "2024-01-02T03:04:05+01:00")
            .env("GIT_COMMITTER_DATE", "2024-01-02T03:04:05+01:00")
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    };
    git(&["init", "-q"]);
    git(&["add", "-A"]);
    git(&["commit", "-q", "-m", "initial"]);

    let out = root.join("dev.phar");
    let report = Compiler::new(root, BuildConfig::default()).compile(&out).unwrap();
    assert_eq!(report.version.len(), 40);
    assert!(report.dev_build);
    assert_eq!(report.branch_alias_version, "2.0-dev");
    assert_eq!(report.version_date.timestamp(), commit_epoch());

    git(&["tag", "v1.2.3"]);
    let out = root.join("release.phar");
    let report = Compiler::new(root, BuildConfig::default()).compile(&out).unwrap();
    assert_eq!(report.version, "v1.2.3");
    assert!(!report.dev_build);
    assert_eq!(report.version_date, DateTime::<Utc>::from_timestamp(commit_epoch(), 0).unwrap());
}
