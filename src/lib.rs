//! Phar Compiler - Reproducible PHP Archive Builder
//!
//! # Guarantees
//! 1. Same Commit, Same Bytes
//! 2. Listing Order Comes From Paths, Never From the Filesystem
//! 3. Stripping Never Moves a Line
//! 4. Version Identity Comes From Version Control
//! 5. The License Is Flushed Last

pub mod collect;
pub mod compiler;
pub mod config;
pub mod hashing;
pub mod lexer;
pub mod phar;
pub mod process;
pub mod stub;
pub mod timestamps;
pub mod transform;
pub mod version;

pub use compiler::{BuildReport, CompileError, Compiler};
pub use config::BuildConfig;
pub use hashing::SignatureAlgorithm;
pub use lexer::{Lexer, PhpLexer};
pub use phar::{ArchiveState, PharArchive, PharBuilder, PharError};
pub use version::{BuildContext, GitCli, VersionControl};

pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");
