//! CLI command implementations.

pub mod download;
pub mod extract;
pub mod list;
pub mod validate;

pub use download::{download, DownloadArgs};
pub use extract::{extract, ExtractArgs};
pub use list::{list, ListArgs, ListKind};
pub use validate::{validate, ValidateArgs};
