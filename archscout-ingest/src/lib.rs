//! Pipeline stages that move a project from a web page to stored embeddings.
//!
//! Every stage works on one project at a time and is driven over many projects by
//! [`workers::for_each_project`]. Stages never fail a whole batch for a single project: problems
//! are logged and the project lands in the failure bucket of the task context.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod download;
pub mod embed;
pub mod fetch;
pub mod gooood;
pub mod http;
pub mod parse;
pub mod persist;
pub mod scan;
pub mod sources;
pub mod upload;
pub mod workers;

pub use download::{DownloadReport, ImageDownloader};
pub use embed::{Chunker, LocalEmbedder, RemoteEmbedder, repair_nan_embeddings};
pub use fetch::Fetcher;
pub use gooood::{GoooodCrawler, PageRange};
pub use parse::Parser;
pub use scan::{ScanMode, ScanResult, Scanner, scan_embedding_candidates};
pub use upload::Uploader;
pub use workers::{RunSummary, for_each_project};
