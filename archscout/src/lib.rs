//! Scrape architecture projects, parse them into records, embed their text and generate design
//! proposals grounded in similar projects.
//!
//! The pipeline runs in stages over a work queue of project ids:
//!
//! - scan the project folders (or an id range) to fill the queue
//! - fetch raw pages, parse them into `content.json` records, download galleries
//! - upload records to MongoDB, chunk and embed their text
//! - retrieve similar projects and generate a proposal for a requirement
//!
//! Every stage runs as a cancellable background task owned by an [`AppContext`].
//!
//! # Example
//!
//! ```no_run
//! # use archscout::{AppContext, Settings, Source};
//! # use archscout::ingest::ScanMode;
//! # async fn run() -> anyhow::Result<()> {
//! archscout::init_tracing()?;
//! let app = AppContext::new(Settings::load("settings.json")?).await?;
//!
//! app.run_scan(Source::Archdaily, ScanMode::IdRange { start: 1, end: 1000 })?
//!     .wait()
//!     .await;
//! app.run_fetch()?.wait().await;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod app;
mod telemetry;

pub use app::{AppContext, EmbedBackend, Stores};
pub use telemetry::init_tracing;

#[doc(inline)]
pub use archscout_core::*;

/// Pipeline stages, from fetching pages to embedding records
pub mod ingest {
    #[doc(inline)]
    pub use archscout_ingest::*;
}

/// MongoDB stores and the OpenAI compatible model client
pub mod integrations {
    #[doc(inline)]
    pub use archscout_integrations::*;
}

/// Retrieve similar projects and turn requirements into proposals
pub mod query {
    #[doc(inline)]
    pub use archscout_query::*;
}
