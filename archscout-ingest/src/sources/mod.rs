//! Site-specific extraction rules.
//!
//! Rules are synchronous: `scraper` documents are not `Send` and must never be held across
//! an await. Anything that needs the network (the ArchDaily gallery sub-page) is returned as
//! a [`Gallery::Page`] for the parser to fetch and hand back.
use std::collections::BTreeSet;
use std::fmt::Debug;

use anyhow::Result;
use archscout_core::{ContentSegment, GalleryImage, RecordField, Source, Specs};
use url::Url;

mod archdaily;
mod gooood;
mod text;

pub use archdaily::Archdaily;
pub use gooood::Gooood;
pub use text::ContentFilter;

/// Where the gallery of a project comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Gallery {
    Images(Vec<GalleryImage>),
    /// Needs one more request, see [`SourceRules::gallery_page_images`]
    Page(Url),
}

/// Values extracted from raw content.
///
/// `None` means the field was not requested or its extractor failed; either way the parser
/// leaves the record untouched for that field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub main_content: Option<Vec<ContentSegment>>,
    pub gallery: Option<Gallery>,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub specs: Option<Specs>,
}

pub trait SourceRules: Send + Sync + Debug {
    fn source(&self) -> Source;

    /// Extracts the `wanted` fields from raw content
    ///
    /// # Errors
    ///
    /// Errors only if the raw content as a whole is unusable. A single field that cannot be
    /// found is `None` in the extraction instead.
    fn extract(&self, raw: &str, wanted: &[RecordField]) -> Result<Extraction>;

    /// Reads the image list of a gallery sub-page
    ///
    /// # Errors
    ///
    /// Errors if the page carries an image list that cannot be decoded.
    fn gallery_page_images(&self, html: &str) -> Result<Vec<GalleryImage>>;
}

/// Builds the rules for a source from the configured site root and ignore list
///
/// # Errors
///
/// Errors if the base url is invalid.
pub fn rules_for(
    source: Source,
    base_url: &str,
    ignore_keywords: &BTreeSet<String>,
) -> Result<Box<dyn SourceRules>> {
    Ok(match source {
        Source::Archdaily => Box::new(Archdaily::try_new(base_url, ignore_keywords.clone())?),
        Source::Gooood => Box::new(Gooood::try_new(ignore_keywords.clone())?),
    })
}

fn parse_selector(css: &'static str) -> Result<scraper::Selector> {
    scraper::Selector::parse(css).map_err(|err| anyhow::anyhow!("Invalid selector {css}: {err}"))
}
