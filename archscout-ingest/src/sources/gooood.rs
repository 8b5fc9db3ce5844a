//! Extraction rules for Gooood posts.
//!
//! Raw content is the WordPress post json saved by the page crawl. The article body is the
//! rendered html in `content.rendered`; gallery and specs are read from that same html.
use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use archscout_core::{ContentSegment, GalleryImage, RecordField, Source, Specs};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use super::text::ContentFilter;
use super::{Extraction, Gallery, SourceRules, parse_selector};

const MIN_PARAGRAPH_LEN: usize = 20;

/// `Key: Value` with ascii or full-width colon
const SPEC_LINE: &str = r"^\s*([^:：]{1,40}?)\s*[:：]\s*(.+?)\s*$";

/// Labels used on gooood for each fixed spec key, matched as substrings of the lowercased label
const SPEC_ALIASES: [(&str, &[&str]); 6] = [
    ("year", &["year", "建成", "完成时间", "完工", "年份"]),
    ("country", &["country", "国家"]),
    ("city", &["city", "location", "城市", "地点", "项目地址"]),
    ("area", &["area", "面积"]),
    ("architects", &["architect", "design", "设计"]),
    ("photographs", &["photo", "摄影"]),
];

#[derive(Debug)]
struct GoooodSelectors {
    blocks: Selector,
    image: Selector,
    paragraph: Selector,
    spec_line: Regex,
}

/// Gooood posts as returned by the `fetch-posts` api
#[derive(Debug)]
pub struct Gooood {
    ignore_keywords: BTreeSet<String>,
    selectors: GoooodSelectors,
}

impl Gooood {
    /// # Errors
    ///
    /// Errors if the built-in selectors or patterns fail to parse.
    pub fn try_new(ignore_keywords: BTreeSet<String>) -> Result<Self> {
        Ok(Self {
            ignore_keywords,
            selectors: GoooodSelectors {
                blocks: parse_selector("p, figure")?,
                image: parse_selector("img")?,
                paragraph: parse_selector("p")?,
                spec_line: Regex::new(SPEC_LINE)?,
            },
        })
    }

    fn main_content(&self, body: &Html) -> Vec<ContentSegment> {
        let mut filter = ContentFilter::new(&self.ignore_keywords, MIN_PARAGRAPH_LEN);
        for block in body.select(&self.selectors.blocks) {
            filter.push_block(block, &self.selectors.image);
        }
        filter.finish()
    }

    fn gallery(&self, body: &Html) -> Vec<GalleryImage> {
        body.select(&self.selectors.image)
            .filter_map(|img| {
                let value = img.value();
                value.attr("src").or_else(|| value.attr("data-src"))
            })
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .map(|src| GalleryImage::with_url("large", src))
            .collect()
    }

    fn specs(&self, body: &Html) -> Specs {
        let mut specs = Specs::default();
        let lines = body
            .select(&self.selectors.paragraph)
            .flat_map(|p| p.text().map(ToString::to_string).collect::<Vec<_>>());

        for line in lines {
            let Some(captures) = self.selectors.spec_line.captures(&line) else {
                continue;
            };
            let label = captures[1].to_lowercase();
            let value = &captures[2];

            for (key, aliases) in SPEC_ALIASES {
                if specs.get(key).is_none() && aliases.iter().any(|alias| label.contains(alias)) {
                    specs.set(key, value);
                    break;
                }
            }
        }
        specs
    }
}

/// Plain text of a rendered html snippet, entities decoded
fn html_to_text(rendered: &str) -> String {
    let fragment = Html::parse_fragment(rendered);
    fragment.root_element().text().collect::<String>().trim().to_string()
}

fn rendered<'a>(post: &'a Value, key: &str) -> Option<&'a str> {
    match post.get(key)? {
        Value::String(plain) => Some(plain),
        Value::Object(object) => object.get("rendered").and_then(Value::as_str),
        _ => None,
    }
}

fn tags(post: &Value) -> Option<Vec<String>> {
    let Some(Value::Array(items)) = post.get("tags") else {
        tracing::warn!("Post has no tags array");
        return None;
    };

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.trim().to_string()),
                Value::Object(object) => object
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|name| name.trim().to_string()),
                _ => None,
            })
            .filter(|name| !name.is_empty())
            .collect(),
    )
}

impl SourceRules for Gooood {
    fn source(&self) -> Source {
        Source::Gooood
    }

    fn extract(&self, raw: &str, wanted: &[RecordField]) -> Result<Extraction> {
        let post: Value = serde_json::from_str(raw).context("Gooood post is not valid json")?;
        let body = rendered(&post, "content").map(Html::parse_fragment);
        if body.is_none() {
            tracing::warn!("Post has no rendered content");
        }

        let mut extraction = Extraction::default();
        for field in wanted {
            match field {
                RecordField::MainContent => {
                    extraction.main_content = body.as_ref().map(|body| self.main_content(body));
                }
                RecordField::ImageGallery => {
                    extraction.gallery = body
                        .as_ref()
                        .map(|body| Gallery::Images(self.gallery(body)));
                }
                RecordField::Title => {
                    extraction.title = rendered(&post, "title")
                        .map(html_to_text)
                        .filter(|title| !title.is_empty());
                }
                RecordField::Tags => extraction.tags = tags(&post),
                RecordField::Specs => {
                    extraction.specs = body.as_ref().map(|body| self.specs(body));
                }
            }
        }

        Ok(extraction)
    }

    fn gallery_page_images(&self, _html: &str) -> Result<Vec<GalleryImage>> {
        Ok(Vec::new())
    }
}
