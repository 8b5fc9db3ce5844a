//! Extraction rules for ArchDaily project pages
use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use archscout_core::{GalleryImage, RecordField, SPEC_KEYS, Source, Specs};
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use super::text::{ContentFilter, element_text};
use super::{Extraction, Gallery, SourceRules, parse_selector};

const MIN_PARAGRAPH_LEN: usize = 10;

#[derive(Debug)]
struct ArchdailySelectors {
    article: Selector,
    blocks: Selector,
    image: Selector,
    gallery_link: Selector,
    gallery_items: Selector,
    title: Selector,
    heading: Selector,
    tags_container: Selector,
    tag_button: Selector,
    spec_item: Selector,
    spec_key: Selector,
    spec_value: Selector,
}

impl ArchdailySelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            article: parse_selector("article")?,
            blocks: parse_selector("p, figure")?,
            image: parse_selector("img")?,
            gallery_link: parse_selector("ul.gallery-thumbs a.gallery-thumbs-link")?,
            gallery_items: parse_selector("div#gallery-items.afd-gal-items")?,
            title: parse_selector("header.article-header")?,
            heading: parse_selector("h1")?,
            tags_container: parse_selector("div.afd-tags__container")?,
            tag_button: parse_selector("a.afd-tags__btn")?,
            spec_item: parse_selector("li.afd-specs__item")?,
            spec_key: parse_selector("span.afd-specs__key")?,
            spec_value: parse_selector("span.afd-specs__value")?,
        })
    }
}

/// ArchDaily pages: `<article>` body, a gallery sub-page and `afd-*` widgets for tags and specs
#[derive(Debug)]
pub struct Archdaily {
    base_url: Url,
    ignore_keywords: BTreeSet<String>,
    selectors: ArchdailySelectors,
}

impl Archdaily {
    /// # Errors
    ///
    /// Errors if `base_url` is not a valid url.
    pub fn try_new(base_url: &str, ignore_keywords: BTreeSet<String>) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url).with_context(|| format!("Invalid base url {base_url}"))?,
            ignore_keywords,
            selectors: ArchdailySelectors::new()?,
        })
    }

    fn main_content(&self, document: &Html) -> Option<Vec<archscout_core::ContentSegment>> {
        let Some(article) = document.select(&self.selectors.article).next() else {
            tracing::warn!("No <article> found");
            return None;
        };

        let mut filter = ContentFilter::new(&self.ignore_keywords, MIN_PARAGRAPH_LEN);
        for block in article.select(&self.selectors.blocks) {
            filter.push_block(block, &self.selectors.image);
        }
        Some(filter.finish())
    }

    fn gallery(&self, document: &Html) -> Option<Gallery> {
        let Some(href) = document
            .select(&self.selectors.gallery_link)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            return Some(Gallery::Images(Vec::new()));
        };

        match self.base_url.join(href) {
            Ok(url) => Some(Gallery::Page(url)),
            Err(error) => {
                tracing::warn!(href, %error, "Gallery link is not a valid url");
                None
            }
        }
    }

    fn title(&self, document: &Html) -> Option<String> {
        let title = document
            .select(&self.selectors.title)
            .find_map(|header| header.select(&self.selectors.heading).next())
            .map(element_text);
        if title.is_none() {
            tracing::warn!("No article header title found");
        }
        title
    }

    fn tags(&self, document: &Html) -> Option<Vec<String>> {
        let Some(container) = document.select(&self.selectors.tags_container).next() else {
            tracing::warn!("No tags container found");
            return None;
        };

        let buttons: Vec<_> = container.select(&self.selectors.tag_button).collect();
        if buttons.is_empty() {
            tracing::warn!("Tags container has no tags");
            return None;
        }

        Some(
            buttons
                .into_iter()
                .map(element_text)
                .filter(|tag| !tag.is_empty())
                .collect(),
        )
    }

    fn specs(&self, document: &Html) -> Specs {
        let mut specs = Specs::default();
        for item in document.select(&self.selectors.spec_item) {
            let key = item.select(&self.selectors.spec_key).next();
            let value = item.select(&self.selectors.spec_value).next();
            let (Some(key), Some(value)) = (key, value) else {
                continue;
            };

            let key = element_text(key).to_lowercase();
            let value = element_text(value);
            for spec_key in SPEC_KEYS {
                if key.contains(spec_key) {
                    specs.set(spec_key, value.clone());
                }
            }
        }
        specs
    }
}

impl SourceRules for Archdaily {
    fn source(&self) -> Source {
        Source::Archdaily
    }

    fn extract(&self, raw: &str, wanted: &[RecordField]) -> Result<Extraction> {
        let document = Html::parse_document(raw);
        let mut extraction = Extraction::default();

        for field in wanted {
            match field {
                RecordField::MainContent => extraction.main_content = self.main_content(&document),
                RecordField::ImageGallery => extraction.gallery = self.gallery(&document),
                RecordField::Title => extraction.title = self.title(&document),
                RecordField::Tags => extraction.tags = self.tags(&document),
                RecordField::Specs => extraction.specs = Some(self.specs(&document)),
            }
        }

        Ok(extraction)
    }

    fn gallery_page_images(&self, html: &str) -> Result<Vec<GalleryImage>> {
        let document = Html::parse_document(html);
        let Some(data) = document
            .select(&self.selectors.gallery_items)
            .next()
            .and_then(|items| items.value().attr("data-images"))
        else {
            return Ok(Vec::new());
        };

        // Attribute values are already entity-decoded, the replace covers double-escaped pages
        let images: Vec<Map<String, Value>> = serde_json::from_str(&data.replace("&quot;", "\""))
            .context("Gallery data-images is not valid json")?;

        Ok(images
            .into_iter()
            .filter(|image| image.contains_key("url_large"))
            .map(GalleryImage::from_map)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscout_core::ContentSegment;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator as _;

    fn rules() -> Archdaily {
        let ignore = ["Projects".to_string(), "Images".to_string()].into();
        Archdaily::try_new("https://www.archdaily.com/", ignore).unwrap()
    }

    fn extract_all(html: &str) -> Extraction {
        let fields: Vec<_> = RecordField::iter().collect();
        rules().extract(html, &fields).unwrap()
    }

    const PAGE: &str = indoc! {r#"
        <html><body>
          <header class="article-header"><h1> Lake House / Studio North </h1></header>
          <ul class="gallery-thumbs"><li><a class="gallery-thumbs-link" href="/123/lake-house/456">1</a></li></ul>
          <article>
            <p>Projects</p>
            <p>Tiny</p>
            <p>The house sits on a rocky slope above the lake.</p>
            <figure><img alt="Facade" src="https://images.adsttc.com/facade.jpg"></figure>
            <figure><img src="https://images.adsttc.com/no-alt.jpg"></figure>
            <p>The house sits on a rocky slope above the lake.</p>
            <p>Timber cladding weathers to a silver grey over time.</p>
          </article>
          <div class="afd-tags__container">
            <a class="afd-tags__btn">Houses</a>
            <a class="afd-tags__btn"> Norway </a>
          </div>
          <ul>
            <li class="afd-specs__item"><span class="afd-specs__key">Architects</span><span class="afd-specs__value">Studio North</span></li>
            <li class="afd-specs__item"><span class="afd-specs__key">Area Area of this architecture project</span><span class="afd-specs__value">120 m²</span></li>
            <li class="afd-specs__item"><span class="afd-specs__key">Year Completion year</span><span class="afd-specs__value">2021</span></li>
            <li class="afd-specs__item"><span class="afd-specs__key">Manufacturers</span><span class="afd-specs__value">Velux</span></li>
          </ul>
        </body></html>
    "#};

    #[test]
    fn test_extracts_all_fields() {
        let extraction = extract_all(PAGE);

        assert_eq!(
            extraction.main_content.unwrap(),
            vec![
                ContentSegment::text("The house sits on a rocky slope above the lake."),
                ContentSegment::image("Facade", "https://images.adsttc.com/facade.jpg"),
                ContentSegment::text("Timber cladding weathers to a silver grey over time."),
            ]
        );
        assert_eq!(
            extraction.gallery,
            Some(Gallery::Page(
                Url::parse("https://www.archdaily.com/123/lake-house/456").unwrap()
            ))
        );
        assert_eq!(extraction.title.as_deref(), Some("Lake House / Studio North"));
        assert_eq!(
            extraction.tags.unwrap(),
            vec!["Houses".to_string(), "Norway".to_string()]
        );

        let specs = extraction.specs.unwrap();
        assert_eq!(specs.architects.as_deref(), Some("Studio North"));
        assert_eq!(specs.area.as_deref(), Some("120 m²"));
        assert_eq!(specs.year.as_deref(), Some("2021"));
        assert_eq!(specs.city, None);
    }

    #[test]
    fn test_short_and_duplicate_paragraphs_are_dropped() {
        let html = indoc! {r"
            <article>
              <p>short</p>
              <p>A unique paragraph of thirty.</p>
              <p>A unique paragraph of thirty.</p>
            </article>
        "};

        let content = extract_all(html).main_content.unwrap();
        assert_eq!(content, vec![ContentSegment::text("A unique paragraph of thirty.")]);
    }

    #[test]
    fn test_missing_parts_fail_their_field_only() {
        let extraction = extract_all("<html><body><p>Nothing useful on this page</p></body></html>");

        assert_eq!(extraction.main_content, None);
        assert_eq!(extraction.title, None);
        assert_eq!(extraction.tags, None);
        assert_eq!(extraction.gallery, Some(Gallery::Images(Vec::new())));
        assert_eq!(extraction.specs, Some(Specs::default()));
    }

    #[test]
    fn test_empty_tag_container_is_a_failure() {
        let html = r#"<div class="afd-tags__container"></div>"#;
        assert_eq!(
            rules().extract(html, &[RecordField::Tags]).unwrap().tags,
            None
        );
    }

    #[test]
    fn test_only_wanted_fields_are_extracted() {
        let extraction = rules().extract(PAGE, &[RecordField::Title]).unwrap();

        assert!(extraction.title.is_some());
        assert_eq!(extraction.main_content, None);
        assert_eq!(extraction.gallery, None);
    }

    #[test]
    fn test_gallery_page_images() {
        let html = r#"<div id="gallery-items" class="afd-gal-items" data-images="[{&quot;url_large&quot;:&quot;https://img/1.jpg&quot;,&quot;url_medium&quot;:&quot;https://img/1m.jpg&quot;},{&quot;url_medium&quot;:&quot;https://img/2m.jpg&quot;}]"></div>"#;

        let images = rules().gallery_page_images(html).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url("large"), Some("https://img/1.jpg"));
        assert_eq!(images[0].url("medium"), Some("https://img/1m.jpg"));
    }

    #[test]
    fn test_gallery_page_without_items_is_empty() {
        assert!(rules().gallery_page_images("<html></html>").unwrap().is_empty());
    }
}
