use std::collections::{BTreeSet, HashSet};

use archscout_core::ContentSegment;
use scraper::ElementRef;

/// Decides which paragraphs and figures of an article become main content.
///
/// Paragraphs must be non-empty after trimming, longer than `min_len` characters, not seen
/// before in the same record and not site chrome from the ignore list. Figures need an `img`
/// with both alt text and a source.
#[derive(Debug)]
pub struct ContentFilter<'a> {
    ignore_keywords: &'a BTreeSet<String>,
    min_len: usize,
    seen: HashSet<String>,
    segments: Vec<ContentSegment>,
}

impl<'a> ContentFilter<'a> {
    pub fn new(ignore_keywords: &'a BTreeSet<String>, min_len: usize) -> Self {
        Self {
            ignore_keywords,
            min_len,
            seen: HashSet::new(),
            segments: Vec::new(),
        }
    }

    /// Returns true if the paragraph was kept
    pub fn push_paragraph(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty()
            || self.seen.contains(text)
            || self.ignore_keywords.contains(text)
            || text.chars().count() <= self.min_len
        {
            return false;
        }

        self.seen.insert(text.to_string());
        self.segments.push(ContentSegment::text(text));
        true
    }

    pub fn push_image(&mut self, alt: Option<&str>, src: Option<&str>) -> bool {
        let alt = alt.map(str::trim).unwrap_or_default();
        let src = src.map(str::trim).unwrap_or_default();
        if alt.is_empty() || src.is_empty() {
            return false;
        }

        self.segments.push(ContentSegment::image(alt, src));
        true
    }

    /// Walks `p` and `figure` blocks, both already selected in document order
    pub fn push_block(&mut self, block: ElementRef<'_>, image: &scraper::Selector) {
        match block.value().name() {
            "p" => {
                self.push_paragraph(&element_text(block));
            }
            "figure" => {
                if let Some(img) = block.select(image).next() {
                    self.push_image(img.value().attr("alt"), img.value().attr("src"));
                }
            }
            _ => {}
        }
    }

    pub fn finish(self) -> Vec<ContentSegment> {
        self.segments
    }
}

/// Concatenated text of an element, trimmed
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_rules() {
        let ignore: BTreeSet<String> = ["Projects".to_string()].into();
        let mut filter = ContentFilter::new(&ignore, 10);

        assert!(!filter.push_paragraph("   "));
        assert!(!filter.push_paragraph("short"));
        assert!(!filter.push_paragraph("exactly10!"));
        assert!(!filter.push_paragraph("Projects"));
        assert!(filter.push_paragraph("  A paragraph that is long enough  "));
        assert!(!filter.push_paragraph("A paragraph that is long enough"));

        assert_eq!(
            filter.finish(),
            vec![ContentSegment::text("A paragraph that is long enough")]
        );
    }

    #[test]
    fn test_images_need_alt_and_src() {
        let ignore = BTreeSet::new();
        let mut filter = ContentFilter::new(&ignore, 10);

        assert!(!filter.push_image(None, Some("https://img/1.jpg")));
        assert!(!filter.push_image(Some(""), Some("https://img/1.jpg")));
        assert!(!filter.push_image(Some("facade"), None));
        assert!(filter.push_image(Some("facade"), Some("https://img/1.jpg")));
        assert_eq!(filter.finish().len(), 1);
    }

    #[test]
    fn test_length_counts_characters() {
        let ignore = BTreeSet::new();
        let mut filter = ContentFilter::new(&ignore, 10);

        // Ten characters, thirty bytes
        assert!(!filter.push_paragraph("建筑建筑建筑建筑建筑"));
        assert!(filter.push_paragraph("建筑建筑建筑建筑建筑建"));
    }
}
