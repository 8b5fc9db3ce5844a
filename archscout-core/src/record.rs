//! The structured record the parser derives from raw content.
//!
//! Every field is optional on purpose: presence decides whether the parser recomputes
//! a field, so a partially parsed record is a valid record.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// One segment of the article body, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentSegment {
    Text { content: String },
    Image { alt: String, src: String },
}

impl ContentSegment {
    pub fn text(content: impl Into<String>) -> Self {
        ContentSegment::Text {
            content: content.into(),
        }
    }

    pub fn image(alt: impl Into<String>, src: impl Into<String>) -> Self {
        ContentSegment::Image {
            alt: alt.into(),
            src: src.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentSegment::Text { content } => Some(content),
            ContentSegment::Image { .. } => None,
        }
    }
}

/// A gallery entry as published by the source, keyed `url_<size>`.
///
/// Sources ship more keys than we use (captions, dimensions), they are kept verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GalleryImage(Map<String, Value>);

impl GalleryImage {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with_url(size: &str, url: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(format!("url_{size}"), Value::String(url.into()));
        Self(map)
    }

    /// The url for the given size, i.e. `large` reads `url_large`
    pub fn url(&self, size: &str) -> Option<&str> {
        self.0.get(&format!("url_{size}")).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Keys every `specs` object carries, in order.
pub const SPEC_KEYS: [&str; 6] = [
    "year",
    "country",
    "city",
    "area",
    "architects",
    "photographs",
];

/// Fixed-key project facts. Unknown values serialize as `null`, keys are never dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Specs {
    pub year: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub architects: Option<String>,
    pub photographs: Option<String>,
}

impl Specs {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "year" => Some(&mut self.year),
            "country" => Some(&mut self.country),
            "city" => Some(&mut self.city),
            "area" => Some(&mut self.area),
            "architects" => Some(&mut self.architects),
            "photographs" => Some(&mut self.photographs),
            _ => None,
        }
    }

    /// Sets a fixed key. Returns false for keys outside [`SPEC_KEYS`].
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.slot(key) {
            Some(slot) => {
                *slot = Some(value.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "year" => self.year.as_deref(),
            "country" => self.country.as_deref(),
            "city" => self.city.as_deref(),
            "area" => self.area.as_deref(),
            "architects" => self.architects.as_deref(),
            "photographs" => self.photographs.as_deref(),
            _ => None,
        }
    }
}

/// Fields the parser knows how to (re)compute
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum RecordField {
    MainContent,
    ImageGallery,
    Title,
    Tags,
    Specs,
}

/// Which record fields to recompute even when already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceUpdate {
    pub main_content: bool,
    pub image_gallery: bool,
    pub title: bool,
    pub tags: bool,
    pub specs: bool,
}

impl ForceUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            main_content: true,
            image_gallery: true,
            title: true,
            tags: true,
            specs: true,
        }
    }

    #[must_use]
    pub fn with(mut self, field: RecordField) -> Self {
        *self.flag_mut(field) = true;
        self
    }

    pub fn is_forced(&self, field: RecordField) -> bool {
        match field {
            RecordField::MainContent => self.main_content,
            RecordField::ImageGallery => self.image_gallery,
            RecordField::Title => self.title,
            RecordField::Tags => self.tags,
            RecordField::Specs => self.specs,
        }
    }

    fn flag_mut(&mut self, field: RecordField) -> &mut bool {
        match field {
            RecordField::MainContent => &mut self.main_content,
            RecordField::ImageGallery => &mut self.image_gallery,
            RecordField::Title => &mut self.title,
            RecordField::Tags => &mut self.tags,
            RecordField::Specs => &mut self.specs,
        }
    }
}

/// The parsed representation of a project, persisted as `content.json` and uploaded
/// as-is to the content collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_content: Option<Vec<ContentSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_gallery: Option<Vec<GalleryImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs: Option<Specs>,
    /// Keys we do not model, preserved across re-parses
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParsedRecord {
    pub fn has(&self, field: RecordField) -> bool {
        match field {
            RecordField::MainContent => self.main_content.is_some(),
            RecordField::ImageGallery => self.image_gallery.is_some(),
            RecordField::Title => self.title.is_some(),
            RecordField::Tags => self.tags.is_some(),
            RecordField::Specs => self.specs.is_some(),
        }
    }

    /// Text segments of the main content with their position among text segments.
    pub fn text_segments(&self) -> impl Iterator<Item = (usize, &str)> {
        self.main_content
            .iter()
            .flatten()
            .filter_map(ContentSegment::as_text)
            .enumerate()
    }

    pub fn gallery_len(&self) -> usize {
        self.image_gallery.as_ref().map_or(0, Vec::len)
    }
}
