//! Parsing of the input JSONL stream: the meta record, task records, and the catalog view
//! carried by `active`/`empty` task records.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::check::BaseCategory;

/// First line of the input stream.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaRecord {
    pub count: u64,
    pub max_last_modified: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputState {
    Active,
    Empty,
    PossiblyDeleted,
    Merged,
}

impl InputState {
    /// The base category this input state maps onto. Deliberately not a formatting of the
    /// variant name: `Active` maps to `Item`, not `ActiveItem`.
    pub fn base_category(self) -> BaseCategory {
        match self {
            InputState::Active => BaseCategory::Item,
            InputState::Empty => BaseCategory::EmptyItem,
            InputState::PossiblyDeleted => BaseCategory::DeletedItem,
            InputState::Merged => BaseCategory::MergedItem,
        }
    }

    pub fn carries_catalog_data(self) -> bool {
        matches!(self, InputState::Active | InputState::Empty)
    }
}

/// One task record, lines 2.. of the input stream.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub state: InputState,
    #[serde(default)]
    pub data: Option<CatalogViewRaw>,
}

/// The wire shape of `data`, deserialized verbatim before being lifted into [`CatalogView`].
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogViewRaw {
    pub release_gid: String,
    pub release_name: String,
    pub artists: Vec<RawArtist>,
    pub release_dates: Vec<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub asins: Vec<String>,
    pub images: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawArtist {
    pub artist_name: String,
    pub artist_gid: String,
}

#[derive(Debug, Clone)]
pub struct MbArtist {
    pub name: String,
    pub gid: String,
}

/// One cover-art image as declared by the catalog, plus the derived filenames and the
/// expected index-document entry shape for that image.
#[derive(Debug, Clone)]
pub struct MbImage {
    pub id: i64,
    raw: Map<String, Value>,
    mbid: String,
}

impl MbImage {
    fn new(raw: Map<String, Value>, mbid: &str) -> Self {
        let id = raw.get("id").and_then(Value::as_i64).unwrap_or_default();
        Self {
            id,
            raw,
            mbid: mbid.to_string(),
        }
    }

    pub fn suffix(&self) -> &str {
        self.raw.get("suffix").and_then(Value::as_str).unwrap_or("")
    }

    /// The original filename the catalog expects this image to be archived under.
    pub fn filename(&self) -> String {
        format!("mbid-{}-{}.{}", self.mbid, self.id, self.suffix())
    }

    /// The three derivative thumbnail filenames, keyed by pixel size.
    pub fn thumbnail_names(&self) -> BTreeMap<u32, String> {
        [250, 500, 1200]
            .into_iter()
            .map(|size| (size, format!("mbid-{}-{}_thumb{size}.jpg", self.mbid, self.id)))
            .collect()
    }

    /// The shape the remote `index.json` entry for this image is expected to match: the
    /// catalog's fields, minus `suffix`, plus the synthesized `image` URL and `thumbnails` map.
    pub fn as_expected_dict(&self) -> Map<String, Value> {
        let mut d = self.raw.clone();
        d.remove("suffix");
        d.insert(
            "image".to_string(),
            Value::String(format!(
                "http://coverartarchive.org/release/{}/{}.{}",
                self.mbid,
                self.id,
                self.suffix()
            )),
        );
        let url = |size: u32| {
            Value::String(format!(
                "http://coverartarchive.org/release/{}/{}-{size}.jpg",
                self.mbid, self.id
            ))
        };
        let mut thumbnails = Map::new();
        thumbnails.insert("250".to_string(), url(250));
        thumbnails.insert("500".to_string(), url(500));
        thumbnails.insert("1200".to_string(), url(1200));
        thumbnails.insert("small".to_string(), url(250));
        thumbnails.insert("large".to_string(), url(500));
        d.insert("thumbnails".to_string(), Value::Object(thumbnails));
        d
    }
}

/// The catalog's view of a release, as carried by `active`/`empty` task records.
#[derive(Debug, Clone)]
pub struct CatalogView {
    pub gid: String,
    pub title: String,
    pub artists: Vec<MbArtist>,
    pub release_dates: Vec<String>,
    pub language: Option<String>,
    pub barcode: Option<String>,
    pub asins: Vec<String>,
    pub images: Vec<MbImage>,
}

impl CatalogView {
    pub fn from_raw(raw: CatalogViewRaw) -> Self {
        let gid = raw.release_gid;
        let images = raw
            .images
            .into_iter()
            .map(|img| MbImage::new(img, &gid))
            .collect();
        let artists = raw
            .artists
            .into_iter()
            .map(|a| MbArtist {
                name: a.artist_name,
                gid: a.artist_gid,
            })
            .collect();
        Self {
            gid,
            title: raw.release_name,
            artists,
            release_dates: raw.release_dates,
            language: raw.language_code,
            barcode: raw.barcode,
            asins: raw.asins,
            images,
        }
    }

    pub fn image_ids(&self) -> Vec<i64> {
        self.images.iter().map(|i| i.id).collect()
    }
}
