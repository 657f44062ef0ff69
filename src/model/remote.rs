//! Parsing of fetched remote documents (`metadata.json`, `index.json`) into comparable views.

use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn historical_revno_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"~(\d+)~$").unwrap())
}

/// A single file entry from the `files` list of a remote metadata document.
#[derive(Debug, Clone)]
pub struct IaFile {
    pub original_name: String,
    pub name: String,
    pub is_derived: bool,
    pub original: Option<String>,
    pub is_historical: bool,
    pub revno: Option<u64>,
    pub mtime: i64,
}

impl IaFile {
    fn from_value(d: &Value) -> Self {
        let obj = d.as_object();
        let get_str = |key: &str| -> String {
            obj.and_then(|o| o.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let original_name = get_str("name");
        let is_derived = obj
            .and_then(|o| o.get("source"))
            .and_then(Value::as_str)
            .map(|s| s == "derivative")
            .unwrap_or(false);
        let original = obj
            .and_then(|o| o.get("original"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mtime = obj
            .and_then(|o| o.get("mtime"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| obj.and_then(|o| o.get("mtime")).and_then(Value::as_i64))
            .unwrap_or(0);

        let is_historical = original_name.starts_with("history/files/");
        let mut name = original_name.clone();
        let mut revno = None;
        if is_historical {
            name = name.trim_start_matches("history/files/").to_string();
            if let Some(caps) = historical_revno_re().captures(&name) {
                revno = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
            }
            name = historical_revno_re().replace(&name, "").to_string();
        }

        Self {
            original_name,
            name,
            is_derived,
            original,
            is_historical,
            revno,
            mtime,
        }
    }
}

/// The files of a remote item, indexed three ways: current originals, current derivatives,
/// and historical revisions (both kept under the logical, revision-stripped name).
#[derive(Debug, Clone, Default)]
pub struct IaFiles {
    originals: HashMap<String, IaFile>,
    derivatives: HashMap<String, IaFile>,
    historical: HashMap<String, Vec<IaFile>>,
}

impl IaFiles {
    pub fn from_value(files: &[Value]) -> Self {
        let mut originals = HashMap::new();
        let mut derivatives = HashMap::new();
        let mut historical: HashMap<String, Vec<IaFile>> = HashMap::new();

        for raw in files {
            let f = IaFile::from_value(raw);
            if f.is_historical {
                historical.entry(f.name.clone()).or_default().push(f);
            } else if f.is_derived {
                derivatives.insert(f.name.clone(), f);
            } else {
                originals.insert(f.name.clone(), f);
            }
        }

        Self {
            originals,
            derivatives,
            historical,
        }
    }

    pub fn has_original(&self, name: &str) -> bool {
        self.originals.contains_key(name)
    }

    pub fn has_derivative(&self, name: &str) -> bool {
        self.derivatives.contains_key(name)
    }

    pub fn has_historical(&self, name: &str) -> bool {
        self.historical.contains_key(name)
    }

    pub fn get_original(&self, name: &str) -> Option<&IaFile> {
        self.originals.get(name)
    }

    pub fn originals(&self) -> impl Iterator<Item = &IaFile> {
        self.originals.values()
    }

    pub fn find_originals(&self, predicate: impl Fn(&IaFile) -> bool) -> Vec<&IaFile> {
        self.originals.values().filter(|f| predicate(f)).collect()
    }

    pub fn has_any_original(&self, predicate: impl Fn(&IaFile) -> bool) -> bool {
        self.originals.values().any(|f| predicate(f))
    }

    pub fn has_any_derivative_name(&self, predicate: impl Fn(&str) -> bool) -> bool {
        self.derivatives.keys().any(|name| predicate(name))
    }
}

/// The metadata fields the engine compares against the catalog, normalized at the edge:
/// scalar-or-list fields are always lifted to a list, and external ids are deduplicated.
#[derive(Debug, Clone)]
pub struct IaMeta {
    pub external_ids: HashSet<String>,
    pub collections: Vec<String>,
    pub is_noindex: bool,
    pub mediatype: String,
    pub title: String,
    pub creators: Vec<String>,
    pub date: Option<String>,
    pub language: Option<String>,
}

fn scalar_or_list(obj: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    }
}

impl IaMeta {
    pub fn from_value(d: &Value) -> Self {
        let empty = serde_json::Map::new();
        let obj = d.as_object().unwrap_or(&empty);
        Self {
            external_ids: scalar_or_list(obj, "external-identifier").into_iter().collect(),
            collections: scalar_or_list(obj, "collection"),
            is_noindex: obj.get("noindex").and_then(Value::as_bool).unwrap_or(false),
            mediatype: obj
                .get("mediatype")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            title: obj
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            creators: scalar_or_list(obj, "creator"),
            date: obj.get("date").and_then(Value::as_str).map(str::to_string),
            language: obj.get("language").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// The parsed form of a remote `metadata.json` response.
#[derive(Debug, Clone)]
pub struct IaState {
    pub is_dark: bool,
    pub last_modified: i64,
    pub files: IaFiles,
    pub meta: IaMeta,
}

impl IaState {
    pub fn from_value(d: &Value) -> Self {
        let is_dark = d.get("is_dark").and_then(Value::as_bool).unwrap_or(false);
        let last_modified = d
            .get("item_last_updated")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if is_dark {
            return Self {
                is_dark,
                last_modified,
                files: IaFiles::default(),
                meta: IaMeta {
                    external_ids: HashSet::new(),
                    collections: Vec::new(),
                    is_noindex: false,
                    mediatype: String::new(),
                    title: String::new(),
                    creators: Vec::new(),
                    date: None,
                    language: None,
                },
            };
        }
        let files = d
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let empty_meta = Value::Object(serde_json::Map::new());
        let meta_value = d.get("metadata").unwrap_or(&empty_meta);
        Self {
            is_dark,
            last_modified,
            files: IaFiles::from_value(&files),
            meta: IaMeta::from_value(meta_value),
        }
    }
}

/// A parsed `index.json` document. Parsing is deferred to the caller so a malformed
/// document can itself be a checked property, rather than a fetch-time error.
#[derive(Debug, Clone)]
pub struct CaaIndex {
    value: Value,
}

impl CaaIndex {
    /// Returns `None` if the bytes are not valid JSON.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok().map(|value| Self { value })
    }

    pub fn is_object(&self) -> bool {
        self.value.is_object()
    }

    pub fn keys(&self) -> HashSet<String> {
        self.value
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn release_url(&self) -> Option<&str> {
        self.value.get("release").and_then(Value::as_str)
    }

    pub fn images(&self) -> &[Value] {
        self.value
            .get("images")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
