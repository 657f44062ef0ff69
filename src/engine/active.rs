//! Active/empty item checks: metadata, files, and cover-art index comparisons against the
//! catalog view carried by the task record.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::client::RemoteItem;
use crate::logsink::TaskLogger;
use crate::model::{CatalogView, CheckRecorder, IaState};
use crate::progress::{ProgressReporter, Stage};

use super::EngineError;

fn image_filename_re(mbid: &str) -> Regex {
    Regex::new(&format!(r"^mbid-{}-(\d+)\.[A-Za-z0-9]+$", regex::escape(mbid))).expect("valid pattern")
}

/// Runs the metadata/files/index comparison stages. No-op (emits nothing) when the task
/// carries no catalog data, which cannot happen for `active`/`empty` task records in practice
/// but is handled defensively since the input shape is only validated at parse time.
pub async fn run(
    recorder: &mut CheckRecorder,
    state: &IaState,
    catalog: Option<&CatalogView>,
    remote: &RemoteItem,
    log: &TaskLogger,
    progress: &ProgressReporter,
) -> Result<(), EngineError> {
    let Some(catalog) = catalog else {
        return Ok(());
    };

    {
        let _stage = progress.stage_scope(Stage::Meta);
        run_metadata_checks(recorder, state, catalog);
    }

    {
        let _stage = progress.stage_scope(Stage::Files);
        run_files_checks(recorder, state, catalog);
    }

    let index_bytes = remote.caa_index(log).await?;
    {
        let _stage = progress.stage_scope(Stage::Index);
        run_index_checks(recorder, catalog, index_bytes.as_deref());
    }

    Ok(())
}

fn run_metadata_checks(recorder: &mut CheckRecorder, state: &IaState, catalog: &CatalogView) {
    let meta = &state.meta;

    recorder.check(
        "Metadata::in caa collection",
        meta.collections.iter().any(|c| c == "coverartarchive"),
        "item is not in the coverartarchive collection",
    );
    recorder.check("Metadata::item is noindex", meta.is_noindex, "item is not noindex");
    recorder.check(
        "Metadata::mediatype is image",
        meta.mediatype == "image",
        "mediatype is not image",
    );
    recorder.check(
        "Metadata::title correct",
        meta.title == catalog.title,
        "title does not match catalog",
    );

    let catalog_names: Vec<&str> = catalog.artists.iter().map(|a| a.name.as_str()).collect();
    let remote_names: Vec<&str> = meta.creators.iter().map(String::as_str).collect();
    recorder.check(
        "Metadata::creators correct",
        remote_names == catalog_names,
        "creators do not match catalog, or are out of order",
    );

    let date_ok = meta.date.is_some() == !catalog.release_dates.is_empty()
        && meta
            .date
            .as_deref()
            .map(|d| catalog.release_dates.iter().any(|r| r == d))
            .unwrap_or(catalog.release_dates.is_empty());
    recorder.check("Metadata::date correct", date_ok, "date does not match catalog");

    recorder.check(
        "Metadata::language correct",
        meta.language.as_deref() == catalog.language.as_deref(),
        "language does not match catalog",
    );

    run_external_id_checks(recorder, &meta.external_ids, catalog);
}

fn run_external_id_checks(recorder: &mut CheckRecorder, observed: &HashSet<String>, catalog: &CatalogView) {
    let mut expected: HashSet<String> = HashSet::new();
    expected.insert(format!("urn:mb_release_id:{}", catalog.gid));
    for artist in &catalog.artists {
        expected.insert(format!("urn:mb_artist_id:{}", artist.gid));
    }
    for asin in &catalog.asins {
        expected.insert(format!("urn:asin:{asin}"));
    }
    if let Some(barcode) = &catalog.barcode {
        expected.insert(format!("urn:upc:{barcode}"));
    }

    let urn_type = |urn: &str| urn.splitn(3, ':').nth(1).unwrap_or("").to_string();

    for id in observed.difference(&expected) {
        recorder.push(crate::model::CheckResult::failed(
            recorder.mbid.clone(),
            format!("{}::Metadata::unexpected external id::{}", recorder.base.as_str(), urn_type(id)),
        ));
    }
    for id in expected.difference(observed) {
        recorder.push(crate::model::CheckResult::failed(
            recorder.mbid.clone(),
            format!("{}::Metadata::missing external id::{}", recorder.base.as_str(), urn_type(id)),
        ));
    }
}

fn run_files_checks(recorder: &mut CheckRecorder, state: &IaState, catalog: &CatalogView) {
    let files = &state.files;

    recorder.check(
        "Files::index.json exists",
        files.has_original("index.json"),
        "index.json is not archived",
    );
    recorder.check(
        "Files::mb_metadata.xml exists",
        files.has_original(&format!("mbid-{}_mb_metadata.xml", catalog.gid)),
        "mb_metadata.xml is not archived",
    );

    let id_re = image_filename_re(&catalog.gid);
    for image in &catalog.images {
        recorder.check(
            "Files::original image exists",
            files.has_original(&image.filename()),
            "original cover art image is not archived",
        );
        for (size, name) in image.thumbnail_names() {
            recorder.check(
                &format!("Files::{size}px thumbnail exists"),
                files.has_derivative(&name),
                "derivative thumbnail is not archived",
            );
        }

        let matches = files.find_originals(|f| {
            id_re
                .captures(&f.name)
                .map(|c| c.get(1).unwrap().as_str() == image.id.to_string())
                .unwrap_or(false)
                && !f.name.ends_with("_meta.txt")
        });
        recorder.check(
            "Files::image id is unique",
            matches.len() == 1,
            "more than one archived file matches this image id",
        );
    }
}

fn entry_id(entry: &Value) -> Option<i64> {
    match entry.get("id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn run_index_checks(recorder: &mut CheckRecorder, catalog: &CatalogView, bytes: Option<&[u8]>) {
    let Some(bytes) = bytes else {
        recorder.check("CAAIndex::is present", false, "index.json is absent");
        return;
    };
    if !recorder.check("CAAIndex::is present", true, "") {
        return;
    }

    let Some(index) = crate::model::CaaIndex::parse(bytes) else {
        recorder.check("CAAIndex::is well-formed", false, "index.json does not parse as JSON");
        return;
    };
    if !recorder.check(
        "CAAIndex::is well-formed",
        index.is_object(),
        "index.json root is not an object",
    ) {
        return;
    }

    let keys = index.keys();
    let required: HashSet<String> = ["release", "images"].iter().map(|s| s.to_string()).collect();
    if !recorder.check(
        "CAAIndex::has all keys",
        required.is_subset(&keys),
        "index.json is missing required keys",
    ) {
        return;
    }
    recorder.check(
        "CAAIndex::unexpected key",
        keys == required,
        "index.json has unexpected top-level keys",
    );

    let expected_release = format!("https://musicbrainz.org/release/{}", catalog.gid);
    recorder.check(
        "CAAIndex::release url correct",
        index.release_url() == Some(expected_release.as_str()),
        "release url does not match catalog",
    );

    let mut seen: Vec<i64> = Vec::new();
    for entry in index.images() {
        let obj = entry.as_object();
        if !recorder.check(
            "CAAIndex::Image::is well-formed",
            obj.map(|o| o.contains_key("id")).unwrap_or(false),
            "image entry is not an object with an id",
        ) {
            continue;
        }

        let Some(id) = entry_id(entry) else {
            recorder.check("CAAIndex::Image::id is int", false, "image id is not an integer");
            continue;
        };
        recorder.check("CAAIndex::Image::id is int", true, "");

        if !recorder.check(
            "CAAIndex::Image::unexpected image",
            catalog.image_ids().contains(&id),
            "index.json references an image id unknown to the catalog",
        ) {
            seen.push(id);
            continue;
        }
        seen.push(id);

        let Some(catalog_image) = catalog.images.iter().find(|i| i.id == id) else {
            continue;
        };
        let expected = catalog_image.as_expected_dict();
        let observed = obj.cloned().unwrap_or_default();

        for (key, expected_value) in &expected {
            recorder.check(
                &format!("CAAIndex::Image::has {key}"),
                observed.contains_key(key),
                &format!("image entry is missing key {key}"),
            );
            recorder.check(
                &format!("CAAIndex::Image::{key} correct"),
                observed.get(key) == Some(expected_value),
                &format!("image entry key {key} does not match catalog"),
            );
        }
        for key in observed.keys() {
            recorder.check(
                "CAAIndex::Image::unexpected key",
                expected.contains_key(key),
                &format!("image entry has unexpected key {key}"),
            );
        }
    }

    for image in &catalog.images {
        recorder.check(
            "CAAIndex::Image::missing image",
            seen.contains(&image.id),
            "catalog image id absent from index.json",
        );
    }
    let mut counted: HashSet<i64> = HashSet::new();
    for id in &seen {
        if !counted.insert(*id) {
            recorder.check(
                "CAAIndex::Image::image id is unique",
                false,
                "image id appears more than once in index.json",
            );
        }
    }
    recorder.check(
        "CAAIndex::Image::order",
        seen == catalog.image_ids(),
        "image order in index.json does not match catalog",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseCategory, CheckResult, MbArtist};

    fn catalog() -> CatalogView {
        CatalogView {
            gid: "rel-1".to_string(),
            title: "Title".to_string(),
            artists: vec![MbArtist {
                name: "Artist".to_string(),
                gid: "art-1".to_string(),
            }],
            release_dates: vec!["2020-01-01".to_string()],
            language: Some("eng".to_string()),
            barcode: Some("012345".to_string()),
            asins: vec!["B000X".to_string()],
            images: Vec::new(),
        }
    }

    #[test]
    fn matching_external_ids_produce_no_findings() {
        let catalog = catalog();
        let observed: HashSet<String> = [
            "urn:mb_release_id:rel-1".to_string(),
            "urn:mb_artist_id:art-1".to_string(),
            "urn:asin:B000X".to_string(),
            "urn:upc:012345".to_string(),
        ]
        .into_iter()
        .collect();

        let mut recorder = CheckRecorder::new(BaseCategory::Item, "rel-1");
        run_external_id_checks(&mut recorder, &observed, &catalog);

        assert!(recorder.results.is_empty());
    }

    #[test]
    fn missing_and_unexpected_external_ids_are_both_reported() {
        let catalog = catalog();
        let observed: HashSet<String> = ["urn:mb_release_id:rel-1".to_string(), "urn:asin:WRONG".to_string()]
            .into_iter()
            .collect();

        let mut recorder = CheckRecorder::new(BaseCategory::Item, "rel-1");
        run_external_id_checks(&mut recorder, &observed, &catalog);

        let descriptions: Vec<&str> = recorder.results.iter().map(|r| r.description()).collect();
        assert!(descriptions.iter().any(|d| d.contains("unexpected external id::asin")));
        assert!(descriptions.iter().any(|d| d.contains("missing external id::mb_artist_id")));
        assert!(descriptions.iter().any(|d| d.contains("missing external id::asin")));
        assert!(descriptions.iter().any(|d| d.contains("missing external id::upc")));
        assert!(recorder.results.iter().all(|r| matches!(r, CheckResult::Failed { .. })));
    }

    #[test]
    fn image_id_uniqueness_regex_matches_expected_filename() {
        let re = image_filename_re("rel-1");
        let caps = re.captures("mbid-rel-1-42.jpg").unwrap();
        assert_eq!(&caps[1], "42");
        assert!(re.captures("mbid-rel-1-42_meta.txt").is_none());
    }
}
