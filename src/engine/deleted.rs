//! Checks for items whose input record declares them `possibly_deleted` or `merged`: the
//! remote item may still be hosted, but its cover-art content is expected to be gone.

use crate::model::{CheckRecorder, IaState, InputState};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "gif", "pdf"];

pub async fn run(
    recorder: &mut CheckRecorder,
    state: &IaState,
    input_state: InputState,
    mbid: &str,
) -> Result<(), super::EngineError> {
    let files = &state.files;
    let prefix = format!("mbid-{mbid}-");

    let has_original_index_or_history = files.has_original("index.json") || files.has_historical("index.json");
    let is_test_item = !recorder.check_or_skip(
        "test item",
        has_original_index_or_history,
        "item never archived an index.json, original or historical",
    );
    if is_test_item && input_state == InputState::PossiblyDeleted {
        return Ok(());
    }

    recorder.check(
        "index is absent",
        !files.has_original("index.json"),
        "index.json is still archived",
    );

    let has_images = files.has_any_original(|f| {
        f.name.starts_with(&prefix)
            && IMAGE_EXTENSIONS
                .iter()
                .any(|ext| f.name.to_ascii_lowercase().ends_with(&format!(".{ext}")))
    });
    recorder.check("images are absent", !has_images, "cover art images are still archived");

    let has_derivatives = files.has_any_derivative_name(|name| name.starts_with(&prefix));
    recorder.check(
        "derivatives are absent",
        !has_derivatives,
        "derivative thumbnails are still archived",
    );

    recorder.check(
        "mb_metadata is absent",
        !files.has_original(&format!("mbid-{mbid}_mb_metadata.xml")),
        "mb_metadata.xml is still archived",
    );

    if input_state == InputState::PossiblyDeleted {
        let release_urn = format!("urn:mb_release_id:{mbid}");
        recorder.check(
            "release url is absent",
            !state.meta.external_ids.contains(&release_urn),
            "release url is still present in external identifiers",
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseCategory, CheckResult, IaFiles, IaMeta};
    use serde_json::Value;

    fn state(files: Vec<Value>, external_ids: &[&str]) -> IaState {
        IaState {
            is_dark: false,
            last_modified: 0,
            files: IaFiles::from_value(&files),
            meta: IaMeta {
                external_ids: external_ids.iter().map(|s| s.to_string()).collect(),
                collections: Vec::new(),
                is_noindex: false,
                mediatype: String::new(),
                title: String::new(),
                creators: Vec::new(),
                date: None,
                language: None,
            },
        }
    }

    fn file(name: &str) -> Value {
        serde_json::json!({"name": name, "mtime": "0"})
    }

    fn historical(name: &str) -> Value {
        serde_json::json!({"name": format!("history/files/{name}~1~"), "mtime": "0"})
    }

    #[tokio::test]
    async fn fully_deleted_item_passes_every_check() {
        // index.json was archived once (now only in history), nothing else lingers.
        let state = state(vec![historical("index.json")], &[]);
        let mut recorder = CheckRecorder::new(BaseCategory::DeletedItem, "mbid-1");

        run(&mut recorder, &state, InputState::PossiblyDeleted, "mbid-1")
            .await
            .unwrap();

        let results = recorder.into_results();
        assert!(results.iter().all(|r| matches!(r, CheckResult::Passed { .. })));
        assert!(results.iter().any(|r| r.description().ends_with("release url is absent")));
    }

    #[tokio::test]
    async fn possibly_deleted_aborts_when_never_archived() {
        let state = state(vec![], &[]);
        let mut recorder = CheckRecorder::new(BaseCategory::DeletedItem, "mbid-1");

        run(&mut recorder, &state, InputState::PossiblyDeleted, "mbid-1")
            .await
            .unwrap();

        let results = recorder.into_results();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], CheckResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn merged_item_never_archived_runs_every_check_anyway() {
        // Unlike `possibly_deleted`, a `merged` item never aborts on the "test item" check.
        let state = state(vec![], &[]);
        let mut recorder = CheckRecorder::new(BaseCategory::MergedItem, "mbid-1");

        run(&mut recorder, &state, InputState::Merged, "mbid-1").await.unwrap();

        let results = recorder.into_results();
        assert!(results.len() > 1);
        assert!(!results.iter().any(|r| r.description().contains("release url")));
    }

    #[tokio::test]
    async fn lingering_cover_art_fails_the_images_check() {
        let state = state(vec![historical("index.json"), file("mbid-mbid-1-1.jpg")], &[]);
        let mut recorder = CheckRecorder::new(BaseCategory::DeletedItem, "mbid-1");

        run(&mut recorder, &state, InputState::Merged, "mbid-1").await.unwrap();

        let results = recorder.into_results();
        let images_check = results
            .iter()
            .find(|r| r.description().ends_with("images are absent"))
            .unwrap();
        assert!(matches!(images_check, CheckResult::Failed { .. }));
    }

    #[tokio::test]
    async fn present_release_url_fails_for_possibly_deleted() {
        let state = state(vec![historical("index.json")], &["urn:mb_release_id:mbid-1"]);
        let mut recorder = CheckRecorder::new(BaseCategory::DeletedItem, "mbid-1");

        run(&mut recorder, &state, InputState::PossiblyDeleted, "mbid-1")
            .await
            .unwrap();

        let results = recorder.into_results();
        let release_check = results
            .iter()
            .find(|r| r.description().ends_with("release url is absent"))
            .unwrap();
        assert!(matches!(release_check, CheckResult::Failed { .. }));
    }
}
