//! Export bundles and offline verification

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ecrvp_core::{
    verify_bundle, BundleDivergence, ExecuteOptions, ExportBundle, ExportError, Orchestrator,
    OrchestratorConfig, RunState, SessionRequest, SessionState, SessionType,
};
use ecrvp_gateway::Gateway;
use ecrvp_store::layout::{
    ARTIFACT_FILE, MANIFEST_FILE, METADATA_FILE, MODES_FILE, PROMPT_FILE, RESPONSE_FILE,
};
use ecrvp_test_utils::{
    sample_corpus, scripted_interpreters, transport_failure, ScriptedProvider, SCRIPTED,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::{Arc, OnceLock};

async fn finished_bundle() -> ExportBundle {
    let provider = Arc::new(ScriptedProvider::new().script("model-2", transport_failure(SCRIPTED)));
    let orch = Orchestrator::new(
        OrchestratorConfig::new(),
        Gateway::empty().with_provider(provider),
    )
    .unwrap();
    let passport_id = orch.register_corpus(sample_corpus()).await.unwrap();
    let session = orch
        .create_session(SessionRequest::new(
            passport_id,
            SessionType::StrictVerifier,
            scripted_interpreters(4),
        ))
        .await
        .unwrap();
    orch.execute(session.session_id, ExecuteOptions::new())
        .await
        .unwrap();
    orch.export(session.session_id).await.unwrap()
}

fn shared_bundle() -> &'static ExportBundle {
    static BUNDLE: OnceLock<ExportBundle> = OnceLock::new();
    BUNDLE.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(finished_bundle())
    })
}

const CHAINED_FILES: [&str; 5] = [
    ARTIFACT_FILE,
    METADATA_FILE,
    PROMPT_FILE,
    MANIFEST_FILE,
    RESPONSE_FILE,
];

fn file_text(bundle: &ExportBundle, run: usize, name: &str) -> String {
    String::from_utf8(STANDARD.decode(&bundle.runs[run].files[name]).unwrap()).unwrap()
}

fn replace_file(bundle: &mut ExportBundle, run: usize, name: &str, bytes: &[u8]) {
    bundle.runs[run]
        .files
        .insert(name.to_string(), STANDARD.encode(bytes));
}

fn tamper_file(bundle: &mut ExportBundle, run: usize, name: &str, position: usize) {
    let mut bytes = STANDARD.decode(&bundle.runs[run].files[name]).unwrap();
    let at = position % bytes.len();
    bytes[at] ^= 0x01;
    replace_file(bundle, run, name, &bytes);
}

fn tamper_response(bundle: &mut ExportBundle, run: usize, position: usize) {
    tamper_file(bundle, run, RESPONSE_FILE, position);
}

fn divergent_leaf(bundle: &ExportBundle) -> Option<usize> {
    verify_bundle(bundle)
        .first_divergence
        .and_then(|d| d.leaf_index())
}

#[tokio::test]
async fn unfinished_session_cannot_be_exported() {
    let provider = Arc::new(ScriptedProvider::new());
    let orch = Orchestrator::new(
        OrchestratorConfig::new(),
        Gateway::empty().with_provider(provider),
    )
    .unwrap();
    let passport_id = orch.register_corpus(sample_corpus()).await.unwrap();
    let session = orch
        .create_session(SessionRequest::new(
            passport_id,
            SessionType::StrictVerifier,
            scripted_interpreters(1),
        ))
        .await
        .unwrap();
    let err = orch.export(session.session_id).await.unwrap_err();
    assert!(matches!(err, ExportError::NotFinished { .. }));
}

#[tokio::test]
async fn exported_bundle_verifies_after_json_round_trip() {
    let bundle = finished_bundle().await;
    assert_eq!(bundle.runs.len(), 4);
    assert_eq!(bundle.merkle_proof.leaves.len(), 4);
    assert_eq!(bundle.merkle_proof.paths.len(), 4);

    // runs in creation order, leaves aligned with them
    let run_ids: Vec<_> = bundle.runs.iter().map(|r| r.run_id).collect();
    assert_eq!(run_ids, bundle.session.run_ids());
    for (index, run) in bundle.session.runs.iter().enumerate() {
        assert_eq!(run.artifact, Some(bundle.merkle_proof.leaves[index]));
    }

    // mode view only for captured runs
    assert!(bundle.runs[0].files.contains_key(MODES_FILE));
    assert!(!bundle.runs[2].files.contains_key(MODES_FILE));

    let parsed = ExportBundle::from_json(&bundle.to_json().unwrap()).unwrap();
    assert_eq!(parsed, bundle);
    let verification = verify_bundle(&parsed);
    assert!(verification.valid);
    assert_eq!(verification.first_divergence, None);
}

#[test]
fn single_byte_tamper_names_the_leaf() {
    let mut bundle = shared_bundle().clone();
    tamper_response(&mut bundle, 1, 0);

    let verification = verify_bundle(&bundle);
    assert!(!verification.valid);
    let divergence = verification.first_divergence.clone().unwrap();
    assert_eq!(divergence.leaf_index(), Some(1));
    assert!(matches!(divergence, BundleDivergence::Run { run_id, .. } if run_id == bundle.runs[1].run_id));

    let session_id = bundle.session.session_id;
    assert!(matches!(
        verification.into_result(session_id),
        Err(ExportError::IntegrityMismatch { .. })
    ));
}

#[test]
fn mode_view_is_outside_the_proof() {
    let mut bundle = shared_bundle().clone();
    bundle.runs[0]
        .files
        .insert(MODES_FILE.to_string(), STANDARD.encode(b"{}"));
    assert!(verify_bundle(&bundle).valid);
}

#[test]
fn edited_passport_is_detected() {
    let mut bundle = shared_bundle().clone();
    let mut doc = serde_json::to_value(&bundle).unwrap();
    doc["passport"]["purpose"] = serde_json::Value::String("Something else".to_string());
    bundle = serde_json::from_value(doc).unwrap();

    let divergence = verify_bundle(&bundle).first_divergence.unwrap();
    assert!(matches!(divergence, BundleDivergence::Passport { .. }));
}

#[test]
fn reordered_runs_are_detected() {
    let mut bundle = shared_bundle().clone();
    bundle.runs.swap(0, 3);
    let divergence = verify_bundle(&bundle).first_divergence.unwrap();
    assert_eq!(divergence.leaf_index(), Some(0));
}

#[test]
fn dropped_run_is_a_leaf_count_divergence() {
    let mut bundle = shared_bundle().clone();
    bundle.runs.pop();
    let divergence = verify_bundle(&bundle).first_divergence.unwrap();
    assert!(matches!(
        divergence,
        BundleDivergence::LeafCount {
            runs: 3,
            leaves: 4,
            paths: 4
        }
    ));
}

#[test]
fn substituted_root_is_detected() {
    let mut bundle = shared_bundle().clone();
    bundle.merkle_proof.merkle_root = bundle.merkle_proof.leaves[0];
    let verification = verify_bundle(&bundle);
    assert!(!verification.valid);
}

#[test]
fn reformatted_metadata_is_detected() {
    let mut bundle = shared_bundle().clone();
    let text = file_text(&bundle, 1, METADATA_FILE);
    replace_file(&mut bundle, 1, METADATA_FILE, text.replacen(' ', "\t", 1).as_bytes());
    assert_eq!(divergent_leaf(&bundle), Some(1));
}

#[test]
fn upper_case_fingerprint_is_detected() {
    let mut bundle = shared_bundle().clone();
    let chain = bundle.merkle_proof.leaves[1].to_string();
    let text = file_text(&bundle, 1, ARTIFACT_FILE);
    assert!(text.contains(&chain));
    replace_file(
        &mut bundle,
        1,
        ARTIFACT_FILE,
        text.replace(&chain, &chain.to_uppercase()).as_bytes(),
    );
    assert_eq!(divergent_leaf(&bundle), Some(1));
}

#[test]
fn rewritten_sequence_is_detected() {
    let mut bundle = shared_bundle().clone();
    let text = file_text(&bundle, 2, ARTIFACT_FILE);
    let record: serde_json::Value = serde_json::from_str(&text).unwrap();
    let sequence = record["sequence"].as_u64().unwrap();
    let rewritten = text.replace(
        &format!("\"sequence\": {sequence}"),
        "\"sequence\": 99",
    );
    assert_ne!(rewritten, text);
    replace_file(&mut bundle, 2, ARTIFACT_FILE, rewritten.as_bytes());

    let divergence = verify_bundle(&bundle).first_divergence.unwrap();
    assert_eq!(divergence.leaf_index(), Some(2));
    assert!(divergence.to_string().contains("sequence 99"));
}

#[test]
fn extra_file_in_a_run_is_detected() {
    let mut bundle = shared_bundle().clone();
    replace_file(&mut bundle, 3, "notes.txt", b"reviewed");
    assert_eq!(divergent_leaf(&bundle), Some(3));
}

#[test]
fn errored_run_claimed_as_captured_is_detected() {
    let mut bundle = shared_bundle().clone();
    assert_eq!(bundle.session.runs[2].state, RunState::Errored);
    let run = &mut bundle.session.runs[2];
    run.state = RunState::Captured;
    run.error = None;
    assert_eq!(divergent_leaf(&bundle), Some(2));
}

#[test]
fn dropped_error_is_detected() {
    let mut bundle = shared_bundle().clone();
    bundle.session.runs[2].error = None;
    assert_eq!(divergent_leaf(&bundle), Some(2));
}

#[test]
fn forged_prompt_in_session_record_is_detected() {
    let mut bundle = shared_bundle().clone();
    bundle.session.runs[0].prompt = Some("forged prompt".to_string());
    assert_eq!(divergent_leaf(&bundle), Some(0));
}

#[test]
fn session_record_fingerprints_must_match_artifacts() {
    let mut bundle = shared_bundle().clone();
    bundle.session.runs[0].artifact = None;
    assert_eq!(divergent_leaf(&bundle), Some(0));

    let mut bundle = shared_bundle().clone();
    bundle.session.runs[3].output_fingerprint = Some(bundle.merkle_proof.leaves[3]);
    assert_eq!(divergent_leaf(&bundle), Some(3));

    let mut bundle = shared_bundle().clone();
    bundle.session.runs[1].corpus_manifest = None;
    assert_eq!(divergent_leaf(&bundle), Some(1));
}

#[test]
fn session_state_must_follow_from_its_runs() {
    let mut bundle = shared_bundle().clone();
    assert_eq!(bundle.session.state, SessionState::AwaitingSynthesis);
    bundle.session.state = SessionState::Completed;
    let divergence = verify_bundle(&bundle).first_divergence.unwrap();
    assert!(matches!(divergence, BundleDivergence::Session { .. }));
    assert_eq!(divergence.leaf_index(), None);
}

#[test]
fn garbage_is_malformed() {
    let err = ExportBundle::from_json(b"{\"format\": 7}").unwrap_err();
    assert!(matches!(err, ExportError::Malformed(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_single_byte_tamper_is_pinpointed(
        run in 0usize..4,
        file in 0usize..CHAINED_FILES.len(),
        position in any::<usize>(),
    ) {
        let mut bundle = shared_bundle().clone();
        tamper_file(&mut bundle, run, CHAINED_FILES[file], position);
        let verification = verify_bundle(&bundle);
        prop_assert!(!verification.valid);
        prop_assert_eq!(verification.first_divergence.and_then(|d| d.leaf_index()), Some(run));
    }
}
