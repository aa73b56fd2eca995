//! ArtifactStore Tests
//!
//! Both back ends are exercised through the trait object.

use chrono::Utc;
use ecrvp_artifact::{RunId, SessionId};
use ecrvp_store::layout::{METADATA_FILE, MODES_FILE, PROMPT_FILE, RESPONSE_FILE};
use ecrvp_store::{
    verify_chain, ArtifactMetadata, ArtifactOutcome, ArtifactStore, FsArtifactStore,
    MemoryArtifactStore, StoreError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn metadata(provider: &str) -> ArtifactMetadata {
    ArtifactMetadata {
        provider: provider.to_string(),
        model: format!("{provider}-model"),
        display_name: provider.to_string(),
        outcome: ArtifactOutcome::Captured,
        error_kind: None,
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
        captured_at: Utc::now(),
        input_tokens: Some(100),
        output_tokens: Some(50),
        prompt: "identical prompt".to_string(),
        corpus_manifest: None,
    }
}

async fn check_at_most_one_write(store: &dyn ArtifactStore) {
    let session = SessionId::new();
    let run = RunId::new();

    store
        .write(session, run, b"original".to_vec(), metadata("a"))
        .await
        .unwrap();
    let err = store
        .write(session, run, b"replacement".to_vec(), metadata("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ImmutabilityViolation { .. }));

    let stored = store.read(session, run).await.unwrap();
    assert_eq!(stored.payload(), b"original");
}

async fn check_chain_in_write_order(store: &dyn ArtifactStore) {
    let session = SessionId::new();
    let runs: Vec<RunId> = (0..4).map(|_| RunId::new()).collect();
    for (i, run) in runs.iter().enumerate() {
        store
            .write(session, *run, format!("out {i}").into_bytes(), metadata("p"))
            .await
            .unwrap();
    }

    let listed = store.list_session(session).await.unwrap();
    let ids: Vec<RunId> = listed.iter().map(|a| a.run_id()).collect();
    assert_eq!(ids, runs);
    assert!(verify_chain(session, &listed).is_ok());
    assert_eq!(listed[1].record().previous_chain, listed[0].chain_fingerprint());
}

#[tokio::test]
async fn test_memory_at_most_one_write() {
    check_at_most_one_write(&MemoryArtifactStore::new()).await;
}

#[tokio::test]
async fn test_fs_at_most_one_write() {
    let dir = tempfile::tempdir().unwrap();
    check_at_most_one_write(&FsArtifactStore::new(dir.path())).await;
}

#[tokio::test]
async fn test_memory_chain_order() {
    check_chain_in_write_order(&MemoryArtifactStore::new()).await;
}

#[tokio::test]
async fn test_fs_chain_order() {
    let dir = tempfile::tempdir().unwrap();
    check_chain_in_write_order(&FsArtifactStore::new(dir.path())).await;
}

#[tokio::test]
async fn test_concurrent_writes_form_single_chain() {
    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let session = SessionId::new();

    let writes = (0..16).map(|i| {
        let store = Arc::clone(&store);
        async move {
            store
                .write(session, RunId::new(), vec![i], metadata("p"))
                .await
        }
    });
    let results = futures::future::join_all(writes).await;
    assert!(results.iter().all(Result::is_ok));

    let listed = store.list_session(session).await.unwrap();
    assert_eq!(listed.len(), 16);
    assert!(verify_chain(session, &listed).is_ok());
}

#[tokio::test]
async fn test_fs_reopen_continues_chain() {
    let dir = tempfile::tempdir().unwrap();
    let session = SessionId::new();

    let first = FsArtifactStore::new(dir.path());
    first
        .write(session, RunId::new(), b"one".to_vec(), metadata("a"))
        .await
        .unwrap();
    drop(first);

    let second = FsArtifactStore::new(dir.path());
    let artifact = second
        .write(session, RunId::new(), b"two".to_vec(), metadata("b"))
        .await
        .unwrap();
    assert_eq!(artifact.record().sequence, 1);

    let listed = second.list_session(session).await.unwrap();
    assert!(verify_chain(session, &listed).is_ok());
}

#[tokio::test]
async fn test_fs_tampered_response_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let session = SessionId::new();
    let run = RunId::new();
    store
        .write(session, run, b"## Verdict\nsound".to_vec(), metadata("a"))
        .await
        .unwrap();

    let path = store
        .session_dir(session)
        .join("runs")
        .join(run.to_string())
        .join(RESPONSE_FILE);
    std::fs::write(&path, b"## Verdict\nunsound").unwrap();

    let listed = store.list_session(session).await.unwrap();
    let err = verify_chain(session, &listed).unwrap_err();
    assert!(err.is_integrity());
    assert!(err.to_string().contains(&run.to_string()));
}

#[tokio::test]
async fn test_fs_reformatted_metadata_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let session = SessionId::new();
    let run = RunId::new();
    store
        .write(session, run, b"## Verdict\nsound".to_vec(), metadata("a"))
        .await
        .unwrap();

    let path = store
        .session_dir(session)
        .join("runs")
        .join(run.to_string())
        .join(METADATA_FILE);
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replacen("  ", "\t", 1)).unwrap();

    let err = store.read(session, run).await.unwrap_err();
    assert!(err.is_integrity());
    assert!(err.to_string().contains(METADATA_FILE));
}

#[tokio::test]
async fn test_views_are_outside_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let session = SessionId::new();
    let run = RunId::new();

    let missing = store
        .write_view(session, run, MODES_FILE, b"[]".to_vec())
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));

    store
        .write(session, run, b"text".to_vec(), metadata("a"))
        .await
        .unwrap();
    store
        .write_view(session, run, MODES_FILE, b"[]".to_vec())
        .await
        .unwrap();
    assert_eq!(
        store.read_view(session, run, MODES_FILE).await.unwrap(),
        Some(b"[]".to_vec())
    );

    let clobber = store
        .write_view(session, run, PROMPT_FILE, b"x".to_vec())
        .await;
    assert!(matches!(clobber, Err(StoreError::Malformed { .. })));

    let listed = store.list_session(session).await.unwrap();
    assert!(verify_chain(session, &listed).is_ok());
}
