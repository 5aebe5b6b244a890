use super::*;
use crate::database::{ChunkRecord, VectorIndex};
use crate::test_support::{KeywordModel, knowledge_base};
use std::fs;
use tempfile::TempDir;

fn snapshot(texts: &[&str]) -> KnowledgeSnapshot {
    let vectors = texts.iter().map(|t| KeywordModel::vector(t)).collect();
    let records = texts
        .iter()
        .enumerate()
        .map(|(i, text)| ChunkRecord {
            source_doc_id: format!("doc-{}", i),
            source_doc_name: format!("doc-{}.txt", i),
            source_doc_path: format!("folder/doc-{}.txt", i),
            source_url: None,
            chunk_text: (*text).to_string(),
            chunk_id: format!("doc-{}_0", i),
        })
        .collect();
    KnowledgeSnapshot::new(
        VectorIndex::build(vectors).expect("index"),
        records,
        "keyword-test-model",
    )
    .expect("snapshot")
}

#[test]
fn starts_unloaded() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());

    assert_eq!(kb.state(), KnowledgeBaseState::Unloaded);
    assert!(kb.snapshot().is_none());

    let status = kb.status();
    assert_eq!(status.chunk_count, 0);
    assert!(status.built_at.is_none());
}

#[test]
fn listing_documents_requires_a_snapshot() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());

    let err = kb.list_documents_indexed().expect_err("nothing loaded");
    assert!(matches!(err, KbError::KnowledgeBaseNotReady(_)));
}

#[tokio::test]
async fn missing_knowledge_base_requires_rebuild() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());

    let err = kb.ensure_loaded().await.expect_err("nothing persisted");

    assert!(matches!(err, KbError::RebuildRequired(_)), "got {:?}", err);
    assert_eq!(kb.state(), KnowledgeBaseState::Unloaded);
    assert!(kb.status().last_error.is_some());
}

#[tokio::test]
async fn corrupt_knowledge_base_stays_unloaded() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.store()
        .save(&snapshot(&["cats are mammals"]))
        .expect("save");
    fs::write(
        kb.store().current_dir().join("metadata.json"),
        "{ not json",
    )
    .expect("corrupt metadata");

    let err = kb.ensure_loaded().await.expect_err("corrupt");

    assert!(matches!(err, KbError::IndexCorrupt(_)), "got {:?}", err);
    assert_eq!(kb.state(), KnowledgeBaseState::Unloaded);
    assert!(kb.snapshot().is_none());
}

#[tokio::test]
async fn loads_persisted_knowledge_base() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.store()
        .save(&snapshot(&["cats are mammals", "dogs are mammals"]))
        .expect("save");

    kb.ensure_loaded().await.expect("load");

    assert_eq!(kb.state(), KnowledgeBaseState::Ready);
    let status = kb.status();
    assert_eq!(status.chunk_count, 2);
    assert_eq!(status.document_count, 2);
    assert_eq!(status.dimension, 7);
    assert_eq!(status.embedding_model.as_deref(), Some("keyword-test-model"));
    assert!(status.last_error.is_none());

    let documents = kb.list_documents_indexed().expect("documents");
    assert_eq!(documents[0].name, "doc-0.txt");
    assert_eq!(documents[1].path, "folder/doc-1.txt");
}

#[tokio::test]
async fn ensure_loaded_is_a_no_op_when_ready() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.publish(Arc::new(snapshot(&["cats are mammals"])));

    // Nothing on disk, but the live snapshot is enough
    kb.ensure_loaded().await.expect("already ready");
    assert_eq!(kb.state(), KnowledgeBaseState::Ready);
}

#[tokio::test]
async fn failed_state_can_be_retried() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.fail(&KbError::Network("unreachable".to_string()));
    assert_eq!(kb.state(), KnowledgeBaseState::Failed);

    kb.store()
        .save(&snapshot(&["cats are mammals"]))
        .expect("save");
    kb.ensure_loaded().await.expect("retry load");

    assert_eq!(kb.state(), KnowledgeBaseState::Ready);
}

#[test]
fn publish_swaps_without_touching_readers() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.publish(Arc::new(snapshot(&["cats are mammals"])));

    let held = kb.snapshot().expect("first snapshot");
    kb.publish(Arc::new(snapshot(&["dogs are mammals", "cats are mammals"])));

    assert_eq!(held.records().len(), 1);
    assert_eq!(held.records()[0].chunk_text, "cats are mammals");
    assert_eq!(kb.snapshot().expect("second").records().len(), 2);
}

#[test]
fn not_ready_error_mentions_last_failure() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());
    kb.fail(&KbError::ModelUnavailable("no weights".to_string()));

    let message = kb.not_ready().to_string();
    assert!(message.contains("failed"), "message: {}", message);
    assert!(message.contains("no weights"), "message: {}", message);
}

#[tokio::test]
async fn lifecycle_lock_is_exclusive() {
    let temp_dir = TempDir::new().expect("temp dir");
    let kb = knowledge_base(temp_dir.path());

    let guard = kb.lock_lifecycle().await;
    assert!(matches!(
        kb.try_lock_lifecycle(),
        Err(KbError::RebuildInProgress)
    ));
    drop(guard);
    assert!(kb.try_lock_lifecycle().is_ok());
}
