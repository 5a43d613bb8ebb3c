//! Crash-safety of the unified transaction

mod common;

use common::{DIM, FixtureEmbedder, basis};
use engram_core::journal::{Journal, JournalRecord};
use engram_core::{
    Document, EngineConfig, EngramError, ItemMetadata, Metric, OpContext, Properties,
    SearchOptions, UnifiedMemory,
};

fn ctx() -> OpContext {
    OpContext::none()
}

fn open_engine(root: &std::path::Path) -> UnifiedMemory {
    let embedder = FixtureEmbedder::new([("gamma", basis(DIM, 2))]);
    UnifiedMemory::open_with_provider(root, EngineConfig::default(), embedder).unwrap()
}

/// Crash after the commit record but before either store was written:
/// reopening must redo both sides.
#[test]
fn durable_record_is_redone_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let memory = open_engine(dir.path());
        memory
            .create_collection("kb", DIM, Metric::Cosine, None, vec![])
            .unwrap();
        memory.close().unwrap();
    }

    // Simulate the crash window: a durable journal record with no store
    // mutations behind it
    let journal = Journal::new(dir.path().join("kb").join("journal.log"));
    journal
        .append(&JournalRecord::AddDocument {
            txn: "crashed-txn".into(),
            ns_id: "kb:C".into(),
            vector: basis(DIM, 2),
            metadata: ItemMetadata::new("gamma", "kb"),
            node_properties: Properties::new(),
        })
        .unwrap();

    let memory = open_engine(dir.path());
    let options = SearchOptions {
        k: Some(1),
        graph_depth: Some(0),
        rerank: Some(false),
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    };

    // Both sides present
    let response = memory.search("gamma", &options, &ctx()).unwrap();
    assert_eq!(response.results[0].id, "kb:C");
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:C"}) RETURN n"#)
        .unwrap();
    assert_eq!(nodes.nodes.len(), 1);

    // A retry of the same logical add observes the completed transaction
    let retry = memory.add_document(&Document::new("C", "gamma"), Some("kb"), &ctx());
    assert!(matches!(retry, Err(EngramError::Conflict(_))));
}

/// Crash before the record became durable, with one store already written:
/// reopening must undo the partial side.
#[test]
fn partial_state_without_record_is_undone() {
    let dir = tempfile::tempdir().unwrap();
    {
        let memory = open_engine(dir.path());
        memory
            .create_collection("kb", DIM, Metric::Cosine, None, vec![])
            .unwrap();
        memory
            .add_document(&Document::new("keeper", "gamma"), Some("kb"), &ctx())
            .unwrap();
        memory.close().unwrap();
    }

    // Graph-side-only partial state: a Document node with no vector item
    // and no journal record explaining it
    {
        let graph = engram_core::GraphStore::open(&dir.path().join("kb").join("graph.db")).unwrap();
        graph
            .upsert_node("kb:torn", "Document", &Properties::new())
            .unwrap();
    }

    let memory = open_engine(dir.path());

    // The torn document was swept; the committed one survived
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:torn"}) RETURN n"#)
        .unwrap();
    assert!(nodes.nodes.is_empty());
    let keeper = memory
        .graph_query(r#"MATCH (n {id: "kb:keeper"}) RETURN n"#)
        .unwrap();
    assert_eq!(keeper.nodes.len(), 1);

    // A retry of the torn add now succeeds cleanly
    let retried = memory
        .add_document(&Document::new("torn", "gamma"), Some("kb"), &ctx())
        .unwrap();
    assert_eq!(retried, "kb:torn");
}

/// A delete record is redone on reopen: both sides end up absent.
#[test]
fn durable_delete_record_is_redone() {
    let dir = tempfile::tempdir().unwrap();
    {
        let memory = open_engine(dir.path());
        memory
            .create_collection("kb", DIM, Metric::Cosine, None, vec![])
            .unwrap();
        memory
            .add_document(&Document::new("D", "gamma"), Some("kb"), &ctx())
            .unwrap();
        memory.close().unwrap();
    }

    let journal = Journal::new(dir.path().join("kb").join("journal.log"));
    journal
        .append(&JournalRecord::DeleteDocument {
            txn: "crashed-delete".into(),
            ns_id: "kb:D".into(),
        })
        .unwrap();

    let memory = open_engine(dir.path());
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:D"}) RETURN n"#)
        .unwrap();
    assert!(nodes.nodes.is_empty());

    let options = SearchOptions {
        k: Some(5),
        graph_depth: Some(0),
        rerank: Some(false),
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    };
    let response = memory.search("gamma", &options, &ctx()).unwrap();
    assert!(response.results.iter().all(|r| r.id != "kb:D"));
}

/// A clean close leaves no journal on disk.
#[test]
fn clean_close_leaves_no_journal() {
    let dir = tempfile::tempdir().unwrap();
    {
        let memory = open_engine(dir.path());
        memory
            .create_collection("kb", DIM, Metric::Cosine, None, vec![])
            .unwrap();
        memory
            .add_document(&Document::new("A", "gamma"), Some("kb"), &ctx())
            .unwrap();
        memory.close().unwrap();
    }

    let journal_path = dir.path().join("kb").join("journal.log");
    assert!(
        !journal_path.exists() || std::fs::metadata(&journal_path).unwrap().len() == 0,
        "clean close must not leave journal records"
    );

    // And everything is still there after reopening
    let memory = open_engine(dir.path());
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:A"}) RETURN n"#)
        .unwrap();
    assert_eq!(nodes.nodes.len(), 1);
}

/// Documents added and persisted survive a reopen with intact metadata.
#[test]
fn reopen_round_trip_preserves_documents() {
    let dir = tempfile::tempdir().unwrap();
    {
        let memory = open_engine(dir.path());
        memory
            .create_collection("kb", DIM, Metric::Cosine, None, vec![])
            .unwrap();
        memory
            .add_document(
                &Document::new("A", "gamma").with_title("Gamma notes"),
                Some("kb"),
                &ctx(),
            )
            .unwrap();
        memory.close().unwrap();
    }

    let memory = open_engine(dir.path());
    let options = SearchOptions {
        k: Some(1),
        graph_depth: Some(0),
        rerank: Some(false),
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    };
    let response = memory.search("gamma", &options, &ctx()).unwrap();
    assert_eq!(response.results[0].id, "kb:A");
    assert_eq!(response.results[0].title.as_deref(), Some("Gamma notes"));
}
