//! End-to-end behaviour of the unified facade

mod common;

use common::{DIM, FixtureEmbedder, basis};
use engram_core::{
    Document, EngineConfig, EngramError, Metric, OpContext, SearchOptions, UnifiedMemory,
};

fn ctx() -> OpContext {
    OpContext::none()
}

/// Engine with a `kb` collection and embeddings pinned so that
/// "alpha" -> e0, "beta" -> e1, "alpha query" -> 0.9*e0 + 0.1*e1
fn two_doc_store() -> (tempfile::TempDir, UnifiedMemory) {
    let dir = tempfile::tempdir().unwrap();
    let mut near_alpha = vec![0.0; DIM];
    near_alpha[0] = 0.9;
    near_alpha[1] = 0.1;

    let embedder = FixtureEmbedder::new([
        ("alpha", basis(DIM, 0)),
        ("beta", basis(DIM, 1)),
        ("alpha query", near_alpha),
    ]);
    let memory =
        UnifiedMemory::open_with_provider(dir.path(), EngineConfig::default(), embedder).unwrap();

    memory
        .create_collection("kb", DIM, Metric::Cosine, None, vec![])
        .unwrap();
    memory
        .add_document(&Document::new("A", "alpha"), Some("kb"), &ctx())
        .unwrap();
    memory
        .add_document(&Document::new("B", "beta"), Some("kb"), &ctx())
        .unwrap();
    (dir, memory)
}

fn vector_only(k: usize) -> SearchOptions {
    SearchOptions {
        k: Some(k),
        graph_depth: Some(0),
        rerank: Some(false),
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    }
}

// ----------------------------------------------------------------------
// Scenario: two-doc retrieval
// ----------------------------------------------------------------------

#[test]
fn two_doc_retrieval_orders_by_similarity() {
    let (_dir, memory) = two_doc_store();

    let response = memory.search("alpha query", &vector_only(2), &ctx()).unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].id, "kb:A");
    assert_eq!(response.results[1].id, "kb:B");
    assert!(response.results[0].vector_score > response.results[1].vector_score);
    for result in &response.results {
        assert!((0.0..=1.0).contains(&result.combined_score));
    }
}

// ----------------------------------------------------------------------
// Round-trip laws
// ----------------------------------------------------------------------

#[test]
fn add_then_search_returns_top_result_with_high_score() {
    let (_dir, memory) = two_doc_store();

    let response = memory.search("alpha", &vector_only(1), &ctx()).unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "kb:A");
    assert!(response.results[0].combined_score >= 0.9);
}

#[test]
fn add_delete_search_is_empty() {
    let (_dir, memory) = two_doc_store();
    memory.delete_document("A", Some("kb"), &ctx()).unwrap();
    memory.delete_document("B", Some("kb"), &ctx()).unwrap();

    let response = memory.search("alpha", &vector_only(5), &ctx()).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn create_collection_appears_in_listing() {
    let dir = tempfile::tempdir().unwrap();
    let memory = UnifiedMemory::open(dir.path(), EngineConfig::default()).unwrap();

    memory
        .create_collection("papers", 128, Metric::Euclidean, None, vec![])
        .unwrap();

    let listed = memory.list_collections().unwrap();
    let entry = listed.iter().find(|c| c.name == "papers").unwrap();
    assert_eq!(entry.dimension, 128);
    assert_eq!(entry.metric, Metric::Euclidean);
}

// ----------------------------------------------------------------------
// Scenario: graph expansion
// ----------------------------------------------------------------------

#[test]
fn graph_expansion_attaches_related_nodes() {
    let (_dir, memory) = two_doc_store();
    memory
        .add_relationship("kb:A", "kb:B", "RELATES_TO", None)
        .unwrap();

    let options = SearchOptions {
        k: Some(2),
        include_related: Some(true),
        graph_depth: Some(1),
        rerank: Some(false),
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    };
    let response = memory.search("alpha", &options, &ctx()).unwrap();

    let top = &response.results[0];
    assert_eq!(top.id, "kb:A");
    let related = top.related_nodes.as_ref().unwrap();
    assert!(related.iter().any(|n| n.id == "kb:B" && n.depth == 1));

    let beta = response.results.iter().find(|r| r.id == "kb:B").unwrap();
    assert!(top.graph_score > beta.graph_score);
}

// ----------------------------------------------------------------------
// Scenario: atomic delete
// ----------------------------------------------------------------------

#[test]
fn delete_removes_vector_node_and_edges() {
    let (_dir, memory) = two_doc_store();
    memory
        .add_relationship("kb:A", "kb:B", "RELATES_TO", None)
        .unwrap();

    memory.delete_document("kb:A", Some("kb"), &ctx()).unwrap();

    let response = memory.search("alpha", &vector_only(5), &ctx()).unwrap();
    assert!(response.results.iter().all(|r| r.id != "kb:A"));

    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:A"}) RETURN n"#)
        .unwrap();
    assert!(nodes.nodes.is_empty());

    let edges = memory
        .graph_query("MATCH (a)-[r:RELATES_TO]->(b) RETURN a, r, b")
        .unwrap();
    assert!(edges.edges.is_empty());

    // Deleting again reports NotFound
    assert!(matches!(
        memory.delete_document("kb:A", Some("kb"), &ctx()),
        Err(EngramError::NotFound { .. })
    ));
}

// ----------------------------------------------------------------------
// Scenario: cross-collection fan-out
// ----------------------------------------------------------------------

#[test]
fn cross_collection_fanout_fuses_by_rank() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = FixtureEmbedder::new([("probe", basis(DIM, 0))]);
    let memory =
        UnifiedMemory::open_with_provider(dir.path(), EngineConfig::default(), embedder).unwrap();

    for name in ["kb1", "kb2"] {
        memory
            .create_collection(name, DIM, Metric::Cosine, None, vec![])
            .unwrap();
        for i in 0..3 {
            memory
                .add_document(
                    &Document::new(format!("doc-{i}"), format!("{name} text number {i}")),
                    Some(name),
                    &ctx(),
                )
                .unwrap();
        }
    }

    let options = SearchOptions {
        k: Some(3),
        graph_depth: Some(0),
        rerank: Some(false),
        collections: Some(vec!["kb1".into(), "kb2".into()]),
        ..Default::default()
    };
    let response = memory.search("probe", &options, &ctx()).unwrap();

    assert_eq!(response.results.len(), 3);
    for result in &response.results {
        assert!(
            result.id.starts_with("kb1:") || result.id.starts_with("kb2:"),
            "unprefixed id {}",
            result.id
        );
    }
    // Fused ordering is monotone in combined score
    for pair in response.results.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
}

// ----------------------------------------------------------------------
// Scenario: trajectory lifecycle
// ----------------------------------------------------------------------

#[test]
fn trajectory_lifecycle_and_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let memory = UnifiedMemory::open(dir.path(), EngineConfig::default()).unwrap();

    let t = memory.begin_trajectory("plan X", Some("hybrid")).unwrap();
    memory.record_step(&t, "step1", 0.8).unwrap();
    memory.record_step(&t, "step2", 0.4).unwrap();
    memory.end_trajectory(&t, 0.7).unwrap();

    assert!(matches!(
        memory.record_step(&t, "step3", 0.1),
        Err(EngramError::InvalidInput(_))
    ));

    // More completed trajectories about planning, then a clustering pass
    for i in 0..3 {
        let id = memory
            .begin_trajectory(&format!("plan variant {i}"), None)
            .unwrap();
        memory.record_step(&id, "plan the approach", 0.6).unwrap();
        memory.end_trajectory(&id, 0.8).unwrap();
    }
    memory.tick().unwrap();

    let patterns = memory.find_patterns("plan", 1).unwrap();
    assert_eq!(patterns.len(), 1);
    assert!(patterns[0].cluster_size >= 3);
    let all_exemplars: Vec<&String> = patterns
        .iter()
        .flat_map(|p| p.exemplar_trajectories.iter())
        .collect();
    assert!(all_exemplars.contains(&&t));
}

// ----------------------------------------------------------------------
// Boundary cases
// ----------------------------------------------------------------------

#[test]
fn dimension_bounds_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let memory = UnifiedMemory::open(dir.path(), EngineConfig::default()).unwrap();

    assert!(memory.create_collection("lo", 64, Metric::Cosine, None, vec![]).is_ok());
    assert!(memory.create_collection("hi", 4096, Metric::Cosine, None, vec![]).is_ok());
    assert!(matches!(
        memory.create_collection("bad", 63, Metric::Cosine, None, vec![]),
        Err(EngramError::InvalidInput(_))
    ));
}

#[test]
fn empty_text_and_empty_id_rejected() {
    let (_dir, memory) = two_doc_store();
    assert!(matches!(
        memory.add_document(&Document::new("x", "   "), Some("kb"), &ctx()),
        Err(EngramError::InvalidInput(_))
    ));
    assert!(matches!(
        memory.add_document(&Document::new("", "text"), Some("kb"), &ctx()),
        Err(EngramError::InvalidInput(_))
    ));
}

#[test]
fn k_zero_returns_empty() {
    let (_dir, memory) = two_doc_store();
    let response = memory.search("alpha", &vector_only(0), &ctx()).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn duplicate_add_conflicts_without_partial_state() {
    let (_dir, memory) = two_doc_store();
    let result = memory.add_document(&Document::new("A", "alpha"), Some("kb"), &ctx());
    assert!(matches!(result, Err(EngramError::Conflict(_))));

    // Still exactly one A in both stores
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:A"}) RETURN n"#)
        .unwrap();
    assert_eq!(nodes.nodes.len(), 1);
}

#[test]
fn duplicate_edge_insertion_is_idempotent() {
    let (_dir, memory) = two_doc_store();
    memory
        .add_relationship("kb:A", "kb:B", "RELATES_TO", None)
        .unwrap();
    memory
        .add_relationship("kb:A", "kb:B", "RELATES_TO", None)
        .unwrap();

    let stats = memory.get_stats().unwrap();
    assert_eq!(stats.graph["kb"].edge_count, 1);
}

#[test]
fn explicit_unknown_collection_is_not_found() {
    let (_dir, memory) = two_doc_store();
    assert!(matches!(
        memory.add_document(&Document::new("x", "text"), Some("nope"), &ctx()),
        Err(EngramError::NotFound { .. })
    ));
    let options = SearchOptions {
        collections: Some(vec!["nope".into()]),
        ..Default::default()
    };
    assert!(matches!(
        memory.search("alpha", &options, &ctx()),
        Err(EngramError::NotFound { .. })
    ));
}

#[test]
fn malformed_cypher_is_invalid_input() {
    let (_dir, memory) = two_doc_store();
    assert!(matches!(
        memory.graph_query("SELECT * FROM nodes"),
        Err(EngramError::InvalidInput(_))
    ));
}

// ----------------------------------------------------------------------
// Ancillary surface
// ----------------------------------------------------------------------

#[test]
fn find_related_returns_documents() {
    let (_dir, memory) = two_doc_store();
    memory
        .add_relationship("kb:A", "kb:B", "RELATES_TO", None)
        .unwrap();

    let related = memory.find_related("kb:A", Some(1), None).unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].id, "kb:B");
    assert!(related[0].graph_score > 0.0);
}

#[test]
fn stats_cover_all_subsystems() {
    let (_dir, memory) = two_doc_store();
    let stats = memory.get_stats().unwrap();

    let kb = stats.collections.iter().find(|c| c.name == "kb").unwrap();
    assert_eq!(kb.vector_count, 2);
    assert_eq!(kb.document_count, 2);
    assert_eq!(stats.vector["kb"].total, 2);
    assert_eq!(stats.graph["kb"].node_count, 2);
    assert!(stats.cognitive.enabled);
}

#[test]
fn close_is_idempotent_and_final() {
    let (_dir, memory) = two_doc_store();
    memory.close().unwrap();
    memory.close().unwrap();
    assert!(memory.search("alpha", &vector_only(1), &ctx()).is_err());
}

#[test]
fn cancelled_context_stops_before_commit() {
    let (_dir, memory) = two_doc_store();
    let token = engram_core::CancelToken::new();
    token.cancel();
    let cancelled = OpContext::with_token(token);

    let result = memory.add_document(&Document::new("C", "gamma"), Some("kb"), &cancelled);
    assert!(matches!(result, Err(EngramError::Cancelled)));

    // Nothing leaked into either store
    let nodes = memory
        .graph_query(r#"MATCH (n {id: "kb:C"}) RETURN n"#)
        .unwrap();
    assert!(nodes.nodes.is_empty());
}

#[test]
fn batch_add_reports_per_item_outcomes() {
    let (_dir, memory) = two_doc_store();
    let docs = vec![
        Document::new("C", "gamma text"),
        Document::new("A", "alpha"), // duplicate
        Document::new("D", "delta text"),
    ];
    let outcomes = memory.add_documents(&docs, Some("kb"), &ctx()).unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].outcome.is_ok());
    assert!(matches!(
        outcomes[1].outcome,
        Err(EngramError::Conflict(_))
    ));
    assert!(outcomes[2].outcome.is_ok());
}

#[test]
fn empty_collection_list_returns_empty() {
    let (_dir, memory) = two_doc_store();
    // A no-cue query routes Hybrid (rerank on, graph depth 2); an empty
    // target set must still come back empty instead of panicking
    let options = SearchOptions {
        collections: Some(vec![]),
        ..Default::default()
    };
    let response = memory.search("alpha", &options, &ctx()).unwrap();
    assert!(response.results.is_empty());
    assert!(!response.partial);
}

#[test]
fn mixed_dimension_fanout_reranks_each_collection() {
    let dir = tempfile::tempdir().unwrap();
    let memory = UnifiedMemory::open(dir.path(), EngineConfig::default()).unwrap();

    // Two collections with different dimensions, each with a linked pair
    // so reranking has neighbourhoods to attend over
    for (name, dimension) in [("kb64", 64), ("kb128", 128)] {
        memory
            .create_collection(name, dimension, Metric::Cosine, None, vec![])
            .unwrap();
        memory
            .add_document(
                &Document::new("a", format!("{name} anchor document text")),
                Some(name),
                &ctx(),
            )
            .unwrap();
        memory
            .add_document(
                &Document::new("b", format!("{name} companion document text")),
                Some(name),
                &ctx(),
            )
            .unwrap();
        memory
            .add_relationship(&format!("{name}:a"), &format!("{name}:b"), "RELATES_TO", None)
            .unwrap();
    }

    let options = SearchOptions {
        k: Some(4),
        include_related: Some(true),
        graph_depth: Some(1),
        rerank: Some(true),
        collections: Some(vec!["kb64".into(), "kb128".into()]),
        ..Default::default()
    };
    let response = memory
        .search("anchor document text", &options, &ctx())
        .unwrap();
    assert_eq!(response.results.len(), 4);

    // Both anchors carry a neighbourhood; the attention rerank must have
    // produced a real graph score for each, not just for one collection
    for name in ["kb64", "kb128"] {
        let anchor = response
            .results
            .iter()
            .find(|r| r.id == format!("{name}:a"))
            .unwrap();
        assert!(anchor.graph_score > 0.0);
        assert!((0.0..=1.0).contains(&anchor.graph_score));
        let related = anchor.related_nodes.as_ref().unwrap();
        assert!(related.iter().any(|n| n.id == format!("{name}:b")));
    }
}

#[test]
fn router_shapes_execution() {
    let (_dir, memory) = two_doc_store();
    // No explicit options: the router picks the plan
    let options = SearchOptions {
        collections: Some(vec!["kb".into()]),
        ..Default::default()
    };
    let response = memory.search("find alpha", &options, &ctx()).unwrap();
    assert_eq!(response.route.intent, engram_core::QueryIntent::Retrieval);
    assert!(!response.results.is_empty());
}
