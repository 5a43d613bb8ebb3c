//! Ingestion pipeline
//!
//! A transducer from parsed documents to unified-memory calls: chunk at
//! paragraph boundaries, insert chunks as documents, extract citations into
//! CITES/LINKS_TO edges (deferred until targets exist), and build the
//! markdown heading tree as Section nodes under a Source root. Progress is
//! reported stage by stage to an external observer.

mod chunker;
mod citations;

pub use chunker::{Chunk, ChunkConfig, chunk_text, split_paragraphs, split_sentences};
pub use citations::{Citation, CitationKind, extract_citations};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ctx::OpContext;
use crate::error::Result;
use crate::graph::{
    EDGE_CITES, EDGE_DERIVED_FROM, EDGE_LINKS_TO, EDGE_PARENT_OF, NODE_SECTION, NODE_SOURCE,
    Properties,
};
use crate::unified::{Document, UnifiedMemory};

// ============================================================================
// TYPES
// ============================================================================

/// Pipeline stages reported to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    /// Upstream parsing (external; reported for completeness)
    Parsing,
    /// Paragraph chunking
    Chunking,
    /// Embedding chunk text
    Embedding,
    /// Writing to the unified store
    Inserting,
    /// Post-insert learning passes
    Learning,
}

/// External progress observer
pub trait ProgressObserver: Send + Sync {
    /// Called with the current stage and progress in [0, 100]
    fn on_progress(&self, stage: IngestStage, progress: f32);
}

/// Observer that ignores everything
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _stage: IngestStage, _progress: f32) {}
}

/// Input format of a parsed document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocFormat {
    /// Markdown (headings become Section nodes)
    Markdown,
    /// Plain text
    #[default]
    PlainText,
}

/// A document already parsed by an upstream format reader
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Stable local id
    pub id: String,
    /// Original filename, when known
    pub filename: Option<String>,
    /// Title, when known
    pub title: Option<String>,
    /// Full text
    pub text: String,
    /// Input format
    pub format: DocFormat,
}

/// What a pipeline run did
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Documents processed
    pub documents: usize,
    /// Chunks inserted as unified documents
    pub chunks_inserted: usize,
    /// Chunk ids that failed to insert
    pub chunk_failures: Vec<String>,
    /// Citation edges created in the second pass
    pub citation_edges: usize,
    /// Citations whose target never materialised
    pub unresolved_citations: usize,
    /// Section nodes created from markdown headings
    pub section_nodes: usize,
}

// ============================================================================
// PIPELINE
// ============================================================================

struct PendingCitation {
    from_chunk: String,
    kind: CitationKind,
    key: String,
}

/// Parsed-document → unified-memory transducer
pub struct IngestPipeline<'a> {
    memory: &'a UnifiedMemory,
    collection: Option<String>,
    chunking: ChunkConfig,
    observer: Box<dyn ProgressObserver>,
}

impl<'a> IngestPipeline<'a> {
    /// Pipeline into the given collection (None = default)
    pub fn new(memory: &'a UnifiedMemory, collection: Option<&str>) -> Self {
        Self {
            memory,
            collection: collection.map(str::to_string),
            chunking: ChunkConfig::default(),
            observer: Box::new(NoopObserver),
        }
    }

    /// Override the chunking parameters
    pub fn with_chunking(mut self, chunking: ChunkConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Attach a progress observer
    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run the pipeline over a batch of parsed documents
    pub fn run(&self, docs: &[ParsedDocument], ctx: &OpContext) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let collection = self.memory.collection_handle(self.collection.as_deref())?;
        self.observer.on_progress(IngestStage::Parsing, 100.0);

        // Resolution index for deferred citations: id, filename stem, and
        // title all resolve to the document's root chunk
        let mut targets: HashMap<String, String> = HashMap::new();
        let mut pending: Vec<PendingCitation> = Vec::new();

        let total_docs = docs.len().max(1);
        for (doc_index, doc) in docs.iter().enumerate() {
            ctx.check()?;
            report.documents += 1;

            let chunks = chunk_text(&doc.text, &self.chunking);
            self.observer.on_progress(
                IngestStage::Chunking,
                (doc_index + 1) as f32 / total_docs as f32 * 100.0,
            );
            if chunks.is_empty() {
                continue;
            }

            let root_id = self.insert_chunks(doc, &chunks, &mut report, &mut pending, ctx)?;

            // Register resolution keys for the second pass
            targets.insert(doc.id.to_lowercase(), root_id.clone());
            if let Some(title) = &doc.title {
                targets.insert(title.to_lowercase(), root_id.clone());
            }
            if let Some(filename) = &doc.filename {
                let stem = filename
                    .rsplit_once('.')
                    .map(|(stem, _)| stem)
                    .unwrap_or(filename);
                targets.insert(stem.to_lowercase(), root_id.clone());
            }

            if doc.format == DocFormat::Markdown {
                report.section_nodes += self.build_section_tree(doc, &chunks, &collection)?;
            }
        }

        // Second pass: citations whose target now exists become edges
        self.observer.on_progress(IngestStage::Learning, 0.0);
        for citation in pending {
            let Some(target) = targets.get(&citation.key) else {
                report.unresolved_citations += 1;
                continue;
            };
            if *target == citation.from_chunk {
                continue;
            }
            let edge_type = match citation.kind {
                CitationKind::WikiLink => EDGE_LINKS_TO,
                _ => EDGE_CITES,
            };
            match self
                .memory
                .add_relationship(&citation.from_chunk, target, edge_type, None)
            {
                Ok(()) => report.citation_edges += 1,
                Err(e) => {
                    tracing::debug!(error = %e, "citation edge skipped");
                    report.unresolved_citations += 1;
                }
            }
        }
        self.observer.on_progress(IngestStage::Learning, 100.0);

        Ok(report)
    }

    /// Insert a document's chunks; returns the root chunk's namespaced id
    fn insert_chunks(
        &self,
        doc: &ParsedDocument,
        chunks: &[Chunk],
        report: &mut IngestReport,
        pending: &mut Vec<PendingCitation>,
        ctx: &OpContext,
    ) -> Result<String> {
        let collection = self.memory.collection_handle(self.collection.as_deref())?;
        let single = chunks.len() == 1;

        // A multi-chunk document gets a Source root carrying provenance;
        // chunks hang off it with DERIVED_FROM
        let source_node = format!("{}#doc", collection.namespace_id(&doc.id));
        if !single {
            let mut props = Properties::new();
            if let Some(filename) = &doc.filename {
                props.insert(
                    "filename".into(),
                    serde_json::Value::String(filename.clone()),
                );
            }
            props.insert(
                "totalChunks".into(),
                serde_json::Value::from(chunks.len()),
            );
            collection
                .graph()
                .upsert_node(&source_node, NODE_SOURCE, &props)
                .map_err(crate::error::EngramError::from)?;
        }

        let mut root_id = None;
        let total = chunks.len();
        for chunk in chunks {
            ctx.check()?;
            let local_id = if single {
                doc.id.clone()
            } else {
                format!("{}.{}", doc.id, chunk.index)
            };

            let mut document = Document::new(&local_id, &chunk.text);
            document.title = match (&doc.title, chunk.heading_path.last()) {
                (Some(title), Some(heading)) => Some(format!("{title} / {heading}")),
                (Some(title), None) => Some(title.clone()),
                (None, Some(heading)) => Some(heading.clone()),
                (None, None) => None,
            };
            document.source = doc.filename.clone();
            document
                .extra
                .insert("chunkIndex".into(), serde_json::Value::from(chunk.index));
            document
                .extra
                .insert("totalChunks".into(), serde_json::Value::from(chunk.total));
            document.extra.insert(
                "originalId".into(),
                serde_json::Value::String(doc.id.clone()),
            );
            if let Some(filename) = &doc.filename {
                document.extra.insert(
                    "originalFilename".into(),
                    serde_json::Value::String(filename.clone()),
                );
            }

            self.observer.on_progress(
                IngestStage::Embedding,
                (chunk.index + 1) as f32 / total as f32 * 100.0,
            );
            match self
                .memory
                .add_document(&document, self.collection.as_deref(), ctx)
            {
                Ok(ns_id) => {
                    report.chunks_inserted += 1;
                    if root_id.is_none() {
                        root_id = Some(ns_id.clone());
                    }
                    for citation in extract_citations(&chunk.text) {
                        pending.push(PendingCitation {
                            from_chunk: ns_id.clone(),
                            kind: citation.kind,
                            key: citation.key,
                        });
                    }
                    if !single {
                        collection
                            .graph()
                            .upsert_edge(&ns_id, &source_node, EDGE_DERIVED_FROM, &Properties::new())
                            .map_err(crate::error::EngramError::from)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(chunk = %local_id, error = %e, "chunk insert failed");
                    report.chunk_failures.push(local_id);
                }
            }
            self.observer.on_progress(
                IngestStage::Inserting,
                (chunk.index + 1) as f32 / total as f32 * 100.0,
            );
        }

        Ok(root_id.unwrap_or_else(|| collection.namespace_id(&doc.id)))
    }

    /// Build Section nodes and PARENT_OF edges from the heading structure
    fn build_section_tree(
        &self,
        doc: &ParsedDocument,
        chunks: &[Chunk],
        collection: &crate::collection::Collection,
    ) -> Result<usize> {
        let root = format!("{}#doc", collection.namespace_id(&doc.id));
        if collection
            .graph()
            .get_node(&root)
            .map_err(crate::error::EngramError::from)?
            .is_none()
        {
            collection
                .graph()
                .upsert_node(&root, NODE_SOURCE, &Properties::new())
                .map_err(crate::error::EngramError::from)?;
        }

        let mut created = 0;
        let mut seen: Vec<Vec<String>> = Vec::new();
        for chunk in chunks {
            for depth in 1..=chunk.heading_path.len() {
                let path = chunk.heading_path[..depth].to_vec();
                if seen.contains(&path) {
                    continue;
                }
                seen.push(path.clone());

                let section_id = section_node_id(collection, &doc.id, &path);
                let mut props = Properties::new();
                props.insert(
                    "heading".into(),
                    serde_json::Value::String(path[depth - 1].clone()),
                );
                props.insert("level".into(), serde_json::Value::from(depth));
                collection
                    .graph()
                    .upsert_node(&section_id, NODE_SECTION, &props)
                    .map_err(crate::error::EngramError::from)?;
                created += 1;

                let parent = if depth == 1 {
                    root.clone()
                } else {
                    section_node_id(collection, &doc.id, &path[..depth - 1])
                };
                collection
                    .graph()
                    .upsert_edge(&parent, &section_id, EDGE_PARENT_OF, &Properties::new())
                    .map_err(crate::error::EngramError::from)?;
            }
        }
        Ok(created)
    }
}

fn section_node_id(
    collection: &crate::collection::Collection,
    doc_id: &str,
    path: &[String],
) -> String {
    let slug: String = path
        .join("-")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}#{}", collection.namespace_id(doc_id), slug)
}

// ============================================================================
// TESTS
// ============================================================================
