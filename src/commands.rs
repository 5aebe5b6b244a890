use anyhow::{Context, Result};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::KbError;
use crate::assistant::{Assistant, DraftRequest, OllamaGenerator};
use crate::config::{Config, get_config_dir, render_config};
use crate::crawler::DocumentCrawler;
use crate::crawler::extractor::ExtractorRegistry;
use crate::crawler::graph::GraphDriveClient;
use crate::database::{IndexedDocument, KnowledgeBaseStore};
use crate::embeddings::{Embedder, OllamaModelLoader};
use crate::indexer::{KnowledgeBase, KnowledgeBaseManager, KnowledgeBaseState};
use crate::retrieval::Retriever;

/// Load the configuration from `config_dir`, or the default application directory
#[inline]
pub fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let config_dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => get_config_dir()?,
    };
    Config::load(&config_dir)
}

/// Knowledge base backed by the configured store and Ollama embedding model.
/// Nothing is loaded or contacted until first use.
#[inline]
pub fn open_knowledge_base(config: &Config) -> Arc<KnowledgeBase> {
    let store = KnowledgeBaseStore::new(config.knowledge_base_dir());
    let loader = Arc::new(OllamaModelLoader::new(config.embedding.clone()));
    Arc::new(KnowledgeBase::new(store, Arc::new(Embedder::new(loader))))
}

/// Print the effective configuration, or write the defaults when `init` is set
#[inline]
pub fn show_config(config_dir: Option<&Path>, init: bool) -> Result<()> {
    if init {
        let base_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => get_config_dir()?,
        };
        let config = Config {
            base_dir,
            ..Config::default()
        };
        let path = config.config_file_path();
        if path.exists() {
            println!("Configuration already exists: {}", path.display());
            return Ok(());
        }
        config.save()?;
        println!("✅ Wrote default configuration to {}", path.display());
        println!("Set [library] site_name before running 'docs-rag rebuild'.");
        return Ok(());
    }

    let config = load_config(config_dir)?;
    println!("# {}", config.config_file_path().display());
    print!("{}", render_config(&config)?);
    Ok(())
}

/// Crawl the document library and replace the knowledge base
#[inline]
pub async fn rebuild(config_dir: Option<&Path>) -> Result<()> {
    let config = load_config(config_dir)?;
    let library = GraphDriveClient::from_env(&config.library)
        .context("Failed to set up the document library client")?;
    let crawler = DocumentCrawler::new(
        Arc::new(library),
        ExtractorRegistry::with_defaults(),
        config.library.supported_extensions.clone(),
    );
    let manager =
        KnowledgeBaseManager::new(open_knowledge_base(&config), crawler, config.chunking)?;

    info!(
        "Rebuilding knowledge base in {}",
        config.knowledge_base_dir().display()
    );
    let report = manager.rebuild().await?;

    println!("✅ Knowledge base rebuilt");
    println!("  Documents indexed: {}", report.document_count);
    println!("  Chunks indexed: {}", report.indexed_chunk_count);
    println!("  Duration: {:?}", report.duration);
    if !report.skipped.is_empty() {
        println!("  Skipped documents: {}", report.skipped.len());
        for skipped in &report.skipped {
            println!("   ⚠️  {} ({})", skipped.path, skipped.reason);
        }
    }
    Ok(())
}

/// Show the state of the persisted knowledge base
#[inline]
pub async fn show_status(config_dir: Option<&Path>) -> Result<()> {
    let config = load_config(config_dir)?;
    let kb = open_knowledge_base(&config);

    if let Err(e) = kb.ensure_loaded().await {
        warn!("Knowledge base could not be loaded: {}", e);
    }
    let status = kb.status();

    println!("📊 Knowledge Base Status");
    println!("{}", "=".repeat(50));
    println!("   Location: {}", config.knowledge_base_dir().display());
    println!("   State: {}", status.state);
    if status.state == KnowledgeBaseState::Ready {
        println!("   Documents: {}", status.document_count);
        println!("   Chunks: {}", status.chunk_count);
        println!("   Dimension: {}", status.dimension);
        if let Some(model) = &status.embedding_model {
            println!("   Embedding model: {}", model);
        }
        if let Some(built_at) = status.built_at {
            println!("   Built: {}", built_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    if let Some(error) = &status.last_error {
        println!("   ⚠️  Last error: {}", error);
    }
    if status.state != KnowledgeBaseState::Ready {
        println!();
        println!("💡 Use 'docs-rag rebuild' to build the knowledge base");
    }
    Ok(())
}

/// List the source documents of the knowledge base
#[inline]
pub async fn list_documents(config_dir: Option<&Path>) -> Result<()> {
    let config = load_config(config_dir)?;
    let kb = open_knowledge_base(&config);
    kb.ensure_loaded().await?;

    let documents = kb.list_documents_indexed()?;
    if documents.is_empty() {
        println!("The knowledge base holds no documents.");
        return Ok(());
    }

    println!("Indexed Documents ({} total):", documents.len());
    for document in &documents {
        print_document(document);
    }
    Ok(())
}

/// Retrieve context for `query` without generating an answer
#[inline]
pub async fn search(config_dir: Option<&Path>, query: &str, k: Option<usize>) -> Result<()> {
    let config = load_config(config_dir)?;
    let kb = open_knowledge_base(&config);
    kb.ensure_loaded().await?;

    let retriever = Retriever::new(kb, config.retrieval.clone());
    let k = k.unwrap_or(config.retrieval.top_k);
    let retrieved = retriever.retrieve(query, k).await?;

    if retrieved.is_empty() {
        println!("No relevant content found.");
        return Ok(());
    }

    for (rank, chunk) in retrieved.chunks.iter().enumerate() {
        println!(
            "{}. {} (distance {:.4}, {})",
            rank + 1,
            chunk.source_doc_name,
            chunk.distance,
            chunk.chunk_id
        );
    }
    println!();
    println!("{}", retrieved.context);
    print_sources(&retrieved.sources);
    Ok(())
}

/// Answer a question from the knowledge base
#[inline]
pub async fn ask(config_dir: Option<&Path>, question: &str, history: Option<&str>) -> Result<()> {
    let config = load_config(config_dir)?;
    let assistant = assistant(&config, true).await?;

    let answer = assistant.query(question, history.unwrap_or_default()).await?;

    println!("{}", answer.answer);
    print_sources(&answer.sources);
    Ok(())
}

/// Arguments of the `draft` command
#[derive(Debug, Clone, Default)]
pub struct DraftArgs {
    pub sender: String,
    pub subject: String,
    pub platform: String,
    pub user_name: Option<String>,
    /// Read the message body from this file instead of stdin
    pub body_file: Option<PathBuf>,
    pub style_files: Vec<PathBuf>,
}

/// Draft a reply to an incoming message
#[inline]
pub async fn draft(config_dir: Option<&Path>, args: DraftArgs) -> Result<()> {
    let config = load_config(config_dir)?;

    let body = match &args.body_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read message body: {}", path.display()))?,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read message body from stdin")?;
            body
        }
    };

    let style_examples = args
        .style_files
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read style example: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let request = DraftRequest {
        platform: args.platform,
        sender: args.sender,
        subject: args.subject,
        body,
        style_examples,
        user_name: args.user_name.unwrap_or_default(),
    };

    let assistant = assistant(&config, false).await?;
    let reply = assistant.draft_reply(&request).await?;

    println!("{}", reply.draft);
    print_sources(&reply.sources);
    Ok(())
}

/// Builds an assistant over the persisted knowledge base. With `require_loaded`
/// a knowledge base that cannot be loaded is an error; otherwise it is logged.
async fn assistant(config: &Config, require_loaded: bool) -> Result<Assistant> {
    let kb = open_knowledge_base(config);
    match kb.ensure_loaded().await {
        Ok(()) => {}
        Err(e) if !require_loaded => {
            warn!("Continuing without the knowledge base: {}", e);
        }
        Err(e @ KbError::RebuildRequired(_)) => {
            return Err(e).context("Run 'docs-rag rebuild' first");
        }
        Err(e) => return Err(e.into()),
    }

    let generator = OllamaGenerator::new(&config.generation)?;
    let retriever = Retriever::new(kb, config.retrieval.clone());
    Ok(Assistant::new(retriever, Arc::new(generator)))
}

fn print_sources(sources: &[IndexedDocument]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for source in sources {
        print_document(source);
    }
}

fn print_document(document: &IndexedDocument) {
    match &document.url {
        Some(url) => println!("  📄 {} ({})", document.path, url),
        None => println!("  📄 {}", document.path),
    }
}
