//! Process-wide wiring.
//!
//! The [`VectorStore`] is opened exactly once, here, and shared by handle
//! with the ingestion pipeline and the query engine. Nothing else opens the
//! data directory.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::GenerationRouter;
use crate::ingest::IngestPipeline;
use crate::rag::QueryEngine;
use crate::server::AppState;
use crate::store::VectorStore;
use crate::watch::{spawn_watcher, WatchHandle};

pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<VectorStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub engine: Arc<QueryEngine>,
}

impl App {
    /// Open the store and build the pipeline and query engine from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let router = GenerationRouter::from_config(&config.generation)?;
        Self::open_with(config, embedder, router).await
    }

    /// Like [`open`](Self::open) with the capabilities supplied by the caller.
    pub async fn open_with(
        config: Config,
        embedder: Arc<dyn crate::embedding::Embedder>,
        router: GenerationRouter,
    ) -> Result<Self> {
        let store = VectorStore::open(&config, embedder)
            .await
            .with_context(|| format!("Failed to open vector store in {}", config.data.dir.display()))?;
        let store = Arc::new(store);

        let pipeline = Arc::new(IngestPipeline::new(store.clone(), &config.watch));
        let engine = Arc::new(QueryEngine::new(store.clone(), router, &config.retrieval));

        Ok(Self {
            config: Arc::new(config),
            store,
            pipeline,
            engine,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            pipeline: self.pipeline.clone(),
        }
    }

    /// Ingest files in the watch directory that are not stored yet, then
    /// start watching it.
    ///
    /// Returns `None` when watching is disabled.
    pub async fn start_watching(&self) -> Result<Option<WatchHandle>> {
        let watch = &self.config.watch;
        if !watch.enabled {
            return Ok(None);
        }

        std::fs::create_dir_all(&watch.dir)
            .with_context(|| format!("Failed to create watch directory: {}", watch.dir.display()))?;
        if watch.ingest_existing {
            self.pipeline.ingest_unseen(&watch.dir).await?;
        }
        Ok(Some(spawn_watcher(self.pipeline.clone(), watch)?))
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}
