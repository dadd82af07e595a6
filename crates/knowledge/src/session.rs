//! A chat session: one document index plus one conversation.
//!
//! Sessions share nothing with each other. Within a session only one
//! question runs at a time; asking again cancels the previous answer and
//! waits for its task to finish before starting.

use crate::chunker::{chunk_segments, Chunk, ChunkerConfig};
use crate::embeddings::{create_provider, embed_in_batches, EmbeddingConfig, EmbeddingProvider};
use crate::loader::{expand_paths, extract_segments, joined_text, read_document, Document};
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::progress::ProgressReporter;
use crate::qa::{AnswerEvent, AnswerStream, QaPipeline, QaSettings, QaState, ANSWER_CHANNEL_CAPACITY};
use crate::retriever::Retriever;
use crate::types::{Answer, DocumentSummary, UploadSummary};
use crate::vector_index::{InMemoryIndex, VectorIndex};
use inkchat_core::{AppConfig, AppError, AppResult, HistoryPolicy};
use inkchat_llm::create_client;
use inkchat_prompt::resolve_prompt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Upload-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub chunker: ChunkerConfig,
    pub max_upload_bytes: u64,
    pub embedding_batch_size: usize,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            chunker: ChunkerConfig::new(config.rag.chunk_size, config.rag.chunk_overlap)?,
            max_upload_bytes: config.rag.max_upload_bytes,
            embedding_batch_size: config.rag.embedding_batch_size,
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let rag = inkchat_core::RagConfig::default();
        Self {
            chunker: ChunkerConfig::default(),
            max_upload_bytes: rag.max_upload_bytes,
            embedding_batch_size: rag.embedding_batch_size,
        }
    }
}

/// The question currently being answered.
struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl InFlight {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Answer task panicked: {}", e);
            }
        }
    }
}

pub struct Session {
    id: Uuid,
    pipeline: Arc<QaPipeline>,
    settings: SessionSettings,
    index: RwLock<Option<Arc<dyn VectorIndex>>>,
    memory: Arc<Mutex<ConversationMemory>>,
    state: Arc<Mutex<QaState>>,
    in_flight: tokio::sync::Mutex<Option<InFlight>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .field("chunks", &self.index_len())
            .field("turns", &self.memory.lock().len())
            .finish()
    }
}

impl Session {
    pub fn new(pipeline: QaPipeline, settings: SessionSettings) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "Session started");

        Self {
            id,
            pipeline: Arc::new(pipeline),
            settings,
            index: RwLock::new(None),
            memory: Arc::new(Mutex::new(ConversationMemory::new())),
            state: Arc::new(Mutex::new(QaState::Idle)),
            in_flight: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build a session with the clients and prompt named by `config`.
    ///
    /// Fails with `MissingCredential` when a hosted provider has no key.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;

        let chat = config.provider.as_str();
        let llm = create_client(
            &config.provider_kind(chat),
            config.endpoint(chat).as_deref(),
            config.resolve_api_key(chat).as_deref(),
        )?;

        let embedder = create_provider(&EmbeddingConfig::from_app_config(config)?)?;
        let prompt = resolve_prompt(&config.workspace)?;

        tracing::info!(
            chat_provider = %llm.provider_name(),
            model = %config.model,
            embedding_provider = %embedder.provider_name(),
            embedding_model = %embedder.model_name(),
            prompt = %prompt.id,
            "Creating session"
        );

        let pipeline = QaPipeline::new(
            llm,
            Retriever::new(embedder, config.rag.top_k),
            prompt,
            QaSettings::from_config(config),
        );
        Ok(Self::new(pipeline, SessionSettings::from_config(config)?))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> QaState {
        *self.state.lock()
    }

    /// Chunks in the current index (0 without one).
    pub fn index_len(&self) -> usize {
        self.index.read().as_ref().map_or(0, |index| index.len())
    }

    pub fn has_documents(&self) -> bool {
        self.index_len() > 0
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        self.pipeline.retriever().embedder()
    }

    /// Load files (directories are expanded) and replace the index with one
    /// built from all of them.
    ///
    /// Any failure leaves the previous index and the history untouched.
    pub async fn upload(
        &self,
        paths: &[PathBuf],
        policy: HistoryPolicy,
        progress: &ProgressReporter,
    ) -> AppResult<UploadSummary> {
        let files = expand_paths(paths)?;
        let roots: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        progress.discover(files.len() as u64, &roots.join(", "));
        if files.is_empty() {
            return Err(AppError::Document(
                "No PDF, DOCX or TXT files found to upload".to_string(),
            ));
        }

        let mut documents = Vec::with_capacity(files.len());
        for path in &files {
            documents.push(read_document(path, self.settings.max_upload_bytes)?);
        }

        self.upload_documents(documents, policy, progress).await
    }

    /// Build a new index from documents already in memory and swap it in.
    ///
    /// With `HistoryPolicy::Clear` an answer still in flight is cancelled
    /// before the history is emptied, so it is never recorded.
    pub async fn upload_documents(
        &self,
        documents: Vec<Document>,
        policy: HistoryPolicy,
        progress: &ProgressReporter,
    ) -> AppResult<UploadSummary> {
        let total = documents.len() as u64;
        let mut seen = HashSet::new();
        let mut summaries = Vec::with_capacity(documents.len());
        let mut chunks: Vec<Chunk> = Vec::new();

        for (i, document) in documents.iter().enumerate() {
            if !seen.insert(document.fingerprint()) {
                tracing::info!("Skipping {}: same content as an earlier file", document.name);
                continue;
            }

            progress.parse(i as u64 + 1, total, &document.name);
            let segments = extract_segments(document)?;
            let doc_chunks = chunk_segments(&document.name, &segments, self.settings.chunker);
            progress.chunk(i as u64 + 1, total, &document.name, doc_chunks.len());

            if doc_chunks.is_empty() {
                tracing::warn!("No text extracted from {}", document.name);
            }

            summaries.push(DocumentSummary {
                name: document.name.clone(),
                format: document.format,
                segments: segments.len(),
                chunks: doc_chunks.len(),
                chars: joined_text(&segments).chars().count(),
            });
            chunks.extend(doc_chunks);
        }

        if chunks.is_empty() {
            let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
            return Err(AppError::Document(format!(
                "No text could be extracted from {}",
                names.join(", ")
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_in_batches(
            self.embedder().as_ref(),
            &texts,
            self.settings.embedding_batch_size,
            progress,
        )
        .await?;

        let chunk_count = chunks.len() as u64;
        progress.index(0, chunk_count);
        let mut index = InMemoryIndex::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            index.insert(chunk, embedding)?;
        }
        progress.index(chunk_count, chunk_count);

        let summary = UploadSummary {
            total_chunks: index.len(),
            dimensions: index.dimensions().unwrap_or(0),
            documents: summaries,
        };

        // Held across the swap so no question starts between stop and clear.
        let mut slot = self.in_flight.lock().await;
        if policy == HistoryPolicy::Clear {
            if let Some(previous) = slot.take() {
                tracing::debug!("Cancelling the answer about the previous documents");
                previous.stop().await;
            }
        }
        *self.index.write() = Some(Arc::new(index));
        if policy == HistoryPolicy::Clear {
            self.memory.lock().clear();
        }
        drop(slot);

        tracing::info!(
            session = %self.id,
            documents = summary.documents.len(),
            chunks = summary.total_chunks,
            dimensions = summary.dimensions,
            "Index replaced"
        );

        Ok(summary)
    }

    /// Ask and wait for the complete answer.
    pub async fn ask(&self, question: &str) -> AppResult<Answer> {
        self.ask_streaming(question).await?.collect_answer().await
    }

    /// Ask and receive the answer as a stream of increments.
    ///
    /// Any answer still in flight is cancelled first; it is not recorded.
    pub async fn ask_streaming(&self, question: &str) -> AppResult<AnswerStream> {
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(AppError::Other("Question must not be empty".to_string()));
        }
        if self.shutdown.is_cancelled() {
            return Err(AppError::Cancelled("The session is closed".to_string()));
        }

        let mut slot = self.in_flight.lock().await;
        if let Some(previous) = slot.take() {
            tracing::debug!("Cancelling the previous answer");
            previous.stop().await;
        }

        let index = self.index.read().clone();
        if index.as_ref().map_or(true, |i| i.is_empty()) {
            *self.state.lock() = QaState::Failed;
            return Err(AppError::Retrieval(
                "No documents have been uploaded yet. Upload a PDF, DOCX or TXT file first."
                    .to_string(),
            ));
        }

        let history = self.memory.lock().turns().to_vec();
        let (tx, rx) = mpsc::channel(ANSWER_CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();

        let task = AnswerTask {
            question,
            index,
            history,
            pipeline: self.pipeline.clone(),
            memory: self.memory.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
            events: tx,
        };
        let span = tracing::info_span!("question", session = %self.id);
        let handle = tokio::spawn(task.run().instrument(span));

        *slot = Some(InFlight {
            cancel: cancel.clone(),
            handle,
        });

        Ok(AnswerStream::new(rx, cancel))
    }

    pub fn clear_history(&self) {
        self.memory.lock().clear();
    }

    /// All turns, oldest first.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.memory.lock().turns().to_vec()
    }

    /// Cancel any answer, drop the index and the history.
    pub async fn reset(&self) {
        if let Some(previous) = self.in_flight.lock().await.take() {
            previous.stop().await;
        }
        *self.index.write() = None;
        self.memory.lock().clear();
        *self.state.lock() = QaState::Idle;
        tracing::info!(session = %self.id, "Session reset");
    }

    /// Cancel any answer and refuse further questions.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if let Some(previous) = self.in_flight.lock().await.take() {
            previous.stop().await;
        }
        tracing::debug!(session = %self.id, "Session closed");
    }
}

/// Everything the spawned answer task owns.
struct AnswerTask {
    question: String,
    index: Option<Arc<dyn VectorIndex>>,
    history: Vec<ConversationTurn>,
    pipeline: Arc<QaPipeline>,
    memory: Arc<Mutex<ConversationMemory>>,
    state: Arc<Mutex<QaState>>,
    cancel: CancellationToken,
    events: mpsc::Sender<AnswerEvent>,
}

impl AnswerTask {
    async fn run(self) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(AppError::Cancelled("The answer was cancelled".to_string()))
            }
            result = self.pipeline.run(
                &self.question,
                self.index.clone(),
                &self.history,
                &self.state,
                &self.events,
            ) => result,
        };

        let outcome = outcome.and_then(|answer| {
            let mut memory = self.memory.lock();
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled("The answer was cancelled".to_string()));
            }
            memory.append(self.question.clone(), answer.text.clone());
            Ok(answer)
        });

        match outcome {
            Ok(answer) => {
                *self.state.lock() = QaState::Idle;
                self.finish(AnswerEvent::Done(answer)).await;
            }
            Err(AppError::Cancelled(message)) => {
                tracing::debug!("{}", message);
                *self.state.lock() = QaState::Idle;
                let _ = self
                    .events
                    .try_send(AnswerEvent::Failed(AppError::Cancelled(message)));
            }
            Err(e) => {
                tracing::warn!("Question failed: {}", e);
                *self.state.lock() = QaState::Failed;
                self.finish(AnswerEvent::Failed(e)).await;
            }
        }
    }

    /// Deliver the final event unless the answer gets cancelled meanwhile.
    async fn finish(&self, event: AnswerEvent) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.events.send(event) => {}
        }
    }
}
