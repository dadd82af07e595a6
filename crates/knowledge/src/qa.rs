//! Question answering: retrieve, compose, generate.
//!
//! [`QaPipeline`] holds everything a question needs except session state.
//! The session runs [`QaPipeline::run`] on a spawned task and relays its
//! output through an [`AnswerStream`].

use crate::memory::ConversationTurn;
use crate::retriever::Retriever;
use crate::types::{Answer, ScoredChunk, SourceRef};
use crate::vector_index::VectorIndex;
use futures::{Stream, StreamExt};
use inkchat_core::{AppConfig, AppError, AppResult};
use inkchat_llm::{ChatMessage, LlmClient, LlmRequest, LlmUsage};
use inkchat_prompt::{build_condense_prompt, build_prompt, ContextBlock, HistoryTurn, PromptDefinition};
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the channel between the generating task and the reader.
pub const ANSWER_CHANNEL_CAPACITY: usize = 64;

/// Where a question currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QaState {
    #[default]
    Idle,
    Retrieving,
    Composing,
    Generating,
    Failed,
}

impl fmt::Display for QaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Retrieving => "retrieving",
            Self::Composing => "composing",
            Self::Generating => "generating",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Answering knobs, taken from `rag` and the chat model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QaSettings {
    pub model: String,
    pub temperature: f32,
    pub streaming: bool,
    pub condense_questions: bool,
    pub context_budget_tokens: usize,
    pub answer_reserve_tokens: usize,
}

impl Default for QaSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl QaSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.rag.temperature,
            streaming: config.rag.streaming,
            condense_questions: config.rag.condense_questions,
            context_budget_tokens: config.rag.context_budget_tokens,
            answer_reserve_tokens: config.rag.answer_reserve_tokens,
        }
    }

    /// Tokens available for the prompt itself.
    pub fn prompt_budget(&self) -> usize {
        self.context_budget_tokens
            .saturating_sub(self.answer_reserve_tokens)
    }
}

/// One event on an answer stream.
#[derive(Debug)]
pub enum AnswerEvent {
    /// A text increment, in generation order.
    Token(String),
    /// Generation finished; the turn has been recorded.
    Done(Answer),
    /// The question failed; memory is unchanged.
    Failed(AppError),
}

/// Reader side of an in-flight answer.
///
/// Dropping it cancels generation.
#[derive(Debug)]
pub struct AnswerStream {
    rx: mpsc::Receiver<AnswerEvent>,
    cancel: CancellationToken,
}

impl AnswerStream {
    pub(crate) fn new(rx: mpsc::Receiver<AnswerEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Stop the generation behind this stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into the final answer.
    pub async fn collect_answer(mut self) -> AppResult<Answer> {
        while let Some(event) = self.rx.recv().await {
            match event {
                AnswerEvent::Token(_) => {}
                AnswerEvent::Done(answer) => return Ok(answer),
                AnswerEvent::Failed(err) => return Err(err),
            }
        }
        Err(AppError::Cancelled(
            "The answer was cancelled before it completed".to_string(),
        ))
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Rough token count: characters / 4, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn turn_tokens(turn: &ConversationTurn) -> usize {
    estimate_tokens(&turn.question) + estimate_tokens(&turn.answer)
}

/// Index of the first turn to keep so that `fixed` plus the kept turns fit
/// in `budget`. Oldest turns go first.
fn first_kept_turn(history: &[ConversationTurn], fixed: usize, budget: usize) -> usize {
    let mut total = fixed + history.iter().map(turn_tokens).sum::<usize>();
    let mut start = 0;
    while total > budget && start < history.len() {
        total -= turn_tokens(&history[start]);
        start += 1;
    }
    if total > budget {
        tracing::warn!(
            "Prompt needs ~{} tokens, over the budget of {} even without history",
            total,
            budget
        );
    }
    start
}

/// Lay out the chat messages: system, recent history, question.
pub fn compose_messages(
    system: Option<&str>,
    history: &[ConversationTurn],
    question: &str,
    budget: usize,
) -> Vec<ChatMessage> {
    let fixed = system.map_or(0, estimate_tokens) + estimate_tokens(question);
    let start = first_kept_turn(history, fixed, budget);
    if start > 0 {
        tracing::debug!("Dropped {} oldest turns to fit the context budget", start);
    }

    let mut messages = Vec::with_capacity(2 + 2 * (history.len() - start));
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    for turn in &history[start..] {
        messages.push(ChatMessage::user(&turn.question));
        messages.push(ChatMessage::assistant(&turn.answer));
    }
    messages.push(ChatMessage::user(question));
    messages
}

fn context_blocks(retrieved: &[ScoredChunk]) -> Vec<ContextBlock> {
    retrieved
        .iter()
        .map(|scored| {
            let chunk = &scored.chunk;
            let source = match chunk.location {
                Some(location) => format!("{} {}", chunk.document, location.describe()),
                None => chunk.document.clone(),
            };
            ContextBlock {
                source,
                text: chunk.text.clone(),
            }
        })
        .collect()
}

fn set_state(state: &Mutex<QaState>, next: QaState) {
    let mut current = state.lock();
    tracing::debug!("QA state {} -> {}", *current, next);
    *current = next;
}

/// Everything needed to answer a question against an index.
pub struct QaPipeline {
    llm: Arc<dyn LlmClient>,
    retriever: Retriever,
    prompt: PromptDefinition,
    settings: QaSettings,
}

impl fmt::Debug for QaPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QaPipeline")
            .field("llm", &self.llm.provider_name())
            .field("retriever", &self.retriever)
            .field("prompt", &self.prompt.id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl QaPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Retriever,
        prompt: PromptDefinition,
        settings: QaSettings,
    ) -> Self {
        Self {
            llm,
            retriever,
            prompt,
            settings,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    /// Rephrase a follow-up into a standalone question.
    ///
    /// `None` when condensing is off, there is no history, or the prompt has
    /// no condense template.
    pub async fn condense(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> AppResult<Option<String>> {
        if !self.settings.condense_questions || history.is_empty() {
            return Ok(None);
        }

        let fixed = estimate_tokens(question) + self.prompt.condense.as_deref().map_or(0, estimate_tokens);
        let start = first_kept_turn(history, fixed, self.settings.prompt_budget());
        let turns: Vec<HistoryTurn> = history[start..]
            .iter()
            .map(|t| HistoryTurn {
                question: t.question.clone(),
                answer: t.answer.clone(),
            })
            .collect();

        let Some(prompt) = build_condense_prompt(&self.prompt, question, &turns)? else {
            return Ok(None);
        };

        let request =
            LlmRequest::from_prompt(prompt, &self.settings.model).with_temperature(0.0);
        let response = self.llm.complete(&request).await.map_err(|e| match e {
            AppError::Generation(_) => e,
            other => AppError::Generation(format!("Failed to condense the question: {}", other)),
        })?;

        let standalone = response.content.trim();
        if standalone.is_empty() {
            return Ok(None);
        }

        tracing::debug!(standalone = %standalone, "Condensed follow-up question");
        Ok(Some(standalone.to_string()))
    }

    /// Build the request messages for `question` with retrieved context.
    pub fn compose(
        &self,
        question: &str,
        retrieved: &[ScoredChunk],
        history: &[ConversationTurn],
    ) -> AppResult<Vec<ChatMessage>> {
        let built = build_prompt(&self.prompt, question, &context_blocks(retrieved))?;
        Ok(compose_messages(
            built.system.as_deref(),
            history,
            &built.user,
            self.settings.prompt_budget(),
        ))
    }

    /// Answer one question, forwarding text increments to `events`.
    ///
    /// Does not touch memory; the caller records the turn.
    pub async fn run(
        &self,
        question: &str,
        index: Option<Arc<dyn VectorIndex>>,
        history: &[ConversationTurn],
        state: &Mutex<QaState>,
        events: &mpsc::Sender<AnswerEvent>,
    ) -> AppResult<Answer> {
        set_state(state, QaState::Retrieving);
        let standalone = self.condense(question, history).await?;
        let query = standalone.as_deref().unwrap_or(question);
        let retrieved = self.retriever.retrieve(index.as_deref(), query).await?;

        set_state(state, QaState::Composing);
        let messages = self.compose(question, &retrieved, history)?;

        set_state(state, QaState::Generating);
        let mut request = LlmRequest::new(messages, &self.settings.model)
            .with_temperature(self.settings.temperature);
        if let Ok(reserve) = u32::try_from(self.settings.answer_reserve_tokens) {
            if reserve > 0 {
                request = request.with_max_tokens(reserve);
            }
        }

        let (text, usage) = if self.settings.streaming {
            self.generate_streaming(request.with_streaming(), events)
                .await?
        } else {
            let response = self.llm.complete(&request).await.map_err(generation_error)?;
            send(events, AnswerEvent::Token(response.content.clone())).await?;
            (response.content, Some(response.usage))
        };

        tracing::info!(
            chars = text.chars().count(),
            sources = retrieved.len(),
            "Answer generated"
        );

        Ok(Answer {
            text,
            sources: SourceRef::from_chunks(&retrieved),
            standalone_question: standalone,
            usage,
        })
    }

    async fn generate_streaming(
        &self,
        request: LlmRequest,
        events: &mpsc::Sender<AnswerEvent>,
    ) -> AppResult<(String, Option<LlmUsage>)> {
        let mut stream = self.llm.stream(&request).await.map_err(generation_error)?;
        let mut text = String::new();
        let mut usage = None;
        let mut finished = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(generation_error)?;
            if !chunk.content.is_empty() {
                text.push_str(&chunk.content);
                send(events, AnswerEvent::Token(chunk.content)).await?;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                finished = true;
                break;
            }
        }

        if !finished {
            return Err(AppError::Generation(
                "The chat model stream ended without completing".to_string(),
            ));
        }

        Ok((text, usage))
    }
}

/// Chat model failures while answering are reported as `Generation`.
fn generation_error(e: AppError) -> AppError {
    match e {
        AppError::Generation(_) | AppError::Cancelled(_) => e,
        other => AppError::Generation(format!("The chat model request failed: {}", other)),
    }
}

/// Forward an event; a closed channel means the reader went away.
async fn send(events: &mpsc::Sender<AnswerEvent>, event: AnswerEvent) -> AppResult<()> {
    events
        .send(event)
        .await
        .map_err(|_| AppError::Cancelled("The answer reader went away".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunk, ChunkLocation};
    use crate::embeddings::providers::TrigramProvider;
    use crate::vector_index::InMemoryIndex;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream;
    use inkchat_llm::{LlmResponse, LlmStream, LlmStreamChunk};
    use inkchat_prompt::default_prompt;

    /// Replies with fixed text and records requests.
    struct EchoClient {
        reply: String,
        requests: Mutex<Vec<LlmRequest>>,
        finish_stream: bool,
        reject_key: bool,
    }

    impl EchoClient {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
                finish_stream: true,
                reject_key: false,
            }
        }
    }

    #[async_trait]
    impl LlmClient for EchoClient {
        fn provider_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
            self.requests.lock().push(request.clone());
            if self.reject_key {
                return Err(AppError::MissingCredential("Invalid API key".to_string()));
            }
            Ok(LlmResponse {
                content: self.reply.clone(),
                model: request.model.clone(),
                usage: LlmUsage::new(10, 5),
                done: true,
            })
        }

        async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
            self.requests.lock().push(request.clone());
            if self.reject_key {
                return Err(AppError::MissingCredential("Invalid API key".to_string()));
            }
            let model = request.model.clone();
            let mut chunks: Vec<AppResult<LlmStreamChunk>> = self
                .reply
                .split_inclusive(' ')
                .map(|piece| {
                    Ok(LlmStreamChunk {
                        content: piece.to_string(),
                        model: model.clone(),
                        done: false,
                        usage: None,
                    })
                })
                .collect();
            if self.finish_stream {
                chunks.push(Ok(LlmStreamChunk {
                    content: String::new(),
                    model,
                    done: true,
                    usage: Some(LlmUsage::new(12, 3)),
                }));
            }
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    fn turn(question: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        }
    }

    async fn index_with(texts: &[&str]) -> Arc<dyn VectorIndex> {
        let provider = TrigramProvider::new(128);
        let mut index = InMemoryIndex::new();
        for (position, text) in texts.iter().enumerate() {
            let chunk = Chunk {
                document: "guide.pdf".to_string(),
                position,
                text: text.to_string(),
                char_range: 0..text.chars().count(),
                location: Some(ChunkLocation::Pages {
                    first: position as u32 + 1,
                    last: position as u32 + 1,
                }),
            };
            let embedding = crate::embeddings::EmbeddingProvider::embed(&provider, text)
                .await
                .unwrap();
            index.insert(chunk, embedding).unwrap();
        }
        Arc::new(index)
    }

    fn pipeline(llm: Arc<EchoClient>, settings: QaSettings) -> QaPipeline {
        let retriever = Retriever::new(Arc::new(TrigramProvider::new(128)), 2);
        QaPipeline::new(llm, retriever, default_prompt().unwrap(), settings)
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_compose_keeps_all_history_within_budget() {
        let history = vec![turn("q1", "a1"), turn("q2", "a2")];
        let messages = compose_messages(Some("system"), &history, "q3", 1000);

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].content, "system");
        assert_eq!(messages[1].content, "q1");
        assert_eq!(messages[4].content, "a2");
        assert_eq!(messages[5].content, "q3");
    }

    #[test]
    fn test_compose_drops_oldest_turns_first() {
        let long = "x".repeat(400); // 100 tokens
        let history = vec![
            turn(&long, &long),
            turn("recent question", "recent answer"),
        ];

        // system (2) + question (1) + recent turn (4 + 4) fits in 20; the old turn does not.
        let messages = compose_messages(Some("system"), &history, "q3", 20);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "recent question");
    }

    #[test]
    fn test_compose_over_budget_without_history() {
        let messages = compose_messages(Some(&"s".repeat(100)), &[turn("q", "a")], "q", 5);
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_run_streams_tokens_and_builds_answer() {
        let llm = Arc::new(EchoClient::new("The keeper logged ships."));
        let qa = pipeline(llm.clone(), QaSettings::default());
        let index = index_with(&[
            "The lighthouse keeper logged every passing steamship.",
            "Copper kettles need polishing.",
        ])
        .await;

        let (tx, mut rx) = mpsc::channel(ANSWER_CHANNEL_CAPACITY);
        let state = Mutex::new(QaState::Idle);
        let answer = qa
            .run("Who logged the steamships?", Some(index), &[], &state, &tx)
            .await
            .unwrap();
        drop(tx);

        let mut streamed = String::new();
        while let Some(event) = rx.recv().await {
            if let AnswerEvent::Token(t) = event {
                streamed.push_str(&t);
            }
        }

        assert_eq!(streamed, "The keeper logged ships.");
        assert_eq!(answer.text, streamed);
        assert_eq!(answer.usage, Some(LlmUsage::new(12, 3)));
        assert_eq!(answer.sources[0].document, "guide.pdf");
        assert_eq!(answer.sources[0].location, "p. 1");
        assert_eq!(*state.lock(), QaState::Generating);

        let requests = llm.requests.lock();
        let system = &requests[0].messages[0].content;
        assert!(system.contains("[guide.pdf p. 1]"));
        assert!(system.contains("lighthouse keeper"));
        assert!(requests[0].stream);
    }

    #[tokio::test]
    async fn test_run_without_streaming_sends_one_token() {
        let llm = Arc::new(EchoClient::new("Forty two."));
        let settings = QaSettings {
            streaming: false,
            ..QaSettings::default()
        };
        let qa = pipeline(llm, settings);
        let index = index_with(&["The answer is forty two."]).await;

        let (tx, mut rx) = mpsc::channel(4);
        let state = Mutex::new(QaState::Idle);
        let answer = qa
            .run("What is the answer?", Some(index), &[], &state, &tx)
            .await
            .unwrap();

        assert_eq!(answer.text, "Forty two.");
        assert!(matches!(rx.recv().await, Some(AnswerEvent::Token(t)) if t == "Forty two."));
    }

    #[tokio::test]
    async fn test_unfinished_stream_is_generation_error() {
        let mut client = EchoClient::new("partial answer");
        client.finish_stream = false;
        let qa = pipeline(Arc::new(client), QaSettings::default());
        let index = index_with(&["some context"]).await;

        let (tx, _rx) = mpsc::channel(8);
        let state = Mutex::new(QaState::Idle);
        let err = qa
            .run("question?", Some(index), &[], &state, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation(_)));
    }

    #[tokio::test]
    async fn test_rejected_key_while_answering_is_generation_error() {
        for streaming in [true, false] {
            let mut client = EchoClient::new("unused");
            client.reject_key = true;
            let settings = QaSettings {
                streaming,
                ..QaSettings::default()
            };
            let qa = pipeline(Arc::new(client), settings);
            let index = index_with(&["some context"]).await;

            let (tx, _rx) = mpsc::channel(8);
            let state = Mutex::new(QaState::Idle);
            let err = qa
                .run("question?", Some(index), &[], &state, &tx)
                .await
                .unwrap_err();
            assert!(
                matches!(&err, AppError::Generation(m) if m.contains("Invalid API key")),
                "streaming={}: {:?}",
                streaming,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_condense_uses_history() {
        let llm = Arc::new(EchoClient::new("  When was the lighthouse built?  "));
        let qa = pipeline(llm.clone(), QaSettings::default());

        let history = vec![turn("Tell me about the lighthouse.", "It guards the bay.")];
        let standalone = qa.condense("When was it built?", &history).await.unwrap();

        assert_eq!(standalone.as_deref(), Some("When was the lighthouse built?"));
        let requests = llm.requests.lock();
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("Human: Tell me about the lighthouse."));
        assert!(prompt.contains("Follow Up Input: When was it built?"));
    }

    #[tokio::test]
    async fn test_condense_skipped_without_history_or_when_disabled() {
        let llm = Arc::new(EchoClient::new("unused"));
        let qa = pipeline(llm.clone(), QaSettings::default());
        assert_eq!(qa.condense("q?", &[]).await.unwrap(), None);

        let settings = QaSettings {
            condense_questions: false,
            ..QaSettings::default()
        };
        let qa = pipeline(llm.clone(), settings);
        assert_eq!(qa.condense("q?", &[turn("a", "b")]).await.unwrap(), None);
        assert!(llm.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_collect_answer_on_closed_stream_is_cancelled() {
        let (tx, rx) = mpsc::channel(1);
        let stream = AnswerStream::new(rx, CancellationToken::new());
        drop(tx);
        assert!(matches!(
            stream.collect_answer().await,
            Err(AppError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let stream = AnswerStream::new(rx, token.clone());
        drop(stream);
        assert!(token.is_cancelled());
    }
}
