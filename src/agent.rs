//! Query orchestration: session, retrieval, prompt, completion.
//!
//! [`Agent::process_query`] runs one turn:
//!
//! 1. Resolve the session (`SessionNotFound` when absent or expired).
//! 2. Append the user's query to its history.
//! 3. With retrieval enabled, retrieve and format context. When nothing
//!    passes the relevance filter, reply with a fixed message without
//!    calling the completion provider.
//! 4. Build the prompt: system preamble, the last six prior turns, and the
//!    user turn (the retrieval template when context was found).
//! 5. Complete, append the reply to history, return it with its sources.
//!
//! A completion failure leaves the user turn in history and no reply.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::config::LlmConfig;
use crate::error::RagError;
use crate::llm::CompletionProvider;
use crate::models::{ChatMessage, PromptMessage, Role};
use crate::retriever::{distinct_sources, RetrieveOptions, Retriever};
use crate::session::SessionStore;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on provided document context.

CRITICAL INSTRUCTIONS:
1. ONLY use information from the provided context to answer questions
2. If the context doesn't contain relevant information, explicitly say: \"I don't find information about that in the provided documents.\"
3. DO NOT make up or infer information that isn't in the context
4. When answering, cite which source document the information came from
5. Be precise and accurate - quote exact information when possible
6. If the question is unclear, ask for clarification
7. Keep answers focused and relevant to the question asked

Remember: It's better to say you don't know than to provide incorrect information.";

/// Assistant reply when retrieval keeps nothing.
pub const NO_CONTEXT_REPLY: &str = "I don't find any relevant information about that in the provided documents. Could you rephrase your question or ask about something else that might be in the documents?";

/// Prior turns (excluding the current query) included in the prompt.
const HISTORY_WINDOW: usize = 6;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub use_rag: bool,
    /// Overrides `[retrieval].top_k`.
    pub top_k: Option<usize>,
    /// Restrict retrieval to one source document.
    pub source_filter: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            use_rag: true,
            top_k: None,
            source_filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<String>,
    pub session_id: String,
    pub query: String,
    pub context_found: bool,
}

pub struct Agent {
    sessions: Arc<SessionStore>,
    retriever: Arc<Retriever>,
    llm: Arc<dyn CompletionProvider>,
    max_tokens: u32,
    context_max_tokens: u32,
    system_prompt: RwLock<String>,
}

impl Agent {
    pub fn new(
        sessions: Arc<SessionStore>,
        retriever: Arc<Retriever>,
        llm: Arc<dyn CompletionProvider>,
        config: &LlmConfig,
    ) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            sessions,
            retriever,
            llm,
            max_tokens: config.max_tokens,
            context_max_tokens: config.context_max_tokens,
            system_prompt: RwLock::new(system_prompt),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub fn create_session(&self) -> String {
        self.sessions.create()
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.delete(session_id)
    }

    pub fn session_history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions.get_history(session_id)
    }

    pub fn clear_session_history(&self, session_id: &str) -> Result<(), RagError> {
        self.sessions.clear_history(session_id)
    }

    pub fn active_sessions_count(&self) -> usize {
        self.sessions.count_active()
    }

    pub fn cleanup_sessions(&self) -> usize {
        self.sessions.sweep_expired()
    }

    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        *self
            .system_prompt
            .write()
            .unwrap_or_else(PoisonError::into_inner) = prompt.into();
    }

    /// Answer `query` within `session_id`.
    pub async fn process_query(
        &self,
        session_id: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse, RagError> {
        if self.sessions.get(session_id).is_none() {
            return Err(RagError::SessionNotFound(session_id.to_string()));
        }
        self.sessions.add_message(session_id, Role::User, query)?;

        let mut context = None;
        let mut sources = Vec::new();

        if options.use_rag {
            let retrieve = RetrieveOptions {
                top_k: options.top_k,
                source_filter: options.source_filter.clone(),
                ..Default::default()
            };
            let (results, formatted) = self.retriever.retrieve_and_format(query, &retrieve).await?;

            if results.is_empty() {
                tracing::info!(session_id, "no relevant context, skipping completion");
                self.sessions
                    .add_message(session_id, Role::Assistant, NO_CONTEXT_REPLY)?;
                return Ok(QueryResponse {
                    response: NO_CONTEXT_REPLY.to_string(),
                    sources: Vec::new(),
                    session_id: session_id.to_string(),
                    query: query.to_string(),
                    context_found: false,
                });
            }

            sources = distinct_sources(&results);
            context = Some(formatted);
        }

        let history = self.sessions.get_history(session_id);
        let prior = prior_turns(&history);

        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(PromptMessage::new(Role::System, self.system_prompt()));
        messages.extend(prior.iter().map(PromptMessage::from));

        let max_tokens = match &context {
            Some(context) => {
                messages.push(PromptMessage::new(
                    Role::User,
                    context_prompt(query, context, &sources),
                ));
                self.context_max_tokens
            }
            None => {
                messages.push(PromptMessage::new(Role::User, query));
                self.max_tokens
            }
        };

        let response = self
            .llm
            .complete(&messages, max_tokens)
            .await
            .map_err(|e| {
                tracing::warn!(session_id, error = %e, "completion failed");
                RagError::Upstream(e)
            })?;

        self.sessions
            .add_message(session_id, Role::Assistant, &response)?;

        Ok(QueryResponse {
            response,
            sources,
            session_id: session_id.to_string(),
            query: query.to_string(),
            context_found: true,
        })
    }
}

/// Up to [`HISTORY_WINDOW`] turns before the last one (the current query).
fn prior_turns(history: &[ChatMessage]) -> &[ChatMessage] {
    let end = history.len().saturating_sub(1);
    let start = end.saturating_sub(HISTORY_WINDOW);
    &history[start..end]
}

fn context_prompt(query: &str, context: &str, sources: &[String]) -> String {
    format!(
        "You have access to information from these documents: {}

CONTEXT FROM DOCUMENTS:
{}

USER QUESTION: {}

INSTRUCTIONS:
- Answer ONLY based on the context above
- If the context doesn't contain the answer, say so clearly
- Cite which document(s) you're referencing
- Be accurate and don't add information not in the context
- Keep your answer focused on the question

ANSWER:",
        sources.join(", "),
        context,
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::KeywordEmbedder;
    use crate::models::DocumentChunk;
    use crate::store::{DistanceMetric, MemoryStore, VectorStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every prompt and answers with a fixed string.
    struct RecordingLlm {
        calls: Mutex<Vec<(Vec<PromptMessage>, u32)>>,
        fail: bool,
    }

    impl RecordingLlm {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(&self, messages: &[PromptMessage], max_tokens: u32) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((messages.to_vec(), max_tokens));
            if self.fail {
                anyhow::bail!("provider returned 503");
            }
            Ok("generated answer".to_string())
        }
    }

    fn chunk(source: &str, index: usize, text: &str) -> DocumentChunk {
        DocumentChunk {
            id: format!("{}-{}", source, index),
            text: text.to_string(),
            source: source.to_string(),
            chunk_index: index,
            total_chunks: 2,
            file_path: source.to_string(),
            hash: String::new(),
        }
    }

    async fn agent_with(
        chunks: &[DocumentChunk],
        threshold: f64,
        llm: Arc<RecordingLlm>,
    ) -> Agent {
        let embedder = Arc::new(KeywordEmbedder::new(&["rust", "python", "ownership"]));
        let store = Arc::new(MemoryStore::new("docs", embedder, DistanceMetric::L2));
        store.add(chunks).await.unwrap();
        let retrieval = RetrievalConfig {
            relevance_threshold: threshold,
            ..RetrievalConfig::default()
        };
        let retriever = Arc::new(Retriever::new(store, &retrieval));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600), 10));
        Agent::new(sessions, retriever, llm, &LlmConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_session_fails() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(&[], 1.5, llm.clone()).await;
        let err = agent
            .process_query("missing", "hi", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::SessionNotFound(_)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_context_short_circuits() {
        let llm = Arc::new(RecordingLlm::new());
        // only orthogonal chunks, strict threshold
        let agent = agent_with(&[chunk("a.pdf", 0, "python notes")], 0.5, llm.clone()).await;
        let id = agent.create_session();

        let resp = agent
            .process_query(&id, "rust ownership", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.response, NO_CONTEXT_REPLY);
        assert!(!resp.context_found);
        assert!(resp.sources.is_empty());
        assert_eq!(llm.call_count(), 0);

        let history = agent.session_history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, NO_CONTEXT_REPLY);
    }

    #[tokio::test]
    async fn test_context_prompt_shape() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(
            &[
                chunk("a.pdf", 0, "Rust ownership rules"),
                chunk("b.pdf", 0, "Rust borrowing"),
            ],
            1.5,
            llm.clone(),
        )
        .await;
        let id = agent.create_session();

        let resp = agent
            .process_query(&id, "rust ownership", &QueryOptions::default())
            .await
            .unwrap();
        assert!(resp.context_found);
        assert_eq!(resp.response, "generated answer");
        assert_eq!(resp.sources, vec!["a.pdf", "b.pdf"]);

        let calls = llm.calls.lock().unwrap();
        let (messages, max_tokens) = &calls[0];
        assert_eq!(*max_tokens, 1500);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
        let user = &messages[1].content;
        assert!(user.starts_with("You have access to information from these documents: a.pdf, b.pdf"));
        assert!(user.contains("CONTEXT FROM DOCUMENTS:\n--- Source 1: a.pdf (Section 0) ---"));
        assert!(user.contains("USER QUESTION: rust ownership"));
        assert!(user.ends_with("ANSWER:"));
    }

    #[tokio::test]
    async fn test_without_rag_sends_raw_query() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(&[], 1.5, llm.clone()).await;
        let id = agent.create_session();
        let options = QueryOptions {
            use_rag: false,
            ..Default::default()
        };

        let resp = agent.process_query(&id, "hello", &options).await.unwrap();
        assert!(resp.context_found);
        assert!(resp.sources.is_empty());

        let calls = llm.calls.lock().unwrap();
        let (messages, max_tokens) = &calls[0];
        assert_eq!(*max_tokens, 1000);
        assert_eq!(messages.last().unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_history_window_excludes_current_query() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(&[], 1.5, llm.clone()).await;
        let id = agent.create_session();
        let options = QueryOptions {
            use_rag: false,
            ..Default::default()
        };

        for i in 0..5 {
            agent
                .process_query(&id, &format!("q{}", i), &options)
                .await
                .unwrap();
        }

        let calls = llm.calls.lock().unwrap();
        let (messages, _) = calls.last().unwrap();
        // system + 6 prior turns + current query
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[1].content, "q1");
        assert_eq!(messages[6].content, "generated answer");
        assert_eq!(messages[7].content, "q4");
    }

    #[tokio::test]
    async fn test_completion_failure_is_upstream() {
        let llm = Arc::new(RecordingLlm::failing());
        let agent = agent_with(&[], 1.5, llm.clone()).await;
        let id = agent.create_session();
        let options = QueryOptions {
            use_rag: false,
            ..Default::default()
        };

        let err = agent.process_query(&id, "hello", &options).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream(_)));
        let history = agent.session_history(&id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_system_prompt_override() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(&[], 1.5, llm).await;
        agent.set_system_prompt("Be terse.");
        assert_eq!(agent.system_prompt(), "Be terse.");
    }

    #[tokio::test]
    async fn test_session_lifecycle_helpers() {
        let llm = Arc::new(RecordingLlm::new());
        let agent = agent_with(&[], 1.5, llm).await;
        let id = agent.create_session();
        assert_eq!(agent.active_sessions_count(), 1);
        agent.clear_session_history(&id).unwrap();
        assert_eq!(agent.cleanup_sessions(), 0);
        assert!(agent.end_session(&id));
        assert_eq!(agent.active_sessions_count(), 0);
        assert!(agent.clear_session_history(&id).is_err());
    }

    #[test]
    fn test_prior_turns_bounds() {
        assert!(prior_turns(&[]).is_empty());
        let one = vec![ChatMessage {
            role: Role::User,
            content: "x".to_string(),
            timestamp: chrono::Utc::now(),
        }];
        assert!(prior_turns(&one).is_empty());
    }
}
