//! Retrieval-augmented chat over a [`VectorIndex`].
//!
//! A [`Retriever`] bundles the index, embedder and generator. It answers
//! one-shot questions via [`Retriever::query`]. A [`ChatSession`] wraps a
//! retriever with a bounded conversational memory.
//!
//! # Turn flow
//!
//! ```text
//! message ──▶ embed ──▶ index.query(top_k) ──▶ grounding prompt + history ──▶ generate
//! ```
//!
//! When retrieval finds nothing the session replies with [`DONT_KNOW`]
//! without calling the generator. Sessions query the shared index on every
//! turn, so content committed by a sync is visible on the next message.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::chunk::CHARS_PER_TOKEN;
use crate::embedding::{embed_one, Embedder};
use crate::generation::{ChatMessage, Generator};
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Reply used when the index holds nothing relevant to the question.
pub const DONT_KNOW: &str =
    "I don't know. None of the indexed documents contain information about that.";

const SYSTEM_PROMPT: &str = "You are an assistant that answers questions based on the provided documents. Rules:
- Generate human readable output and be concise: no more than 3 sentences unless more detail is needed.
- Answer using only the context below. Never rely on outside knowledge.
- If the context does not contain the answer, say \"I don't know\".
- Use professional language.";

/// Retrieval tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Number of chunks injected into each prompt.
    pub top_k: usize,
    /// Token budget for remembered conversation turns.
    pub memory_tokens: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            memory_tokens: 3000,
        }
    }
}

/// Shared handles needed to answer a question. Cheap to clone.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            params,
        }
    }

    /// Fetch the `top_k` chunks most similar to `text`.
    pub async fn retrieve(&self, text: &str) -> Result<Vec<ScoredChunk>> {
        if self.index.is_empty().await {
            return Ok(Vec::new());
        }
        let vector = embed_one(self.embedder.as_ref(), text).await?;
        self.index.query(&vector, self.params.top_k).await
    }

    /// One-shot question with no memory across calls.
    pub async fn query(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }
        let context = self.retrieve(question).await?;
        if context.is_empty() {
            return Ok(DONT_KNOW.to_string());
        }
        let messages = build_prompt(&context, &[], question);
        self.generator.generate(&messages).await
    }
}

/// A conversation with memory of previous turns.
pub struct ChatSession {
    retriever: Retriever,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            retriever,
            history: Vec::new(),
        }
    }

    /// Answer `message` using retrieved context and remembered turns.
    pub async fn chat(&mut self, message: &str) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            bail!("message must not be empty");
        }

        let context = self.retriever.retrieve(message).await?;
        let answer = if context.is_empty() {
            DONT_KNOW.to_string()
        } else {
            let messages = build_prompt(&context, &self.history, message);
            self.retriever.generator.generate(&messages).await?
        };

        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(answer.clone()));
        trim_history(&mut self.history, self.retriever.params.memory_tokens);

        Ok(answer)
    }

    /// Remembered turns, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget every remembered turn.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Assemble the grounding prompt: system rules + numbered context, the
/// remembered turns, then the new user message.
pub fn build_prompt(
    context: &[ScoredChunk],
    history: &[ChatMessage],
    message: &str,
) -> Vec<ChatMessage> {
    let mut system = String::from(SYSTEM_PROMPT);
    system.push_str("\n\nContext:\n");
    for (i, chunk) in context.iter().enumerate() {
        system.push_str(&format!(
            "[{}] (source: {})\n{}\n\n",
            i + 1,
            chunk.provenance.source,
            chunk.text
        ));
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system.trim_end()));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(message));
    messages
}

/// Drop the oldest user/assistant pairs until the history fits the budget.
fn trim_history(history: &mut Vec<ChatMessage>, memory_tokens: usize) {
    let budget = memory_tokens * CHARS_PER_TOKEN;
    let mut total: usize = history.iter().map(|m| m.content.len()).sum();
    while total > budget && history.len() > 2 {
        let removed: usize = history.drain(..2).map(|m| m.content.len()).sum();
        total -= removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Role;
    use crate::index::FlatIndex;
    use crate::models::{IndexEntry, Provenance};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Embeds text as a 2-d vector: (contains "rust", contains "python").
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("rust") { 1.0 } else { 0.0 },
                        if t.contains("python") { 1.0 } else { 0.0 },
                    ]
                })
                .collect())
        }
    }

    /// Records every prompt it receives.
    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok("answer".to_string())
        }
    }

    fn entry(id: &str, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            text: text.to_string(),
            provenance: Provenance {
                source: "notes/rust.md".to_string(),
                filename: "rust.md".to_string(),
                loaded_at: Utc::now(),
            },
            vector,
        }
    }

    fn retriever(index: Arc<FlatIndex>, generator: Arc<RecordingGenerator>) -> Retriever {
        Retriever::new(
            index,
            Arc::new(KeywordEmbedder),
            generator,
            RetrievalParams {
                top_k: 1,
                memory_tokens: 3000,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_index_says_dont_know() {
        let generator = Arc::new(RecordingGenerator::default());
        let mut session = ChatSession::new(retriever(Arc::new(FlatIndex::new(2)), generator.clone()));

        let answer = session.chat("What is in report.pdf?").await.unwrap();
        assert_eq!(answer, DONT_KNOW);
        assert!(generator.prompts.lock().unwrap().is_empty());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_forgets_turns() {
        let generator = Arc::new(RecordingGenerator::default());
        let mut session = ChatSession::new(retriever(Arc::new(FlatIndex::new(2)), generator));
        session.chat("first").await.unwrap();
        session.chat("second").await.unwrap();
        assert_eq!(session.history().len(), 4);

        session.reset();
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_contains_top_k_context_and_history() {
        let index = Arc::new(FlatIndex::new(2));
        index
            .insert(vec![
                entry("c1", "Rust has ownership.", vec![1.0, 0.0]),
                entry("c2", "Python has a GIL.", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let mut session = ChatSession::new(retriever(index, generator.clone()));

        session.chat("Tell me about rust").await.unwrap();
        session.chat("And rust again?").await.unwrap();

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);

        let second = &prompts[1];
        assert_eq!(second[0].role, Role::System);
        assert!(second[0].content.contains("Rust has ownership."));
        assert!(!second[0].content.contains("Python has a GIL."));
        assert!(second[0].content.contains("I don't know"));
        assert!(second[0].content.contains("notes/rust.md"));
        // system, previous user + assistant, new user
        assert_eq!(second.len(), 4);
        assert_eq!(second[3].content, "And rust again?");
    }

    #[tokio::test]
    async fn test_query_has_no_memory() {
        let index = Arc::new(FlatIndex::new(2));
        index
            .insert(vec![entry("c1", "Rust has ownership.", vec![1.0, 0.0])])
            .await
            .unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let r = retriever(index, generator.clone());

        r.query("rust?").await.unwrap();
        r.query("rust again?").await.unwrap();

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts.iter().all(|p| p.len() == 2));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let generator = Arc::new(RecordingGenerator::default());
        let mut session = ChatSession::new(retriever(Arc::new(FlatIndex::new(2)), generator));
        assert!(session.chat("   ").await.is_err());
    }

    #[test]
    fn test_trim_history_drops_oldest_pairs() {
        let mut history = vec![
            ChatMessage::user("a".repeat(40)),
            ChatMessage::assistant("b".repeat(40)),
            ChatMessage::user("c".repeat(4)),
            ChatMessage::assistant("d".repeat(4)),
        ];
        // budget = 10 tokens = 40 chars
        trim_history(&mut history, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "cccc");
    }
}
