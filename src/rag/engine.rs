//! Condense-plus-context chat engine.

use super::context::format_context_for_prompt;
use super::{ContextBuilder, ContextChunk};
use crate::config::{Prompts, Settings};
use crate::embedding::OpenAIEmbedder;
use crate::error::{KingbotError, Result};
use crate::memory::{ChatTurn, Role};
use crate::openai::create_client_with_timeout;
use crate::vector_store::SqliteVectorStore;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Answers a query in the light of the conversation so far.
///
/// Implementations never mutate the history; the caller appends the new turns
/// once an answer is returned.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat(&self, history: &[ChatTurn], query: &str) -> Result<ChatResponse>;
}

/// An answer with the passages it was drawn from.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The generated answer.
    pub response: String,
    /// Retrieved passages, best first.
    pub sources: Vec<ContextChunk>,
}

impl ChatResponse {
    /// URL of the best-ranked source, or an empty string.
    pub fn reference(&self) -> &str {
        self.sources
            .first()
            .map(|s| s.source_url.as_str())
            .unwrap_or_default()
    }
}

/// Rewrites follow-ups into standalone questions for retrieval, then answers
/// with the retrieved passages placed into the system prompt.
pub struct CondensePlusContextEngine {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
    context_builder: ContextBuilder,
    prompts: Prompts,
}

impl CondensePlusContextEngine {
    /// Create a new engine.
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: &str,
        temperature: f32,
        context_builder: ContextBuilder,
        prompts: Prompts,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature,
            context_builder,
            prompts,
        }
    }

    /// Connect to the passage collection and the OpenAI API.
    #[instrument(skip_all, fields(collection = %settings.vector_store.collection))]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let vector_store = Arc::new(SqliteVectorStore::new(
            &settings.vector_path(),
            &settings.vector_store.collection,
        )?);
        let embedder = Arc::new(OpenAIEmbedder::from_settings(settings)?);

        let context_builder = ContextBuilder::new(vector_store, embedder)
            .with_max_chunks(settings.rag.max_context_chunks as usize)
            .with_min_score(settings.rag.min_score);

        let client = create_client_with_timeout(
            settings.openai.api_key.as_deref(),
            Duration::from_secs(settings.openai.timeout_secs),
        )?;

        info!("Built chat engine using {}", settings.openai.chat_model);

        Ok(Self::new(
            client,
            &settings.openai.chat_model,
            settings.openai.temperature,
            context_builder,
            prompts,
        ))
    }

    /// Turn a follow-up into a question that stands on its own.
    async fn condense(&self, history: &[ChatTurn], query: &str) -> Result<String> {
        if !history.iter().any(|t| t.role == Role::User) {
            return Ok(query.to_string());
        }

        let mut vars = HashMap::new();
        vars.insert("chat_history".to_string(), format_history(history));
        vars.insert("question".to_string(), query.to_string());
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.chat.condense, &vars);

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| KingbotError::Rag(e.to_string()))?;

        let standalone = self.complete(vec![message.into()]).await?;
        let standalone = standalone.trim();
        debug!("Condensed question: {}", standalone);

        if standalone.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(standalone.to_string())
        }
    }

    /// Build the system prompt around the retrieved passages.
    fn system_prompt(&self, chunks: &[ContextChunk]) -> String {
        let mut context_vars = HashMap::new();
        context_vars.insert(
            "context_str".to_string(),
            format_context_for_prompt(chunks),
        );
        let context = Prompts::render(&self.prompts.chat.context, &context_vars);

        let mut vars = HashMap::new();
        vars.insert(
            "today".to_string(),
            chrono::Local::now().format("%B %d, %Y").to_string(),
        );
        vars.insert("context".to_string(), context);
        self.prompts
            .render_with_custom(&self.prompts.chat.system, &vars)
    }

    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(|e| KingbotError::Rag(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            KingbotError::OpenAI(format!("Failed to generate response: {}", e))
        })?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| KingbotError::Rag("Empty response from LLM".to_string()))
    }
}

#[async_trait]
impl ChatEngine for CondensePlusContextEngine {
    #[instrument(skip(self, history), fields(turns = history.len()))]
    async fn chat(&self, history: &[ChatTurn], query: &str) -> Result<ChatResponse> {
        info!("Chat message: {}", query);

        let standalone = self.condense(history, query).await?;
        let sources = self.context_builder.build(&standalone).await?;

        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt(&sources))
                .build()
                .map_err(|e| KingbotError::Rag(e.to_string()))?
                .into(),
        ];
        for turn in history {
            messages.push(to_request_message(turn)?);
        }
        messages.push(to_request_message(&ChatTurn::user(query))?);

        let response = self.complete(messages).await?;
        debug!("Generated response with {} sources", sources.len());

        Ok(ChatResponse { response, sources })
    }
}

fn to_request_message(turn: &ChatTurn) -> Result<ChatCompletionRequestMessage> {
    let message = match turn.role {
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(turn.content.clone())
            .build()
            .map_err(|e| KingbotError::Rag(e.to_string()))?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.content.clone())
            .build()
            .map_err(|e| KingbotError::Rag(e.to_string()))?
            .into(),
    };
    Ok(message)
}

/// One `role: content` line per turn.
fn format_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(url: &str) -> ContextChunk {
        ContextChunk {
            source_url: url.to_string(),
            title: "Library Hours".to_string(),
            content: "Open daily.".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_reference_is_best_source() {
        let response = ChatResponse {
            response: "See the hours page.".to_string(),
            sources: vec![
                chunk("https://library.sjsu.edu/library-hours/library-hours"),
                chunk("https://library.sjsu.edu/calendar"),
            ],
        };
        assert_eq!(
            response.reference(),
            "https://library.sjsu.edu/library-hours/library-hours"
        );

        let empty = ChatResponse {
            response: String::new(),
            sources: Vec::new(),
        };
        assert_eq!(empty.reference(), "");
    }

    #[test]
    fn test_format_history() {
        let history = vec![
            ChatTurn::assistant("Ask me a question about SJSU Library!"),
            ChatTurn::user("Where can I print?"),
        ];
        assert_eq!(
            format_history(&history),
            "assistant: Ask me a question about SJSU Library!\nuser: Where can I print?"
        );
    }

    #[test]
    fn test_system_prompt_fills_context_and_date() {
        let store = Arc::new(crate::vector_store::MemoryVectorStore::new("sjsulib"));
        let embedder = Arc::new(
            OpenAIEmbedder::with_config(Some("sk-test"), "text-embedding-3-small", 3).unwrap(),
        );
        let engine = CondensePlusContextEngine::new(
            crate::openai::create_client(Some("sk-test")).unwrap(),
            "gpt-4o-mini",
            0.0,
            ContextBuilder::new(store, embedder),
            Prompts::default(),
        );

        let prompt = engine.system_prompt(&[chunk("https://library.sjsu.edu/calendar")]);
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{today}"));
        assert!(prompt.contains("source: https://library.sjsu.edu/calendar"));
        assert!(prompt.contains(&chrono::Local::now().format("%Y").to_string()));
    }
}
