//! The Kingbot event loop.
//!
//! Every user action is an [`Event`]. [`Kingbot::handle`] applies it to the
//! session and answers with a [`Directive`]: either render the session now, or
//! run another refresh cycle first. Submitting a question asks for a rerun; the
//! rerun answers the pending question and asks for one more; the last refresh
//! renders. [`Kingbot::dispatch`] drives that loop to completion.

use crate::config::{Prompts, Settings};
use crate::error::Result;
use crate::feedback::{
    FeedbackEvent, FeedbackRecord, InteractionLog, InteractionRow, SqliteInteractionLog,
};
use crate::history;
use crate::memory::Role;
use crate::rag::{EngineCache, EngineFactory, OpenAIEngineFactory};
use crate::session::{PendingInteraction, Phase, Session, SessionStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A user action against a session.
#[derive(Debug, Clone)]
pub enum Event {
    /// Free text typed into the input box.
    Query { text: String },
    /// One of the quick question buttons.
    QuickQuestion { index: usize },
    /// Thumbs up/down on an answer.
    Feedback(FeedbackEvent),
    /// A refresh cycle with no new input.
    Refresh,
}

/// What the surface should do after an event.
#[derive(Debug, Clone)]
pub enum Directive {
    /// State changed; run another refresh cycle.
    Rerun,
    /// Nothing left to do; show this.
    Render(View),
}

/// One displayed chat message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderedTurn {
    pub role: Role,
    pub name: String,
    pub avatar: String,
    pub content: String,
}

/// A quick question button as displayed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ButtonView {
    pub label: String,
    pub enabled: bool,
}

/// Everything the surface needs to draw a session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct View {
    pub session_id: Uuid,
    pub phase: Phase,
    pub messages: Vec<RenderedTurn>,
    /// Question accepted but not yet answered.
    pub pending_query: Option<String>,
    pub input_enabled: bool,
    pub placeholder: String,
    pub buttons: Vec<ButtonView>,
    /// Key of the latest answer; present when the feedback widget should show.
    pub feedback_key: Option<String>,
    pub feedback_label: String,
    /// Error to show for the last action.
    pub error: Option<String>,
}

/// Upper bound on refresh cycles per dispatched event.
const MAX_CYCLES: usize = 8;

/// Coordinates sessions, the chat engine and the interaction log.
pub struct Kingbot {
    settings: Settings,
    sessions: SessionStore,
    engines: EngineCache,
    factory: Arc<dyn EngineFactory>,
    log: Arc<dyn InteractionLog>,
}

impl Kingbot {
    /// Create a Kingbot backed by OpenAI and the on-disk interaction log.
    ///
    /// Prompt templates are checked here so a bad template fails at startup
    /// rather than on the first question.
    pub fn new(settings: Settings) -> Result<Self> {
        Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let log = Arc::new(SqliteInteractionLog::new(&settings.log_path())?);
        let factory = Arc::new(OpenAIEngineFactory::new(settings.clone()));
        Ok(Self::with_components(settings, factory, log))
    }

    /// Create a Kingbot with custom components.
    pub fn with_components(
        settings: Settings,
        factory: Arc<dyn EngineFactory>,
        log: Arc<dyn InteractionLog>,
    ) -> Self {
        let engines = EngineCache::new(Duration::from_secs(settings.rag.engine_ttl_secs));
        Self {
            settings,
            sessions: SessionStore::new(),
            engines,
            factory,
            log,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Start a session.
    pub async fn open_session(&self) -> Uuid {
        self.sessions.create(&self.settings.memory).await
    }

    /// End a session. Returns whether it existed.
    pub async fn close_session(&self, id: Uuid) -> bool {
        self.sessions.remove(id).await
    }

    /// Drop sessions idle past the configured timeout.
    pub async fn sweep_idle_sessions(&self) -> usize {
        self.sessions
            .sweep_idle(Duration::from_secs(self.settings.session.idle_timeout_secs))
            .await
    }

    /// Current view of a session.
    pub async fn view(&self, id: Uuid) -> Result<View> {
        let session = self.sessions.get(id).await?;
        let session = session.lock().await;
        Ok(self.render(&session))
    }

    /// Apply an event and keep refreshing until there is something to render.
    pub async fn dispatch(&self, id: Uuid, event: Event) -> Result<View> {
        let mut directive = self.handle(id, event).await?;
        for _ in 0..MAX_CYCLES {
            match directive {
                Directive::Render(view) => return Ok(view),
                Directive::Rerun => directive = self.handle(id, Event::Refresh).await?,
            }
        }
        warn!(session = %id, "Refresh loop did not settle");
        self.view(id).await
    }

    /// Apply a single event to a session.
    #[instrument(skip(self, event), fields(session = %id))]
    pub async fn handle(&self, id: Uuid, event: Event) -> Result<Directive> {
        match event {
            Event::Query { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(Directive::Render(self.view(id).await?));
                }
                self.submit(id, text.to_string(), None).await
            }
            Event::QuickQuestion { index } => {
                let button = self.settings.ui.button(index)?;
                self.submit(id, button.content.clone(), button.chip.clone())
                    .await
            }
            Event::Feedback(feedback) => self.record_feedback(id, feedback).await,
            Event::Refresh => self.refresh(id).await,
        }
    }

    async fn submit(&self, id: Uuid, query: String, chip: Option<String>) -> Result<Directive> {
        let session = self.sessions.get(id).await?;
        let mut session = session.lock().await;
        session.submit(PendingInteraction::new(query, chip))?;
        Ok(Directive::Rerun)
    }

    /// Answer the pending question, if there is one; otherwise render.
    async fn refresh(&self, id: Uuid) -> Result<Directive> {
        let handle = self.sessions.get(id).await?;

        // The lock is released while the engine runs so a concurrent request
        // sees Processing and is turned away instead of queueing.
        let (interaction, history) = {
            let mut session = handle.lock().await;
            match session.begin_processing() {
                Some(interaction) => (interaction, session.memory().get()),
                None => return Ok(Directive::Render(self.render(&session))),
            }
        };

        let answer = match self.engines.get_or_build(self.factory.as_ref()).await {
            Ok(engine) => engine.chat(&history, &interaction.query).await,
            Err(e) => Err(e),
        };

        match answer {
            Ok(response) => {
                handle.lock().await.complete(&interaction, &response.response);
                info!(sources = response.sources.len(), "Answered question");

                let row = InteractionRow::new(id, &interaction, &response.response, response.reference());
                if let Err(e) = self.log.insert(&row).await {
                    error!("Failed to log interaction: {}", e);
                    handle
                        .lock()
                        .await
                        .set_notice(format!("Could not save this conversation: {}", e));
                }
            }
            Err(e) => {
                error!("Chat engine failed: {}", e);
                handle.lock().await.fail(format!("Sorry, something went wrong: {}", e));
            }
        }

        Ok(Directive::Rerun)
    }

    async fn record_feedback(&self, id: Uuid, feedback: FeedbackEvent) -> Result<Directive> {
        let handle = self.sessions.get(id).await?;
        let record = FeedbackRecord::try_from(feedback)?;

        let outcome = self.log.apply_feedback(&record).await;

        let mut session = handle.lock().await;
        session.touch();
        match outcome {
            Ok(true) => session.clear_notice(),
            Ok(false) => {
                info!("Feedback left no trace in the log");
                session.clear_notice();
            }
            Err(e) => {
                error!("Failed to record feedback: {}", e);
                session.set_notice(format!("Could not save your feedback: {}", e));
            }
        }
        Ok(Directive::Render(self.render(&session)))
    }

    fn render(&self, session: &Session) -> View {
        let ui = &self.settings.ui;
        let turns = session.memory().get();
        let shown = history::render(&turns, self.settings.history.max_messages, session.started());

        let messages = shown
            .iter()
            .map(|turn| RenderedTurn {
                role: turn.role,
                name: ui.roles.get(turn.role).to_string(),
                avatar: ui.avatars.get(turn.role).to_string(),
                content: turn.content.clone(),
            })
            .collect();

        let enabled = session.accepts_input();

        View {
            session_id: session.id(),
            phase: session.phase(),
            messages,
            pending_query: session.pending().map(|p| p.query.clone()),
            input_enabled: enabled,
            placeholder: if enabled {
                ui.placeholder.clone()
            } else {
                ui.busy_placeholder.clone()
            },
            buttons: ui
                .buttons
                .iter()
                .map(|b| ButtonView {
                    label: b.label.clone(),
                    enabled,
                })
                .collect(),
            feedback_key: session.feedback_key().map(str::to_string),
            feedback_label: ui.feedback_label.clone(),
            error: session.notice().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KingbotError;
    use crate::memory::ChatTurn;
    use crate::rag::{ChatEngine, ChatResponse, ContextChunk};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const HOURS_URL: &str = "https://library.sjsu.edu/library-hours/library-hours";

    /// Answers every question with the hours page, or fails when told to.
    #[derive(Default)]
    struct ScriptedEngine {
        calls: AtomicUsize,
        fail: bool,
        /// When set, each call waits here until notified.
        gate: Option<Arc<Notify>>,
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl ChatEngine for ScriptedEngine {
        async fn chat(&self, _history: &[ChatTurn], _query: &str) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(KingbotError::OpenAI("rate limited".to_string()));
            }
            Ok(ChatResponse {
                response: format!("...see hours page: {}", HOURS_URL),
                sources: vec![ContextChunk {
                    source_url: HOURS_URL.to_string(),
                    title: "Library Hours".to_string(),
                    content: "Hours".to_string(),
                    score: 0.92,
                }],
            })
        }
    }

    struct FixedFactory(Arc<ScriptedEngine>);

    #[async_trait]
    impl EngineFactory for FixedFactory {
        fn fingerprint(&self) -> u64 {
            0
        }

        async fn build(&self) -> Result<Arc<dyn ChatEngine>> {
            Ok(self.0.clone())
        }
    }

    /// Log whose every write fails.
    struct BrokenLog;

    #[async_trait]
    impl InteractionLog for BrokenLog {
        async fn insert(&self, _row: &InteractionRow) -> Result<()> {
            Err(KingbotError::Log("disk full".to_string()))
        }

        async fn apply_feedback(&self, _record: &FeedbackRecord) -> Result<bool> {
            Err(KingbotError::Log("disk full".to_string()))
        }
    }

    fn bot_with(engine: Arc<ScriptedEngine>) -> (Arc<Kingbot>, Arc<SqliteInteractionLog>) {
        let log = Arc::new(SqliteInteractionLog::in_memory().unwrap());
        let bot = Kingbot::with_components(
            Settings::default(),
            Arc::new(FixedFactory(engine)),
            log.clone(),
        );
        (Arc::new(bot), log)
    }

    fn query(text: &str) -> Event {
        Event::Query {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_new_session_shows_greeting() {
        let (bot, _) = bot_with(Arc::new(ScriptedEngine::default()));
        let id = bot.open_session().await;

        let view = bot.view(id).await.unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::Assistant);
        assert_eq!(view.messages[0].content, "Ask me a question about SJSU Library!");
        assert!(view.input_enabled);
        assert_eq!(view.buttons.len(), 3);
        assert!(view.feedback_key.is_none());
    }

    #[tokio::test]
    async fn test_submit_reruns_then_answers() {
        let engine = Arc::new(ScriptedEngine::default());
        let (bot, _) = bot_with(engine.clone());
        let id = bot.open_session().await;

        let directive = bot.handle(id, query("What are the library hours?")).await.unwrap();
        assert!(matches!(directive, Directive::Rerun));

        let view = bot.view(id).await.unwrap();
        assert_eq!(view.phase, Phase::Pending);
        assert_eq!(view.pending_query.as_deref(), Some("What are the library hours?"));
        assert!(!view.input_enabled);
        assert_eq!(view.placeholder, "Please wait...");
        // Greeting is hidden once the conversation starts
        assert!(view.messages.is_empty());

        let directive = bot.handle(id, Event::Refresh).await.unwrap();
        assert!(matches!(directive, Directive::Rerun));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

        match bot.handle(id, Event::Refresh).await.unwrap() {
            Directive::Render(view) => {
                assert_eq!(view.phase, Phase::Idle);
                assert_eq!(view.messages.len(), 2);
            }
            Directive::Rerun => panic!("expected a render"),
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_question_and_feedback() {
        let engine = Arc::new(ScriptedEngine::default());
        let (bot, log) = bot_with(engine.clone());
        let id = bot.open_session().await;

        let view = bot.dispatch(id, query("What are the library hours?")).await.unwrap();

        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].role, Role::User);
        assert_eq!(view.messages[0].content, "What are the library hours?");
        assert_eq!(view.messages[1].role, Role::Assistant);
        assert!(view.messages[1].content.ends_with(HOURS_URL));
        assert!(view.error.is_none());

        let key = view.feedback_key.clone().unwrap();
        let logged = log.get(&key).unwrap().unwrap();
        assert_eq!(logged.row.query, "What are the library hours?");
        assert_eq!(logged.row.session_id, id.to_string());
        assert_eq!(logged.row.reference, HOURS_URL);
        assert_eq!(logged.good, None);
        assert_eq!(logged.bad, None);
        assert_eq!(log.row_count().unwrap(), 1);

        let view = bot
            .dispatch(
                id,
                Event::Feedback(FeedbackEvent {
                    key: key.clone(),
                    rating: Some("👍".to_string()),
                    comment: Some("helpful".to_string()),
                }),
            )
            .await
            .unwrap();
        assert!(view.error.is_none());

        let logged = log.get(&key).unwrap().unwrap();
        assert_eq!(logged.good.as_deref(), Some("helpful"));
        assert_eq!(logged.bad, None);
        assert_eq!(log.row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quick_question_logs_chip() {
        let (bot, log) = bot_with(Arc::new(ScriptedEngine::default()));
        let id = bot.open_session().await;

        let view = bot
            .dispatch(id, Event::QuickQuestion { index: 0 })
            .await
            .unwrap();
        assert_eq!(view.messages[0].content, "What are the library hours?");

        let logged = log.get(view.feedback_key.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(logged.row.query, "What are the library hours? (hours)");

        assert!(matches!(
            bot.dispatch(id, Event::QuickQuestion { index: 9 }).await,
            Err(KingbotError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_query_is_ignored() {
        let engine = Arc::new(ScriptedEngine::default());
        let (bot, _) = bot_with(engine.clone());
        let id = bot.open_session().await;

        let view = bot.dispatch(id, query("   ")).await.unwrap();
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_keeps_memory_and_unlocks() {
        let engine = Arc::new(ScriptedEngine {
            fail: true,
            ..Default::default()
        });
        let (bot, log) = bot_with(engine.clone());
        let id = bot.open_session().await;

        let before = bot.sessions().get(id).await.unwrap().lock().await.memory().len();
        let view = bot.dispatch(id, query("What are the library hours?")).await.unwrap();

        assert_eq!(view.phase, Phase::Idle);
        assert!(view.input_enabled);
        assert!(view.error.as_deref().unwrap().contains("rate limited"));
        let after = bot.sessions().get(id).await.unwrap().lock().await.memory().len();
        assert_eq!(before, after);
        assert!(view.feedback_key.is_none());
        assert_eq!(log.row_count().unwrap(), 0);

        // The user may retry
        bot.dispatch(id, query("What are the library hours?")).await.unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_question() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(ScriptedEngine {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (bot, _) = bot_with(engine.clone());
        let id = bot.open_session().await;

        let first = {
            let bot = bot.clone();
            tokio::spawn(async move { bot.dispatch(id, query("What are the library hours?")).await })
        };
        engine.entered.notified().await;

        let view = bot.view(id).await.unwrap();
        assert_eq!(view.phase, Phase::Processing);
        assert!(!view.input_enabled);
        assert!(view.buttons.iter().all(|b| !b.enabled));

        assert!(matches!(
            bot.handle(id, query("Where can I print?")).await,
            Err(KingbotError::SessionBusy)
        ));
        assert!(matches!(
            bot.handle(id, Event::QuickQuestion { index: 1 }).await,
            Err(KingbotError::SessionBusy)
        ));
        // A refresh during processing only renders
        assert!(matches!(
            bot.handle(id, Event::Refresh).await.unwrap(),
            Directive::Render(_)
        ));

        gate.notify_one();
        let view = first.await.unwrap().unwrap();
        assert_eq!(view.messages.len(), 2);
        assert!(view.pending_query.is_none());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_failure_is_shown_but_answer_kept() {
        let engine = Arc::new(ScriptedEngine::default());
        let bot = Kingbot::with_components(
            Settings::default(),
            Arc::new(FixedFactory(engine)),
            Arc::new(BrokenLog),
        );
        let id = bot.open_session().await;

        let view = bot.dispatch(id, query("What are the library hours?")).await.unwrap();
        assert_eq!(view.messages.len(), 2);
        assert!(view.error.as_deref().unwrap().contains("disk full"));

        let view = bot
            .dispatch(
                id,
                Event::Feedback(FeedbackEvent {
                    key: view.feedback_key.unwrap(),
                    rating: Some("👎".to_string()),
                    comment: None,
                }),
            )
            .await
            .unwrap();
        assert!(view.error.as_deref().unwrap().contains("Could not save your feedback"));
        assert_eq!(view.messages.len(), 2);
        assert!(view.input_enabled);
    }

    #[tokio::test]
    async fn test_sweep_spares_session_being_answered() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(ScriptedEngine {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let log = Arc::new(SqliteInteractionLog::in_memory().unwrap());
        let mut settings = Settings::default();
        settings.session.idle_timeout_secs = 0;
        let bot = Arc::new(Kingbot::with_components(
            settings,
            Arc::new(FixedFactory(engine.clone())),
            log.clone(),
        ));
        let id = bot.open_session().await;

        let first = {
            let bot = bot.clone();
            tokio::spawn(async move { bot.dispatch(id, query("What are the library hours?")).await })
        };
        engine.entered.notified().await;

        assert_eq!(bot.view(id).await.unwrap().phase, Phase::Processing);
        assert_eq!(bot.sweep_idle_sessions().await, 0);

        gate.notify_one();
        let view = first.await.unwrap().unwrap();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(log.row_count().unwrap(), 1);

        // Once idle again it may be swept
        assert_eq!(bot.sweep_idle_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_successful_feedback_clears_earlier_error() {
        let engine = Arc::new(ScriptedEngine::default());
        let (bot, log) = bot_with(engine);
        let id = bot.open_session().await;

        let view = bot.dispatch(id, query("What are the library hours?")).await.unwrap();
        let key = view.feedback_key.unwrap();
        bot.sessions()
            .get(id)
            .await
            .unwrap()
            .lock()
            .await
            .set_notice("Sorry, something went wrong: timeout");

        let view = bot
            .dispatch(
                id,
                Event::Feedback(FeedbackEvent {
                    key: key.clone(),
                    rating: Some("👍".to_string()),
                    comment: None,
                }),
            )
            .await
            .unwrap();

        assert!(view.error.is_none());
        assert_eq!(log.get(&key).unwrap().unwrap().good.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (bot, _) = bot_with(Arc::new(ScriptedEngine::default()));
        let id = bot.open_session().await;

        for i in 0..7 {
            bot.dispatch(id, query(&format!("question {}", i))).await.unwrap();
        }

        let view = bot.view(id).await.unwrap();
        assert_eq!(view.messages.len(), 10);
        assert_eq!(view.messages[9].role, Role::Assistant);
        assert_eq!(view.messages[8].content, "question 6");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (bot, _) = bot_with(Arc::new(ScriptedEngine::default()));
        assert!(matches!(
            bot.dispatch(Uuid::new_v4(), Event::Refresh).await,
            Err(KingbotError::SessionNotFound(_))
        ));
    }
}
