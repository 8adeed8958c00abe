//! Per-session state: conversation memory, the processing phase and the
//! pending question.

use crate::config::MemorySettings;
use crate::error::{KingbotError, Result};
use crate::memory::{ChatTurn, ConversationMemory};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Where a session is in answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Ready for input.
    Idle,
    /// A question was accepted and waits for the next refresh.
    Pending,
    /// The chat engine is answering.
    Processing,
}

/// A question accepted from the user but not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInteraction {
    /// When the question was submitted; the key feedback is joined on.
    pub moment: DateTime<Local>,
    pub query: String,
    /// Label of the quick question button, if one was used.
    pub chip: Option<String>,
}

impl PendingInteraction {
    pub fn new(query: impl Into<String>, chip: Option<String>) -> Self {
        Self {
            moment: Local::now(),
            query: query.into(),
            chip,
        }
    }

    /// Timestamp key in ISO-8601 form with microseconds.
    pub fn moment_key(&self) -> String {
        self.moment.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }

    /// The query as written to the interaction log.
    pub fn logged_query(&self) -> String {
        match &self.chip {
            Some(chip) if !chip.is_empty() => format!("{} ({})", self.query, chip),
            _ => self.query.clone(),
        }
    }
}

/// State owned by one user session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    memory: ConversationMemory,
    phase: Phase,
    pending: Option<PendingInteraction>,
    started: bool,
    feedback_key: Option<String>,
    notice: Option<String>,
    last_interaction: Instant,
}

impl Session {
    /// Create a session, seeding the greeting from settings.
    pub fn new(id: Uuid, settings: &MemorySettings) -> Self {
        Self {
            id,
            memory: ConversationMemory::with_greeting(settings.token_limit, &settings.greeting),
            phase: Phase::Idle,
            pending: None,
            started: false,
            feedback_key: None,
            notice: None,
            last_interaction: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingInteraction> {
        self.pending.as_ref()
    }

    /// Whether the user has asked anything yet.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Timestamp key of the latest answer, for the feedback widget.
    pub fn feedback_key(&self) -> Option<&str> {
        self.feedback_key.as_deref()
    }

    /// Error message to show the user, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, message: impl Into<String>) {
        self.notice = Some(message.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    /// Whether input and quick questions should be accepted.
    pub fn accepts_input(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_interaction = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_interaction.elapsed()
    }

    /// Accept a question. Rejected while another one is pending or processing.
    pub fn submit(&mut self, interaction: PendingInteraction) -> Result<()> {
        if self.phase != Phase::Idle {
            debug!(session = %self.id, phase = ?self.phase, "Rejected question while busy");
            return Err(KingbotError::SessionBusy);
        }

        self.started = true;
        self.notice = None;
        self.pending = Some(interaction);
        self.phase = Phase::Pending;
        self.touch();
        Ok(())
    }

    /// Move a pending question into processing and hand it out.
    ///
    /// Returns `None` unless the session is pending, so a question is taken at
    /// most once.
    pub fn begin_processing(&mut self) -> Option<PendingInteraction> {
        if self.phase != Phase::Pending {
            return None;
        }
        let pending = self.pending.take()?;
        self.phase = Phase::Processing;
        Some(pending)
    }

    /// Record the answer to the question being processed.
    pub fn complete(&mut self, interaction: &PendingInteraction, answer: &str) {
        self.memory.append(ChatTurn::user(interaction.query.clone()));
        self.memory.append(ChatTurn::assistant(answer));
        self.feedback_key = Some(interaction.moment_key());
        self.phase = Phase::Idle;
        self.touch();
    }

    /// Abandon the question being processed, keeping memory as it was.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.notice = Some(message.into());
        self.phase = Phase::Idle;
        self.touch();
    }
}

/// All live sessions, each behind its own lock.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session.
    pub async fn create(&self, settings: &MemorySettings) -> Uuid {
        let id = Uuid::new_v4();
        let session = Arc::new(Mutex::new(Session::new(id, settings)));
        self.sessions.write().await.insert(id, session);
        info!(session = %id, "Session started");
        id
    }

    /// Look up a session.
    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| KingbotError::SessionNotFound(id.to_string()))
    }

    /// End a session. Returns whether it existed.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            info!(session = %id, "Session ended");
        }
        removed
    }

    /// Drop sessions idle for longer than `max_idle`. Sessions that are locked,
    /// or have a question pending or being answered, are in use and kept.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(s) => s.phase() != Phase::Idle || s.idle_for() < max_idle,
            Err(_) => true,
        });
        let swept = before - sessions.len();
        if swept > 0 {
            info!("Swept {} idle sessions", swept);
        }
        swept
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
