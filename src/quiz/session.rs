use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex as SessionLock, OwnedMutexGuard};

use crate::quiz::parser::{ParseError, QuestionSource};
use crate::quiz::retry::{retry, retry_if, RetryPolicy};
use crate::quiz::store::{ActiveQuestionStore, StoreError};
use crate::quiz::{is_correct_answer, QuestionBank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    AwaitingChoice,
    AwaitingAnswer,
}

/// Per-user state kept in this process. Only the active question is shared
/// with other processes, through the store, and `phase` is refreshed from
/// it at the start of every turn.
#[derive(Debug)]
pub struct Session {
    pub bank: QuestionBank,
    pub phase: Phase,
    last_seen: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            bank: QuestionBank::new(),
            phase: Phase::default(),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("question bank unavailable: {0}")]
    Parse(#[from] ParseError),

    #[error("the corpus has no questions")]
    EmptyCorpus,

    #[error("no active question")]
    MissingActiveQuestion,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corpus loader crashed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    Answered(AnswerOutcome),
    /// Free text while no question is being answered
    Unrecognized,
}

/// What giving up produced: the revealed answer, then the follow-up
/// question (which can fail on its own, e.g. when the corpus is gone).
#[derive(Debug)]
pub struct GiveUp {
    pub question: String,
    pub answer: String,
    pub next_question: Result<String, QuizError>,
}

type SessionHandle = Arc<SessionLock<Session>>;

/// Drives every user's quiz.
///
/// All operations on one user run under that user's lock, so reading the
/// active question, touching the bank and writing the active question back
/// happen as one step. Different users never wait on each other.
pub struct SessionEngine {
    source: Arc<dyn QuestionSource>,
    store: Arc<dyn ActiveQuestionStore>,
    retry: RetryPolicy,
    sessions: Mutex<HashMap<UserId, SessionHandle>>,
}

impl SessionEngine {
    pub fn new(
        source: Arc<dyn QuestionSource>,
        store: Arc<dyn ActiveQuestionStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            store,
            retry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Begins a conversation with a freshly parsed bank.
    pub async fn start(&self, user: UserId) -> Result<(), QuizError> {
        let mut session = self.lock(user).await;
        session.phase = Phase::AwaitingChoice;
        // Left empty on failure so the next question retries the load
        session.bank = QuestionBank::new();
        session.bank = self.load_bank().await?;
        log::info!(
            "User {} started with {} questions",
            user,
            session.bank.len()
        );
        Ok(())
    }

    pub async fn new_question(&self, user: UserId) -> Result<String, QuizError> {
        let mut session = self.lock(user).await;
        self.pose_question(user, &mut session).await
    }

    pub async fn submit_answer(
        &self,
        user: UserId,
        text: &str,
    ) -> Result<AnswerOutcome, QuizError> {
        let mut session = self.lock(user).await;
        let (question, answer) = self.active_question(user, &mut session).await?;
        self.check_answer(user, &mut session, text, question, answer).await
    }

    /// Treats free text as an answer only while a question is open, in this
    /// process or any other sharing the store.
    pub async fn handle_text(
        &self,
        user: UserId,
        text: &str,
    ) -> Result<TextOutcome, QuizError> {
        let mut session = self.lock(user).await;
        let Some(question) = self.sync_phase(user, &mut session).await? else {
            return Ok(TextOutcome::Unrecognized);
        };
        let answer = self.answer_for(user, &mut session, &question).await?;
        let outcome = self
            .check_answer(user, &mut session, text, question, answer)
            .await?;
        Ok(TextOutcome::Answered(outcome))
    }

    /// Reveals the answer, drops the question and poses the next one.
    pub async fn give_up(&self, user: UserId) -> Result<GiveUp, QuizError> {
        let mut session = self.lock(user).await;

        let (question, answer) = self.active_question(user, &mut session).await?;
        self.store_clear(user).await?;
        session.bank.remove(&question);
        session.phase = Phase::AwaitingChoice;
        log::debug!("User {} gave up on {:?}", user, question);

        let next_question = self.pose_question(user, &mut session).await;
        Ok(GiveUp {
            question,
            answer,
            next_question,
        })
    }

    /// Ends the conversation and forgets the user's local state.
    pub async fn cancel(&self, user: UserId) -> Result<(), QuizError> {
        let removed = self.sessions().remove(&user);
        // Wait for a turn of this user that may still be running
        let _session = match &removed {
            Some(handle) => Some(handle.lock().await),
            None => None,
        };
        self.store_clear(user).await?;
        log::info!("User {} cancelled the quiz", user);
        Ok(())
    }

    /// Drops sessions nobody has touched for `max_idle`. Their banks are
    /// parsed again on the user's next turn. Returns how many were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, handle| {
            // Another clone means a turn is queued or running
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => session.last_seen.elapsed() < max_idle,
                Err(_) => true,
            }
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            log::debug!("Evicted {} idle session(s)", evicted);
        }
        evicted
    }

    #[cfg(test)]
    pub async fn phase(&self, user: UserId) -> Phase {
        let Some(handle) = self.existing(user) else {
            return Phase::AwaitingChoice;
        };
        let phase = handle.lock().await.phase;
        phase
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn existing(&self, user: UserId) -> Option<SessionHandle> {
        self.sessions().get(&user).cloned()
    }

    /// Takes the user's lock for one turn, creating the session if needed.
    async fn lock(&self, user: UserId) -> OwnedMutexGuard<Session> {
        let handle = self.sessions().entry(user).or_default().clone();
        let mut session = handle.lock_owned().await;
        session.last_seen = Instant::now();
        session
    }

    /// The store decides whether a question is open; another process may
    /// have posed or settled it since this session last ran.
    async fn sync_phase(
        &self,
        user: UserId,
        session: &mut Session,
    ) -> Result<Option<String>, QuizError> {
        let question = self.store_get(user).await?;
        session.phase = match question {
            Some(_) => Phase::AwaitingAnswer,
            None => Phase::AwaitingChoice,
        };
        Ok(question)
    }

    async fn pose_question(
        &self,
        user: UserId,
        session: &mut Session,
    ) -> Result<String, QuizError> {
        if session.bank.is_empty() {
            log::info!("Question bank of user {} is exhausted, reloading", user);
            session.bank = self.refill(user).await?;
        }

        let question = session
            .bank
            .random_question(&mut rand::thread_rng())
            .ok_or(QuizError::EmptyCorpus)?;
        self.store_set(user, &question).await?;
        session.phase = Phase::AwaitingAnswer;
        Ok(question)
    }

    async fn check_answer(
        &self,
        user: UserId,
        session: &mut Session,
        text: &str,
        question: String,
        answer: String,
    ) -> Result<AnswerOutcome, QuizError> {
        if !is_correct_answer(text, &answer) {
            log::debug!("User {} answered {:?}, expected {:?}", user, text, answer);
            return Ok(AnswerOutcome::Incorrect);
        }

        self.store_clear(user).await?;
        session.bank.remove(&question);
        session.phase = Phase::AwaitingChoice;
        Ok(AnswerOutcome::Correct)
    }

    async fn active_question(
        &self,
        user: UserId,
        session: &mut Session,
    ) -> Result<(String, String), QuizError> {
        let Some(question) = self.sync_phase(user, session).await? else {
            return Err(QuizError::MissingActiveQuestion);
        };
        let answer = self.answer_for(user, session, &question).await?;
        Ok((question, answer))
    }

    async fn answer_for(
        &self,
        user: UserId,
        session: &mut Session,
        question: &str,
    ) -> Result<String, QuizError> {
        if session.bank.is_empty() {
            session.bank = self.load_bank().await?;
        }

        match session.bank.answer(question) {
            Some(answer) => Ok(answer.to_string()),
            None => {
                // Posed by another process whose bank we do not have
                log::warn!("Active question of user {} is not in the local bank", user);
                self.store_clear(user).await?;
                session.phase = Phase::AwaitingChoice;
                Err(QuizError::MissingActiveQuestion)
            }
        }
    }

    /// A randomly picked archive member can hold no questions at all, so an
    /// empty load is tried again a bounded number of times.
    async fn refill(&self, user: UserId) -> Result<QuestionBank, QuizError> {
        for attempt in 1..=self.retry.attempts {
            let bank = self.load_bank().await?;
            if !bank.is_empty() {
                return Ok(bank);
            }
            log::warn!(
                "Corpus load {}/{} for user {} had no questions",
                attempt,
                self.retry.attempts,
                user
            );
        }
        Err(QuizError::EmptyCorpus)
    }

    async fn load_bank(&self) -> Result<QuestionBank, QuizError> {
        let source = &self.source;
        retry_if(
            self.retry,
            "Loading questions",
            || {
                let source = Arc::clone(source);
                async move {
                    let bank = tokio::task::spawn_blocking(move || source.load()).await??;
                    Ok::<_, QuizError>(bank)
                }
            },
            |err: &QuizError| matches!(err, QuizError::Parse(parse) if parse.is_transient()),
        )
        .await
    }

    async fn store_get(&self, user: UserId) -> Result<Option<String>, QuizError> {
        let store = &*self.store;
        let question = retry(self.retry, "Reading active question", move || {
            store.get(user)
        })
        .await?;
        Ok(question)
    }

    async fn store_set(&self, user: UserId, question: &str) -> Result<(), QuizError> {
        let store = &*self.store;
        retry(self.retry, "Saving active question", move || {
            store.set(user, question)
        })
        .await?;
        Ok(())
    }

    async fn store_clear(&self, user: UserId) -> Result<(), QuizError> {
        let store = &*self.store;
        retry(self.retry, "Clearing active question", move || {
            store.clear(user)
        })
        .await?;
        Ok(())
    }
}
