//! Step-by-step glossary entry authoring.
//!
//! An admin answers one question per step; each answer moves the session to
//! the next [`DraftStep`]. Sessions that sit idle past their expiry are
//! dropped by [`SessionManager::sweep`].

use crate::glossary::{GlossaryEntry, ReplacementMode};
use crate::ids::{GuildId, UserId};
use crate::language::Language;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStep {
    SourceLanguage,
    SourceText,
    TargetLanguage,
    TargetText,
    ReplacementMode,
    Confirm,
}

impl DraftStep {
    pub fn prompt(&self) -> &'static str {
        match self {
            DraftStep::SourceLanguage => "Which language is the term written in? (zh / en)",
            DraftStep::SourceText => "Enter the term to match.",
            DraftStep::TargetLanguage => "Which language should it become? (zh / en)",
            DraftStep::TargetText => "Enter the replacement text.",
            DraftStep::ReplacementMode => "Always replace, or only when it fits the context? (mandatory / judged)",
            DraftStep::Confirm => "Save this entry? (yes / no)",
        }
    }
}

/// Answers collected so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlossaryDraft {
    pub source_language: Option<Language>,
    pub source_text: Option<String>,
    pub target_language: Option<Language>,
    pub target_text: Option<String>,
    pub replacement_mode: Option<ReplacementMode>,
}

impl GlossaryDraft {
    fn into_entry(self) -> Option<GlossaryEntry> {
        Some(GlossaryEntry {
            id: Uuid::new_v4().simple().to_string(),
            source_language: self.source_language?,
            source_text: self.source_text?,
            target_language: self.target_language?,
            target_text: self.target_text?,
            replacement_mode: self.replacement_mode?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DraftSession {
    pub id: Uuid,
    pub guild: GuildId,
    pub user: UserId,
    pub step: DraftStep,
    pub draft: GlossaryDraft,
    pub expires_at: DateTime<Utc>,
}

/// Result of feeding one answer into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The answer was taken; ask the next question.
    Next { step: DraftStep, prompt: &'static str },
    /// The answer did not fit the current step; ask again.
    Retry { step: DraftStep, reason: String },
    /// The admin confirmed. The session is closed.
    Finished { guild: GuildId, entry: GlossaryEntry },
    /// The admin declined at the confirmation step. The session is closed.
    Discarded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No authoring session {0}")]
    NotFound(Uuid),

    #[error("Authoring session {0} has expired")]
    Expired(Uuid),

    #[error("Session {0} belongs to another user")]
    WrongUser(Uuid),
}

pub struct SessionManager {
    sessions: Mutex<HashMap<Uuid, DraftSession>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(10)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DraftSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open a session and return its id with the first question.
    pub fn start(&self, guild: GuildId, user: UserId, now: DateTime<Utc>) -> (Uuid, &'static str) {
        let id = Uuid::new_v4();
        let step = DraftStep::SourceLanguage;
        self.lock().insert(
            id,
            DraftSession {
                id,
                guild,
                user,
                step,
                draft: GlossaryDraft::default(),
                expires_at: now + self.ttl,
            },
        );
        info!("Glossary authoring session {} started in guild {}", id, guild);
        (id, step.prompt())
    }

    pub fn get(&self, id: Uuid) -> Option<DraftSession> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Feed one answer. Every accepted or rejected answer pushes the expiry
    /// out by the session TTL.
    pub fn advance(
        &self,
        id: Uuid,
        user: UserId,
        input: &str,
        now: DateTime<Utc>,
    ) -> Result<Advance, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if session.expires_at <= now {
            sessions.remove(&id);
            return Err(SessionError::Expired(id));
        }
        if session.user != user {
            return Err(SessionError::WrongUser(id));
        }
        session.expires_at = now + self.ttl;

        let input = input.trim();
        let next = match session.step {
            DraftStep::SourceLanguage => match Language::parse(input) {
                Some(language) => {
                    session.draft.source_language = Some(language);
                    DraftStep::SourceText
                }
                None => return Ok(retry(session.step, format!("Unknown language '{}'", input))),
            },
            DraftStep::SourceText => {
                if input.is_empty() {
                    return Ok(retry(session.step, "The term cannot be empty".to_string()));
                }
                session.draft.source_text = Some(input.to_string());
                DraftStep::TargetLanguage
            }
            DraftStep::TargetLanguage => match Language::parse(input) {
                Some(language) => {
                    session.draft.target_language = Some(language);
                    DraftStep::TargetText
                }
                None => return Ok(retry(session.step, format!("Unknown language '{}'", input))),
            },
            DraftStep::TargetText => {
                if input.is_empty() {
                    return Ok(retry(session.step, "The replacement cannot be empty".to_string()));
                }
                session.draft.target_text = Some(input.to_string());
                DraftStep::ReplacementMode
            }
            DraftStep::ReplacementMode => match parse_mode(input) {
                Some(mode) => {
                    session.draft.replacement_mode = Some(mode);
                    DraftStep::Confirm
                }
                None => return Ok(retry(session.step, format!("Unknown mode '{}'", input))),
            },
            DraftStep::Confirm => {
                return Ok(match parse_confirmation(input) {
                    Some(true) => {
                        let Some(session) = sessions.remove(&id) else {
                            return Err(SessionError::NotFound(id));
                        };
                        match session.draft.into_entry() {
                            Some(entry) => {
                                info!("Glossary entry {} authored in guild {}", entry.id, session.guild);
                                Advance::Finished {
                                    guild: session.guild,
                                    entry,
                                }
                            }
                            None => Advance::Discarded,
                        }
                    }
                    Some(false) => {
                        sessions.remove(&id);
                        debug!("Glossary authoring session {} discarded", id);
                        Advance::Discarded
                    }
                    None => retry(session.step, "Answer yes or no".to_string()),
                });
            }
        };

        session.step = next;
        Ok(Advance::Next {
            step: next,
            prompt: next.prompt(),
        })
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Drop expired sessions; returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Swept {} expired glossary sessions", removed);
        }
        removed
    }
}

fn retry(step: DraftStep, reason: String) -> Advance {
    Advance::Retry { step, reason }
}

fn parse_mode(input: &str) -> Option<ReplacementMode> {
    match input.to_lowercase().as_str() {
        "mandatory" | "always" | "m" | "强制" => Some(ReplacementMode::Mandatory),
        "judged" | "context" | "j" | "判断" => Some(ReplacementMode::Judged),
        _ => None,
    }
}

fn parse_confirmation(input: &str) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "yes" | "y" | "是" | "确认" => Some(true),
        "no" | "n" | "否" | "取消" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(5);
    const ADMIN: UserId = UserId(77);

    fn manager() -> SessionManager {
        SessionManager::new(std::time::Duration::from_secs(600))
    }

    fn answer(m: &SessionManager, id: Uuid, input: &str, now: DateTime<Utc>) -> Advance {
        m.advance(id, ADMIN, input, now).expect("Should advance")
    }

    #[test]
    fn test_full_flow_produces_entry() {
        let m = manager();
        let now = Utc::now();
        let (id, prompt) = m.start(GUILD, ADMIN, now);
        assert_eq!(prompt, DraftStep::SourceLanguage.prompt());

        assert!(matches!(answer(&m, id, "zh", now), Advance::Next { step: DraftStep::SourceText, .. }));
        answer(&m, id, "  打野  ", now);
        answer(&m, id, "english", now);
        answer(&m, id, "jungler", now);
        assert!(matches!(answer(&m, id, "judged", now), Advance::Next { step: DraftStep::Confirm, .. }));

        match answer(&m, id, "yes", now) {
            Advance::Finished { guild, entry } => {
                assert_eq!(guild, GUILD);
                assert_eq!(entry.source_language, Language::Chinese);
                assert_eq!(entry.source_text, "打野");
                assert_eq!(entry.target_language, Language::English);
                assert_eq!(entry.target_text, "jungler");
                assert_eq!(entry.replacement_mode, ReplacementMode::Judged);
                assert_eq!(entry.id.len(), 32);
            }
            other => panic!("Expected finished entry, got {:?}", other),
        }
        assert!(m.is_empty());
    }

    #[test]
    fn test_invalid_answer_keeps_step() {
        let m = manager();
        let now = Utc::now();
        let (id, _) = m.start(GUILD, ADMIN, now);

        match answer(&m, id, "klingon", now) {
            Advance::Retry { step, reason } => {
                assert_eq!(step, DraftStep::SourceLanguage);
                assert!(reason.contains("klingon"));
            }
            other => panic!("Expected retry, got {:?}", other),
        }
        assert_eq!(m.get(id).expect("Session should exist").step, DraftStep::SourceLanguage);
    }

    #[test]
    fn test_declining_discards() {
        let m = manager();
        let now = Utc::now();
        let (id, _) = m.start(GUILD, ADMIN, now);
        for input in ["en", "gg", "zh", "打得好", "mandatory"] {
            answer(&m, id, input, now);
        }
        assert_eq!(answer(&m, id, "no", now), Advance::Discarded);
        assert_eq!(m.advance(id, ADMIN, "yes", now), Err(SessionError::NotFound(id)));
    }

    #[test]
    fn test_other_user_cannot_answer() {
        let m = manager();
        let now = Utc::now();
        let (id, _) = m.start(GUILD, ADMIN, now);
        assert_eq!(m.advance(id, UserId(1), "zh", now), Err(SessionError::WrongUser(id)));
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let m = manager();
        let now = Utc::now();
        let (id, _) = m.start(GUILD, ADMIN, now);

        let later = now + Duration::seconds(601);
        assert_eq!(m.advance(id, ADMIN, "zh", later), Err(SessionError::Expired(id)));
        assert!(m.get(id).is_none());
    }

    #[test]
    fn test_activity_extends_expiry() {
        let m = manager();
        let now = Utc::now();
        let (id, _) = m.start(GUILD, ADMIN, now);
        answer(&m, id, "zh", now + Duration::seconds(500));

        assert_eq!(m.sweep(now + Duration::seconds(700)), 0);
        assert_eq!(m.sweep(now + Duration::seconds(1101)), 1);
    }

    #[test]
    fn test_sweep_and_cancel() {
        let m = manager();
        let now = Utc::now();
        let (old, _) = m.start(GUILD, ADMIN, now - Duration::seconds(900));
        let (fresh, _) = m.start(GUILD, ADMIN, now);

        assert_eq!(m.sweep(now), 1);
        assert!(m.get(old).is_none());
        assert!(m.cancel(fresh));
        assert!(!m.cancel(fresh));
        assert!(m.is_empty());
    }
}
