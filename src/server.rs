//! HTTP surface: health checks for the uptime monitor, and the endpoints a
//! chat adapter uses to relay messages and report deliveries.

use crate::dictionary::DictionaryStore;
use crate::glossary::GlossaryStore;
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::mirror::Edges;
use crate::relay::{InboundMessage, OutboundPost, Relay};
use crate::security::{is_authorized, API_KEY_HEADER};
use crate::session::{Advance, SessionError, SessionManager};
use crate::storage::Storage;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Seconds without a heartbeat after which `/health` reports failure.
pub const HEARTBEAT_MAX_AGE_SECS: i64 = 60;

/// Liveness as seen by `/health`.
#[derive(Debug, Default)]
pub struct Heartbeat {
    running: AtomicBool,
    last_beat: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Running,
    Starting,
    Stale,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process alive at `now` (unix seconds).
    pub fn beat(&self, now: i64) {
        self.last_beat.store(now, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn status(&self, now: i64) -> HealthStatus {
        if !self.running.load(Ordering::Relaxed) {
            return HealthStatus::Starting;
        }
        if now - self.last_beat.load(Ordering::Relaxed) > HEARTBEAT_MAX_AGE_SECS {
            HealthStatus::Stale
        } else {
            HealthStatus::Running
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub glossary: Arc<GlossaryStore>,
    pub dictionary: Arc<DictionaryStore>,
    pub storage: Arc<Storage>,
    pub sessions: Arc<SessionManager>,
    pub heartbeat: Arc<Heartbeat>,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub posts: Vec<OutboundPost>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub guild_id: GuildId,
    pub source_channel_id: ChannelId,
    pub source_message_id: MessageId,
    pub target_channel_id: ChannelId,
    pub mirrored_message_id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub glossary_guilds: usize,
    pub dictionary_guilds: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionAnswer {
    pub user_id: UserId,
    pub input: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionReply {
    pub session_id: Uuid,
    /// Next question, or a closing remark when `done` is set
    pub prompt: String,
    pub done: bool,
    #[serde(default)]
    pub entry_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorsResponse {
    pub mirrors: Edges,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/relay", post(relay_message))
        .route("/delivered", post(record_delivery))
        .route("/reload", post(reload))
        .route("/mirrors/:guild/:message", get(mirrors))
        .route("/glossary/sessions", post(start_session))
        .route("/glossary/sessions/:id", post(answer_session).delete(cancel_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP server listening on port {}", port);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if is_authorized(state.api_key.as_deref(), provided) {
        Ok(())
    } else {
        warn!("Rejected request with missing or wrong API key");
        Err(api_error(StatusCode::UNAUTHORIZED, "Invalid API key"))
    }
}

async fn index() -> &'static str {
    "Bilingual bridge translator"
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.heartbeat.status(Utc::now().timestamp()) {
        HealthStatus::Running => (StatusCode::OK, "Bridge is running"),
        HealthStatus::Starting => (StatusCode::SERVICE_UNAVAILABLE, "Bridge is starting"),
        HealthStatus::Stale => (StatusCode::SERVICE_UNAVAILABLE, "Bridge not responding"),
    }
}

async fn relay_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(inbound): Json<InboundMessage>,
) -> Result<Json<RelayResponse>, ApiError> {
    authorize(&state, &headers)?;
    let relay = Arc::clone(&state.relay);
    let posts = tokio::spawn(async move { relay.process(&inbound).await })
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Relay task failed: {}", e)))?;
    Ok(Json(RelayResponse { posts }))
}

async fn record_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<DeliveryReport>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    state
        .relay
        .record_delivery(
            report.guild_id,
            report.source_channel_id,
            report.source_message_id,
            report.target_channel_id,
            report.mirrored_message_id,
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn mirrors(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((guild, message)): Path<(u64, u64)>,
) -> Result<Json<MirrorsResponse>, ApiError> {
    authorize(&state, &headers)?;
    let mirrors = state.relay.mirrors_of(GuildId(guild), MessageId(message)).await;
    Ok(Json(MirrorsResponse { mirrors }))
}

async fn reload(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<ReloadResponse>, ApiError> {
    authorize(&state, &headers)?;
    state.glossary.reload(&state.storage).await;
    state.dictionary.reload(&state.storage).await;
    Ok(Json(ReloadResponse {
        glossary_guilds: state.glossary.snapshot().guild_count(),
        dictionary_guilds: state.dictionary.snapshot().guild_count(),
    }))
}

async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<SessionReply>, ApiError> {
    authorize(&state, &headers)?;
    let (session_id, prompt) = state.sessions.start(request.guild_id, request.user_id, Utc::now());
    Ok(Json(SessionReply {
        session_id,
        prompt: prompt.to_string(),
        done: false,
        entry_id: None,
    }))
}

async fn answer_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(answer): Json<SessionAnswer>,
) -> Result<Json<SessionReply>, ApiError> {
    authorize(&state, &headers)?;
    let advance = state
        .sessions
        .advance(session_id, answer.user_id, &answer.input, Utc::now())
        .map_err(|e| match e {
            SessionError::NotFound(_) | SessionError::Expired(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
            SessionError::WrongUser(_) => api_error(StatusCode::FORBIDDEN, e.to_string()),
        })?;

    let reply = match advance {
        Advance::Next { prompt, .. } => SessionReply {
            session_id,
            prompt: prompt.to_string(),
            done: false,
            entry_id: None,
        },
        Advance::Retry { step, reason } => SessionReply {
            session_id,
            prompt: format!("{}. {}", reason, step.prompt()),
            done: false,
            entry_id: None,
        },
        Advance::Finished { guild, entry } => {
            let entry_id = entry.id.clone();
            state.glossary.upsert(guild, entry);
            if !state.glossary.persist(&state.storage).await {
                warn!("Glossary entry {} saved in memory only", entry_id);
            }
            SessionReply {
                session_id,
                prompt: "Glossary entry saved.".to_string(),
                done: true,
                entry_id: Some(entry_id),
            }
        }
        Advance::Discarded => SessionReply {
            session_id,
            prompt: "Glossary entry discarded.".to_string(),
            done: true,
            entry_id: None,
        },
    };
    Ok(Json(reply))
}

async fn cancel_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    if state.sessions.cancel(session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            SessionError::NotFound(session_id).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineSettings;
    use crate::mirror::MirrorGraph;
    use crate::orchestrator::TranslationOrchestrator;
    use crate::relay::{BannerSettings, BridgeConfig, GuildBridge, NoFetch};
    use crate::services::{StubJudge, StubTranslator};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct TestServer {
        base: String,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn spawn_server(api_key: Option<&str>) -> TestServer {
        let dir = tempfile::TempDir::new().expect("Should create temp dir");
        let mut guilds = BTreeMap::new();
        guilds.insert(
            GuildId(1),
            GuildBridge {
                zh_channel_id: ChannelId(10),
                en_channel_id: ChannelId(20),
                passthrough: Default::default(),
            },
        );
        let glossary = Arc::new(GlossaryStore::default());
        let dictionary = Arc::new(DictionaryStore::default());
        let orchestrator = TranslationOrchestrator::new(
            Arc::new(StubTranslator::from_pairs(&[("hello", "你好")])),
            Arc::new(StubJudge::unavailable()),
            Arc::clone(&glossary),
            PipelineSettings::default(),
        );
        let relay = Relay::new(
            Arc::new(BridgeConfig {
                default: Default::default(),
                guilds,
            }),
            Arc::new(orchestrator),
            Arc::clone(&dictionary),
            Arc::new(MirrorGraph::new(None, 0)),
            Arc::new(NoFetch),
            BannerSettings::default(),
        );
        let state = AppState {
            relay: Arc::new(relay),
            glossary,
            dictionary,
            storage: Arc::new(Storage::file(dir.path())),
            sessions: Arc::new(SessionManager::new(Duration::from_secs(600))),
            heartbeat: Arc::new(Heartbeat::new()),
            api_key: api_key.map(String::from),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind");
        let addr = listener.local_addr().expect("Should have address");
        let app = router(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestServer {
            base: format!("http://{}", addr),
            state,
            _dir: dir,
        }
    }

    // ==================== Heartbeat Tests ====================

    #[test]
    fn test_heartbeat_status() {
        let heartbeat = Heartbeat::new();
        assert_eq!(heartbeat.status(100), HealthStatus::Starting);
        heartbeat.beat(100);
        assert_eq!(heartbeat.status(130), HealthStatus::Running);
        assert_eq!(heartbeat.status(161), HealthStatus::Stale);
    }

    // ==================== Endpoint Tests ====================

    #[tokio::test]
    async fn test_health_follows_heartbeat() {
        let server = spawn_server(None).await;
        let url = format!("{}/health", server.base);

        let response = reqwest::get(&url).await.expect("Should respond");
        assert_eq!(response.status(), 503);

        server.state.heartbeat.beat(Utc::now().timestamp());
        let response = reqwest::get(&url).await.expect("Should respond");
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_relay_requires_api_key() {
        let server = spawn_server(Some("secret")).await;
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "guild_id": 1,
            "channel_id": 20,
            "message_id": 500,
            "author_name": "bob",
            "content": "hello"
        });

        let denied = client
            .post(format!("{}/relay", server.base))
            .json(&body)
            .send()
            .await
            .expect("Should respond");
        assert_eq!(denied.status(), 401);

        let response = client
            .post(format!("{}/relay", server.base))
            .header("X-API-Key", "secret")
            .json(&body)
            .send()
            .await
            .expect("Should respond");
        assert_eq!(response.status(), 200);
        let relayed: RelayResponse = response.json().await.expect("Should decode");
        assert_eq!(relayed.posts.len(), 1);
        assert_eq!(relayed.posts[0].channel_id, ChannelId(10));
        assert_eq!(relayed.posts[0].content, "你好");
    }

    #[tokio::test]
    async fn test_delivery_then_mirror_lookup() {
        let server = spawn_server(None).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/delivered", server.base))
            .json(&serde_json::json!({
                "guild_id": 1,
                "source_channel_id": 20,
                "source_message_id": 500,
                "target_channel_id": 10,
                "mirrored_message_id": 501
            }))
            .send()
            .await
            .expect("Should respond");
        assert_eq!(response.status(), 204);

        let mirrors: MirrorsResponse = client
            .get(format!("{}/mirrors/1/501", server.base))
            .send()
            .await
            .expect("Should respond")
            .json()
            .await
            .expect("Should decode");
        assert_eq!(mirrors.mirrors.get(&ChannelId(20)), Some(&MessageId(500)));
    }

    #[tokio::test]
    async fn test_session_flow_saves_glossary_entry() {
        let server = spawn_server(None).await;
        let client = reqwest::Client::new();

        let started: SessionReply = client
            .post(format!("{}/glossary/sessions", server.base))
            .json(&serde_json::json!({"guild_id": 1, "user_id": 9}))
            .send()
            .await
            .expect("Should respond")
            .json()
            .await
            .expect("Should decode");
        assert_eq!(started.prompt, crate::session::DraftStep::SourceLanguage.prompt());

        let mut last = None;
        for input in ["en", "gg", "zh", "打得好", "mandatory", "yes"] {
            let reply: SessionReply = client
                .post(format!("{}/glossary/sessions/{}", server.base, started.session_id))
                .json(&serde_json::json!({"user_id": 9, "input": input}))
                .send()
                .await
                .expect("Should respond")
                .json()
                .await
                .expect("Should decode");
            last = Some(reply);
        }

        let last = last.expect("Should have a final reply");
        assert!(last.done);
        let entries = server.state.glossary.entries(GuildId(1));
        assert_eq!(entries.len(), 1);
        assert_eq!(Some(&entries[0].id), last.entry_id.as_ref());
        assert_eq!(entries[0].target_text, "打得好");

        // Persisted, so a reload keeps it.
        let reload: ReloadResponse = client
            .post(format!("{}/reload", server.base))
            .send()
            .await
            .expect("Should respond")
            .json()
            .await
            .expect("Should decode");
        assert_eq!(reload.glossary_guilds, 1);
        assert_eq!(server.state.glossary.entries(GuildId(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let server = spawn_server(None).await;
        let response = reqwest::Client::new()
            .delete(format!("{}/glossary/sessions/{}", server.base, Uuid::new_v4()))
            .send()
            .await
            .expect("Should respond");
        assert_eq!(response.status(), 404);
    }
}
