//! Integration tests for the bridge translator
//!
//! These tests drive the public library API across modules: the pipeline
//! against a mocked OpenAI endpoint, glossary state loaded from storage, and
//! relay plus mirror graph persistence.

use std::sync::Arc;

use tempfile::TempDir;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

use bridge_translator::config::PipelineSettings;
use bridge_translator::dictionary::{DictionaryBook, DictionaryStore};
use bridge_translator::glossary::{GlossaryBook, GlossaryEntry, GlossaryStore, ReplacementMode};
use bridge_translator::ids::{ChannelId, GuildId, MessageId};
use bridge_translator::language::{Direction, Language};
use bridge_translator::mirror::MirrorGraph;
use bridge_translator::orchestrator::{TranslationOrchestrator, TranslationRequest, UNTRANSLATABLE};
use bridge_translator::relay::{BannerSettings, BridgeConfig, GuildBridge, InboundMessage, NoFetch, Relay};
use bridge_translator::services::{OpenAiClient, StubJudge, StubTranslator};
use bridge_translator::storage::Storage;

const GUILD: GuildId = GuildId(1);
const ZH: ChannelId = ChannelId(10);
const EN: ChannelId = ChannelId(20);

// ==================== Test Helpers ====================

fn openai_response(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

fn openai_client(server: &MockServer) -> Arc<OpenAiClient> {
    Arc::new(OpenAiClient::new(
        reqwest::Client::new(),
        format!("{}/v1/chat/completions", server.uri()),
        "test-openai-key",
        "gpt-4o-mini",
        "gpt-5-mini",
        std::time::Duration::from_secs(5),
    ))
}

fn orchestrator_with(translator: StubTranslator, glossary: Arc<GlossaryStore>) -> TranslationOrchestrator {
    TranslationOrchestrator::new(
        Arc::new(translator),
        Arc::new(StubJudge::unavailable()),
        glossary,
        PipelineSettings::default(),
    )
}

fn jungle_entry() -> GlossaryEntry {
    GlossaryEntry {
        id: "jungle".to_string(),
        source_language: Language::Chinese,
        source_text: "打野".to_string(),
        target_language: Language::English,
        target_text: "jungler".to_string(),
        replacement_mode: ReplacementMode::Mandatory,
    }
}

fn bridge_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.guilds.insert(
        GUILD,
        GuildBridge {
            zh_channel_id: ZH,
            en_channel_id: EN,
            passthrough: Default::default(),
        },
    );
    config
}

fn message(channel: ChannelId, id: u64, content: &str) -> InboundMessage {
    InboundMessage {
        guild_id: GUILD,
        channel_id: channel,
        message_id: MessageId(id),
        author_id: None,
        author_name: "carol".to_string(),
        author_avatar_url: Some("https://cdn.example.com/a.png".to_string()),
        content: content.to_string(),
        attachments: vec![],
        reply_to: None,
        recent_history: vec![],
        previous_message: None,
    }
}

// ==================== OpenAI Pipeline Tests ====================

#[tokio::test]
async fn test_pipeline_against_mock_openai_restores_emoji() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("<text>你好"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_response("Hello ⟦E0⟧")))
        .expect(1)
        .mount(&server)
        .await;

    let client = openai_client(&server);
    let orchestrator = TranslationOrchestrator::new(
        client.clone(),
        client,
        Arc::new(GlossaryStore::default()),
        PipelineSettings::default(),
    );

    let request = TranslationRequest::new("你好 😀", Direction::ZhToEn, GUILD);
    assert_eq!(orchestrator.translate(&request).await, "Hello 😀");
}

#[tokio::test]
async fn test_pipeline_degrades_when_openai_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = openai_client(&server);
    let orchestrator = TranslationOrchestrator::new(
        client.clone(),
        client,
        Arc::new(GlossaryStore::default()),
        PipelineSettings::default(),
    );

    let request = TranslationRequest::new("good game", Direction::EnToZh, GUILD);
    assert_eq!(orchestrator.translate(&request).await, UNTRANSLATABLE);
}

// ==================== Glossary Tests ====================

#[tokio::test]
async fn test_cross_language_glossary_survives_translation() {
    let glossary = Arc::new(GlossaryStore::default());
    glossary.upsert(GUILD, jungle_entry());

    let translator = StubTranslator::new(|text, _, _| Ok(text.replace("我是", "I am the ")));
    let orchestrator = orchestrator_with(translator, glossary);

    let request = TranslationRequest::new("我是打野", Direction::ZhToEn, GUILD);
    assert_eq!(orchestrator.translate(&request).await, "I am the jungler");

    // Other guilds do not see the entry.
    let request = TranslationRequest::new("我是打野", Direction::ZhToEn, GuildId(2));
    assert_eq!(orchestrator.translate(&request).await, "I am the 打野");
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_placeholders() {
    let glossary = Arc::new(GlossaryStore::default());
    glossary.upsert(GUILD, jungle_entry());
    let mut mid = jungle_entry();
    mid.id = "mid".to_string();
    mid.source_text = "中单".to_string();
    mid.target_text = "mid laner".to_string();
    glossary.upsert(GUILD, mid);

    let translator = StubTranslator::new(|text, _, _| Ok(text.replace("我是", "I am the ")));
    let orchestrator = Arc::new(orchestrator_with(translator, glossary));

    let tasks: Vec<_> = ["我是打野", "我是中单"]
        .into_iter()
        .map(|text| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let request = TranslationRequest::new(text, Direction::ZhToEn, GUILD);
                orchestrator.translate(&request).await
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.expect("Task should finish"));
    }
    assert_eq!(results, vec!["I am the jungler", "I am the mid laner"]);
}

#[tokio::test]
async fn test_glossary_and_dictionary_loaded_from_storage() {
    let dir = TempDir::new().expect("Should create temp dir");
    let storage = Storage::file(dir.path());

    let mut book = GlossaryBook::new();
    book.insert(GUILD, jungle_entry());
    GlossaryStore::new(book).persist(&storage).await;
    let mut terms = DictionaryBook::default();
    terms.insert(GUILD, "上单", "top");
    DictionaryStore::new(terms).persist(&storage).await;

    let glossary = Arc::new(GlossaryStore::default());
    glossary.reload(&storage).await;
    let dictionary = DictionaryStore::default();
    dictionary.reload(&storage).await;

    let translator = StubTranslator::new(|text, _, _| Ok(text.replace("我是", "I am the ").replace("和", " and ")));
    let orchestrator = orchestrator_with(translator, glossary);
    let request =
        TranslationRequest::new("我是打野和上单", Direction::ZhToEn, GUILD).with_dictionary(dictionary.terms(GUILD));

    assert_eq!(orchestrator.translate(&request).await, "I am the jungler and top");
}

// ==================== Certainty Idiom Tests ====================

#[tokio::test]
async fn test_certainty_idiom_without_judge() {
    let translator = StubTranslator::from_pairs(&[("他包赢的", "He is sure to win"), ("他赢", "He wins.")]);
    let orchestrator = orchestrator_with(translator, Arc::new(GlossaryStore::default()));

    let request = TranslationRequest::new("他包赢的", Direction::ZhToEn, GUILD);
    assert_eq!(orchestrator.translate(&request).await, "He is sure to win");
}

#[tokio::test]
async fn test_certainty_idiom_confirmed_by_mock_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Chinese text: 他包赢的"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_response("FOR_SURE")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("<text>他赢"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_response("He wins.")))
        .expect(1)
        .mount(&server)
        .await;

    let client = openai_client(&server);
    let orchestrator = TranslationOrchestrator::new(
        client.clone(),
        client,
        Arc::new(GlossaryStore::default()),
        PipelineSettings::default(),
    );

    let request = TranslationRequest::new("他包赢的", Direction::ZhToEn, GUILD);
    assert_eq!(orchestrator.translate(&request).await, "He wins for sure");
}

// ==================== Relay and Mirror Tests ====================

#[tokio::test]
async fn test_relay_threads_replies_across_restart() {
    let dir = TempDir::new().expect("Should create temp dir");
    let graph_path = dir.path().join("mirror.json");

    let relay = Relay::new(
        Arc::new(bridge_config()),
        Arc::new(orchestrator_with(
            StubTranslator::from_pairs(&[("ready?", "准备好了吗？")]),
            Arc::new(GlossaryStore::default()),
        )),
        Arc::new(DictionaryStore::default()),
        Arc::new(MirrorGraph::load(&graph_path, 100).await),
        Arc::new(NoFetch),
        BannerSettings::default(),
    );

    let posts = relay.process(&message(EN, 1000, "ready?")).await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].channel_id, ZH);
    assert_eq!(posts[0].content, "准备好了吗？");
    assert_eq!(posts[0].avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));

    relay.record_delivery(GUILD, EN, MessageId(1000), ZH, MessageId(1001)).await;

    // A new process sees the same mirror pairs.
    let reloaded = MirrorGraph::load(&graph_path, 100).await;
    assert_eq!(reloaded.find_mirror(GUILD, MessageId(1000), ZH).await, Some(MessageId(1001)));
    assert_eq!(reloaded.find_mirror(GUILD, MessageId(1001), EN).await, Some(MessageId(1000)));
}

#[tokio::test]
async fn test_relay_pass_through_skips_translation() {
    let translator = Arc::new(StubTranslator::echo());
    let relay = Relay::new(
        Arc::new(bridge_config()),
        Arc::new(TranslationOrchestrator::new(
            translator.clone(),
            Arc::new(StubJudge::unavailable()),
            Arc::new(GlossaryStore::default()),
            PipelineSettings::default(),
        )),
        Arc::new(DictionaryStore::default()),
        Arc::new(MirrorGraph::new(None, 0)),
        Arc::new(NoFetch),
        BannerSettings::default(),
    );

    for text in ["hmm", "https://example.com/clip", "???"] {
        let posts = relay.process(&message(ZH, 1, text)).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].channel_id, EN);
        assert_eq!(posts[0].content.trim_matches(|c| c == '<' || c == '>'), text);
    }
    assert!(translator.calls().is_empty());
}
