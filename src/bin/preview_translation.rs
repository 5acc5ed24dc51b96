//! Preview binary - runs one message through the translation pipeline and
//! prints the result, without any chat platform involved.
//!
//! Usage:
//!   cargo run --bin preview -- zh "他包赢的"
//!   cargo run --bin preview -- en "good game" --guild 123
//!
//! The first argument is the language the text is written in. Glossary and
//! dictionary entries are loaded from the configured storage when `--guild`
//! is given.
//!
//! Required environment variables:
//! - OPENAI_API_KEY (or TRANSLATION_BACKEND=deepl with DEEPL_API_KEY)

use anyhow::{bail, Context, Result};
use bridge_translator::config::Config;
use bridge_translator::dictionary::DictionaryStore;
use bridge_translator::glossary::GlossaryStore;
use bridge_translator::ids::GuildId;
use bridge_translator::language::{Direction, Language};
use bridge_translator::orchestrator::{TranslationOrchestrator, TranslationRequest};
use bridge_translator::services;
use bridge_translator::storage::Storage;
use std::sync::Arc;
use tracing::info;

struct PreviewArgs {
    source: Language,
    text: String,
    guild: Option<GuildId>,
}

fn parse_args(args: &[String]) -> Result<PreviewArgs> {
    let mut positional = Vec::new();
    let mut guild = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--guild" {
            let value = iter.next().context("--guild needs a value")?;
            guild = Some(value.parse::<GuildId>().context("Invalid guild id")?);
        } else {
            positional.push(arg.as_str());
        }
    }

    let [language, text] = positional.as_slice() else {
        bail!("Usage: preview <zh|en> <text> [--guild <id>]");
    };
    let source = Language::parse(language).with_context(|| format!("Unknown language '{}'", language))?;
    Ok(PreviewArgs {
        source,
        text: text.to_string(),
        guild,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bridge_translator=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;
    let config = Config::from_env()?;
    let http = reqwest::Client::new();

    let (translator, judge) = services::from_config(&config, http.clone());
    let glossary = Arc::new(GlossaryStore::default());
    let dictionary = DictionaryStore::default();
    if args.guild.is_some() {
        let storage = Storage::from_config(&config, http)?;
        glossary.reload(&storage).await;
        dictionary.reload(&storage).await;
    }

    let guild = args.guild.unwrap_or(GuildId(0));
    let orchestrator = TranslationOrchestrator::new(translator, judge, glossary, config.pipeline.clone());
    let direction = Direction::from_source(args.source);
    info!("Translating {} -> {}", direction.source(), direction.target());

    let request = TranslationRequest::new(args.text.as_str(), direction, guild).with_dictionary(dictionary.terms(guild));
    let translated = orchestrator.translate(&request).await;

    println!("\n{}", "=".repeat(60));
    println!("{}: {}", direction.source(), args.text);
    println!("{}: {}", direction.target(), translated);
    println!("{}", "=".repeat(60));

    Ok(())
}
