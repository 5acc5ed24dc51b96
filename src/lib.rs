pub mod abbreviation;
pub mod banner;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod glossary;
pub mod ids;
pub mod language;
pub mod matching;
pub mod mirror;
pub mod normalize;
pub mod orchestrator;
pub mod relay;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod services;
pub mod session;
pub mod storage;
