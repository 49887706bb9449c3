pub mod app_url;
pub mod backtest_api_client;
pub mod chat_router;
pub mod code_generator;
pub mod commands;
pub mod config;
pub mod config_store;
pub mod context;
pub mod database;
pub mod error;
pub mod llm_client;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod param_utils;
pub mod projector;
pub mod retry;
pub mod storage;
