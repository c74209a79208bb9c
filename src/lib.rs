//! Collect user-facing strings from rendered pages and translate them into
//! every configured locale with an AI chat-completion endpoint.

pub mod bookkeeping;
pub mod catalog;
pub mod config;
pub mod db;
pub mod jobs;
pub mod ledger;
pub mod locales;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod registry;
pub mod render;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod service;
pub mod translator;
