pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod health;
pub mod http;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod migrations;
pub mod notifications;
pub mod pagination;
pub mod password;
pub mod queue;
pub mod rate_limit;
pub mod realtime;
pub mod server;
pub mod smart_album;
pub mod storage;
pub mod views;
