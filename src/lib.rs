pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod findex;
pub mod indexes;
pub mod metadata;
pub mod models;
pub mod request_log;
pub mod state;
