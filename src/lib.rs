//! CryptoFlow News - a crypto and health news portal
//!
//! Articles are ingested from RSS/Atom sources or submitted through a form,
//! stored in SQLite and served as server-rendered pages. Each article page
//! carries an infinite-scroll feed of related stories that never repeats
//! an article within one session.

pub mod config;
pub mod content;
pub mod db;
pub mod feed;
pub mod ingest;
pub mod newsletter;
pub mod repository;
pub mod routes;
pub mod sensor;
pub mod session;
pub mod submission;
