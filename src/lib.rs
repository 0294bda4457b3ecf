//! # Recipe Ingest Backend
//!
//! Backend pipeline that turns a recipe video URL into transcribed text:
//! URL validation against a platform whitelist, video download, audio
//! extraction, and remote transcription with caching, cost tracking, and
//! pollable job state over an HTTP API.

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod middleware;
pub mod pipeline;
pub mod state;
pub mod transcription;
