//! HTTP handlers for the ingest API.

pub mod download;
pub mod transcribe;

use actix_web::web;

/// Route table for everything under `/api`. Literal paths are registered
/// before the `{id}` captures so `costs/stats` never parses as a job id.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/download", web::post().to(download::start_download))
            .route("/download/{id}", web::get().to(download::get_download))
            .route("/download/{id}", web::delete().to(download::cancel_download))
            .route("/transcribe", web::post().to(transcribe::start_transcription))
            .route("/transcribe/costs/stats", web::get().to(transcribe::cost_stats))
            .route("/transcribe/costs/log", web::get().to(transcribe::cost_log))
            .route("/transcribe/cache/stats", web::get().to(transcribe::cache_stats))
            .route("/transcribe/{id}", web::get().to(transcribe::get_transcription))
            .route(
                "/transcribe/{id}",
                web::delete().to(transcribe::cancel_transcription),
            ),
    );
}
