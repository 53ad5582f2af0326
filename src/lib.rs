//! # stem-splitter-web
//!
//! A small web front-end around stem separation: upload an mp3 or wav file and get
//! vocals, drums, bass and other written to disk by a pretrained HTDemucs model.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod types;
pub mod web;

pub use crate::{
    config::{AppConfig, SecretKey},
    core::audio::{encode_audio, load_audio, write_audio},
    error::{Result, StemError},
    io::progress::set_download_progress_callback,
    model::{
        demucs::DemucsModel,
        gateway::ModelGateway,
        model_manager::{ensure_model, ensure_model_in, ModelHandle},
        DummyModel, SeparationModel,
    },
    pipeline::{process, ProcessOptions, SavedStem, TrackOutcome, TrackReport},
    types::{ClipMode, Device, OutputFormat, SeparationConfig, Stem, Waveform},
    web::{build_router, serve, start_server, AppState},
};
