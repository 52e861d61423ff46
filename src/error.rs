//! Error types for Aisle Guide

use thiserror::Error;

/// Result type alias for Aisle Guide operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Aisle Guide
///
/// Collaborator failures (missing model, missing OCR binary, broken audio backend)
/// are turned into sentinel observations before they reach the stabilizer, so these
/// variants only surface at startup or at the edges of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech synthesis or speech worker error
    #[error("speech error: {0}")]
    Speech(String),

    /// OCR engine error
    #[error("ocr error: {0}")]
    Ocr(String),

    /// Banknote classifier error
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Frame source error
    #[error("camera error: {0}")]
    Camera(String),

    /// Input capture error
    #[error("input error: {0}")]
    Input(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
