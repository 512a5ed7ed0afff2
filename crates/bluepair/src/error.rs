//! Error types for the bluepair library
//!
//! This module defines the errors raised below the pairing state machine:
//! the cryptographic toolbox and the elliptic-curve engine.

use thiserror::Error;

/// Errors that can occur in the cryptographic toolbox or the ECC engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid input length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Public key is not a valid P-256 point")]
    InvalidPublicKey,

    #[error("Debug public key rejected")]
    DebugKeyRejected,

    #[error("Key pair generation failed")]
    KeyGeneration,

    #[error("ECC engine failure: {0}")]
    EngineFailure(String),
}
