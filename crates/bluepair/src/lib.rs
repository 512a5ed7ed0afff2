//! bluepair - Bluetooth Low Energy Security Manager pairing engine
//!
//! This library implements the pairing side of the Bluetooth LE Security
//! Manager Protocol: LE legacy and LE Secure Connections pairing in both the
//! initiator and responder roles, the cryptographic toolbox behind them, and
//! the key distribution phase that follows. The engine is transport-agnostic;
//! it talks to the L2CAP fixed channel, the link layer and the application
//! through traits supplied by the embedder.

pub mod error;
pub mod gap;
pub mod smp;

// Re-export common types for convenience
pub use error::CryptoError;
pub use gap::{Address, AddressType, BdAddr};
pub use smp::{
    AuthRequirements, AuthState, IoCapability, KeyDistribution, PairingDelegate,
    PairingFailedReason, PairingOutcome, PairingType, SmConfig, SmpError, SmpManager,
    SmpTransport,
};
