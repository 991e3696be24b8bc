pub mod audio;
pub mod config;
pub mod power;
pub mod recorder;
pub mod state;
pub mod storage;
pub mod uplink;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FastrecError {
    #[error("Audio source error: {0}")]
    AudioSourceError(String),

    #[error("Storage write error: {0}")]
    StorageWriteError(String),

    #[error("Insufficient free space: {required} bytes required, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Critical battery: {0:.2} V")]
    CriticalBattery(f32),

    #[error("Retention error: {0}")]
    RetentionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for FastrecError {
    fn from(e: std::io::Error) -> Self {
        FastrecError::StorageWriteError(e.to_string())
    }
}

impl FastrecError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors cost at most the current recording or transfer;
    /// non-recoverable errors require a restart or user intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // The sampling peripheral failing usually needs a power cycle
            FastrecError::AudioSourceError(_) => false,
            // Fatal to the current recording only
            FastrecError::StorageWriteError(_) => true,
            // Recording never starts; nothing is lost
            FastrecError::InsufficientSpace { .. } => true,
            // Retried with backoff, recording retained locally
            FastrecError::TransferError(_) => true,
            // Forces deep sleep after best-effort finalize
            FastrecError::CriticalBattery(_) => true,
            // Retained memory is best-effort; boot proceeds with defaults
            FastrecError::RetentionError(_) => true,
            // Config errors require user intervention
            FastrecError::ConfigError(_) => false,
            // Channel errors indicate internal issues
            FastrecError::ChannelError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FastrecError>;
