//! Wire messages and transport errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single message on a point-to-point channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum Message {
    Bool(bool),
    Double(f64),
    Doubles(Vec<f64>),
    Indices(Vec<usize>),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Double(_) => "double",
            Self::Doubles(_) => "doubles",
            Self::Indices(_) => "indices",
        }
    }
}

/// Errors from the transport layer. All of these are fatal to a coupling run.
#[derive(Debug, Error)]
pub enum ComError {
    #[error("Channel to remote rank {remote_rank} is closed")]
    ChannelClosed { remote_rank: usize },

    #[error("Not connected to remote rank {remote_rank}")]
    NotConnected { remote_rank: usize },

    #[error("Communication is already connected")]
    AlreadyConnected,

    #[error("Rendezvous {key} was already claimed by another {role}")]
    RendezvousTaken { key: String, role: &'static str },

    #[error("Expected {expected} message, received {found}")]
    UnexpectedMessage {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Rendezvous registry is unavailable")]
    RegistryPoisoned,
}
