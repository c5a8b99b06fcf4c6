//! Error types for the coupling scheme

use thiserror::Error;

use crate::com::ComError;
use crate::m2n::M2nError;
use crate::mesh::DataId;

/// Errors raised by the implicit coupling scheme
#[derive(Debug, Error)]
pub enum CouplingError {
    /// API misuse: wrong call order, missing action acknowledgement, invalid step size
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Invalid scheme configuration: {0}")]
    InvalidConfig(String),

    #[error("Data {0} is registered more than once")]
    DuplicateData(DataId),

    #[error("Data {0} is not known to the scheme")]
    UnknownData(DataId),

    #[error("Communication failed: {0}")]
    M2n(#[from] M2nError),
}

impl From<ComError> for CouplingError {
    fn from(err: ComError) -> Self {
        Self::M2n(M2nError::Com(err))
    }
}

impl CouplingError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the error is a fatal transport failure rather than misuse
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::M2n(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshId;

    #[test]
    fn test_display_messages() {
        let err = CouplingError::protocol("advance called twice");
        assert_eq!(err.to_string(), "Protocol violation: advance called twice");

        let err = CouplingError::DuplicateData(DataId::new(MeshId(1), 2));
        assert_eq!(err.to_string(), "Data mesh1/data2 is registered more than once");
    }

    #[test]
    fn test_com_error_wraps_as_communication() {
        let err: CouplingError = ComError::ChannelClosed { remote_rank: 0 }.into();
        assert!(err.is_communication());
        assert!(!CouplingError::protocol("x").is_communication());
    }
}
