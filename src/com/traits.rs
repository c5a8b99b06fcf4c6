//! Communication trait definitions

use async_trait::async_trait;

use super::messages::{ComError, Message};

/// Point-to-point channel between one local rank and a set of remote ranks
///
/// Sends and receives suspend until the peer is ready and never time out.
/// Exactly one side of a connection accepts and the other requests; both
/// sides must name the same acceptor and requester.
#[async_trait]
pub trait Communication: Send + Sync {
    fn is_connected(&self) -> bool;

    fn local_rank(&self) -> usize;

    /// Remote ranks this endpoint has channels to, ascending
    fn remote_ranks(&self) -> Vec<usize>;

    async fn accept_connection(
        &mut self,
        acceptor: &str,
        requester: &str,
        local_rank: usize,
        remote_ranks: &[usize],
    ) -> Result<(), ComError>;

    async fn request_connection(
        &mut self,
        acceptor: &str,
        requester: &str,
        local_rank: usize,
        remote_ranks: &[usize],
    ) -> Result<(), ComError>;

    /// Releases all channels. Calling it on a closed endpoint is a no-op.
    async fn close_connection(&mut self) -> Result<(), ComError>;

    async fn send(&self, message: Message, remote_rank: usize) -> Result<(), ComError>;

    async fn receive(&mut self, remote_rank: usize) -> Result<Message, ComError>;

    async fn send_bool(&self, value: bool, remote_rank: usize) -> Result<(), ComError> {
        self.send(Message::Bool(value), remote_rank).await
    }

    async fn send_double(&self, value: f64, remote_rank: usize) -> Result<(), ComError> {
        self.send(Message::Double(value), remote_rank).await
    }

    async fn send_doubles(&self, values: &[f64], remote_rank: usize) -> Result<(), ComError> {
        self.send(Message::Doubles(values.to_vec()), remote_rank).await
    }

    async fn send_indices(&self, indices: &[usize], remote_rank: usize) -> Result<(), ComError> {
        self.send(Message::Indices(indices.to_vec()), remote_rank).await
    }

    async fn receive_bool(&mut self, remote_rank: usize) -> Result<bool, ComError> {
        match self.receive(remote_rank).await? {
            Message::Bool(value) => Ok(value),
            other => Err(unexpected("bool", &other)),
        }
    }

    async fn receive_double(&mut self, remote_rank: usize) -> Result<f64, ComError> {
        match self.receive(remote_rank).await? {
            Message::Double(value) => Ok(value),
            other => Err(unexpected("double", &other)),
        }
    }

    async fn receive_doubles(&mut self, remote_rank: usize) -> Result<Vec<f64>, ComError> {
        match self.receive(remote_rank).await? {
            Message::Doubles(values) => Ok(values),
            other => Err(unexpected("doubles", &other)),
        }
    }

    async fn receive_indices(&mut self, remote_rank: usize) -> Result<Vec<usize>, ComError> {
        match self.receive(remote_rank).await? {
            Message::Indices(indices) => Ok(indices),
            other => Err(unexpected("indices", &other)),
        }
    }
}

/// Creates unconnected communications for a named scope
pub trait CommunicationFactory: Send + Sync {
    fn new_communication(&self, scope: &str) -> Box<dyn Communication>;
}

fn unexpected(expected: &'static str, found: &Message) -> ComError {
    ComError::UnexpectedMessage {
        expected,
        found: found.kind(),
    }
}
