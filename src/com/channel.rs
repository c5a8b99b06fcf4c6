//! In-process transport over tokio mpsc channels
//!
//! A [`ChannelHub`] plays the role of the name server: each accept/request
//! pair meets at a rendezvous slot keyed by scope, participant names and the
//! two ranks. The first side to arrive creates both channel pairs; each side
//! then takes its own endpoint. Participants run as tokio tasks sharing one hub.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::messages::{ComError, Message};
use super::traits::{Communication, CommunicationFactory};

pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

type Endpoint = (mpsc::Sender<Message>, mpsc::Receiver<Message>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Acceptor,
    Requester,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Acceptor => "acceptor",
            Self::Requester => "requester",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RendezvousKey {
    scope: String,
    acceptor: String,
    requester: String,
    acceptor_rank: usize,
    requester_rank: usize,
}

impl fmt::Display for RendezvousKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{}]<-{}[{}]",
            self.scope, self.acceptor, self.acceptor_rank, self.requester, self.requester_rank
        )
    }
}

struct Rendezvous {
    acceptor: Option<Endpoint>,
    requester: Option<Endpoint>,
}

/// Shared registry of pending connections
#[derive(Clone)]
pub struct ChannelHub {
    slots: Arc<Mutex<HashMap<RendezvousKey, Rendezvous>>>,
    buffer: usize,
}

impl fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHub").field("buffer", &self.buffer).finish()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_BUFFER)
    }
}

impl ChannelHub {
    pub fn new(buffer: usize) -> Self {
        debug!(buffer, "ChannelHub::new: called");
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Creates an unconnected endpoint in `scope`
    pub fn communication(&self, scope: impl Into<String>) -> ChannelCommunication {
        ChannelCommunication {
            hub: self.clone(),
            scope: scope.into(),
            local_rank: 0,
            endpoints: BTreeMap::new(),
        }
    }

    /// Number of half-claimed rendezvous slots
    pub fn pending(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    fn claim(&self, key: RendezvousKey, role: Role) -> Result<Endpoint, ComError> {
        let mut slots = self.slots.lock().map_err(|_| ComError::RegistryPoisoned)?;
        let buffer = self.buffer;
        let slot = slots.entry(key.clone()).or_insert_with(|| {
            let (acceptor_tx, requester_rx) = mpsc::channel(buffer);
            let (requester_tx, acceptor_rx) = mpsc::channel(buffer);
            Rendezvous {
                acceptor: Some((acceptor_tx, acceptor_rx)),
                requester: Some((requester_tx, requester_rx)),
            }
        });

        let endpoint = match role {
            Role::Acceptor => slot.acceptor.take(),
            Role::Requester => slot.requester.take(),
        }
        .ok_or_else(|| ComError::RendezvousTaken {
            key: key.to_string(),
            role: role.as_str(),
        })?;

        if slot.acceptor.is_none() && slot.requester.is_none() {
            slots.remove(&key);
        }
        debug!(%key, role = role.as_str(), "ChannelHub::claim: endpoint taken");
        Ok(endpoint)
    }
}

impl CommunicationFactory for ChannelHub {
    fn new_communication(&self, scope: &str) -> Box<dyn Communication> {
        Box::new(self.communication(scope))
    }
}

/// One rank's endpoints towards a set of remote ranks
pub struct ChannelCommunication {
    hub: ChannelHub,
    scope: String,
    local_rank: usize,
    endpoints: BTreeMap<usize, Endpoint>,
}

impl ChannelCommunication {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn connect(
        &mut self,
        acceptor: &str,
        requester: &str,
        local_rank: usize,
        remote_ranks: &[usize],
        role: Role,
    ) -> Result<(), ComError> {
        if !self.endpoints.is_empty() {
            return Err(ComError::AlreadyConnected);
        }
        let mut endpoints = BTreeMap::new();
        for &remote_rank in remote_ranks {
            let (acceptor_rank, requester_rank) = match role {
                Role::Acceptor => (local_rank, remote_rank),
                Role::Requester => (remote_rank, local_rank),
            };
            let key = RendezvousKey {
                scope: self.scope.clone(),
                acceptor: acceptor.to_string(),
                requester: requester.to_string(),
                acceptor_rank,
                requester_rank,
            };
            endpoints.insert(remote_rank, self.hub.claim(key, role)?);
        }
        self.local_rank = local_rank;
        self.endpoints = endpoints;
        Ok(())
    }
}

#[async_trait]
impl Communication for ChannelCommunication {
    fn is_connected(&self) -> bool {
        !self.endpoints.is_empty()
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn remote_ranks(&self) -> Vec<usize> {
        self.endpoints.keys().copied().collect()
    }

    async fn accept_connection(
        &mut self,
        acceptor: &str,
        requester: &str,
        local_rank: usize,
        remote_ranks: &[usize],
    ) -> Result<(), ComError> {
        debug!(scope = %self.scope, %acceptor, %requester, local_rank, ?remote_ranks, "ChannelCommunication::accept_connection: called");
        self.connect(acceptor, requester, local_rank, remote_ranks, Role::Acceptor)
    }

    async fn request_connection(
        &mut self,
        acceptor: &str,
        requester: &str,
        local_rank: usize,
        remote_ranks: &[usize],
    ) -> Result<(), ComError> {
        debug!(scope = %self.scope, %acceptor, %requester, local_rank, ?remote_ranks, "ChannelCommunication::request_connection: called");
        self.connect(acceptor, requester, local_rank, remote_ranks, Role::Requester)
    }

    async fn close_connection(&mut self) -> Result<(), ComError> {
        if !self.endpoints.is_empty() {
            debug!(scope = %self.scope, ranks = self.endpoints.len(), "ChannelCommunication::close_connection: closing");
            self.endpoints.clear();
        }
        Ok(())
    }

    async fn send(&self, message: Message, remote_rank: usize) -> Result<(), ComError> {
        let (tx, _) = self
            .endpoints
            .get(&remote_rank)
            .ok_or(ComError::NotConnected { remote_rank })?;
        tx.send(message)
            .await
            .map_err(|_| ComError::ChannelClosed { remote_rank })
    }

    async fn receive(&mut self, remote_rank: usize) -> Result<Message, ComError> {
        let (_, rx) = self
            .endpoints
            .get_mut(&remote_rank)
            .ok_or(ComError::NotConnected { remote_rank })?;
        rx.recv().await.ok_or(ComError::ChannelClosed { remote_rank })
    }
}
