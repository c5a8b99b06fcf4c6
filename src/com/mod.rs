//! Point-to-point communication primitives
//!
//! [`Communication`] is the transport seam used by the M2N bridge. The crate
//! ships one transport, [`ChannelCommunication`], which connects participants
//! running as tasks in the same process.

mod channel;
mod messages;
mod traits;

pub use channel::{ChannelCommunication, ChannelHub, DEFAULT_CHANNEL_BUFFER};
pub use messages::{ComError, Message};
pub use traits::{Communication, CommunicationFactory};
