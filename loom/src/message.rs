//! The envelope every service and every network event travels in.
//!
//! Mirrors `netcore/message.h`'s `message` class: a sender/receiver pair, a
//! type tag that distinguishes plain service traffic from network-originated
//! events, an optional header blob carried alongside the payload, and the
//! payload itself as a [`crate::buffer::Buffer`]. `network_logic_error`
//! carries one of the two categories the reference reports
//! (`netcore/components/tcp/network.h`).

use crate::buffer::Buffer;
use crate::id::{ServiceId, SessionId};

/// Implemented by whatever owns service mailboxes (the service pool, in
/// practice) so the I/O worker can hand network events off without knowing
/// anything about service dispatch. Kept as a trait object rather than a
/// concrete type to avoid a dependency cycle between `session`/`io_worker`
/// and `service_pool`.
pub trait MessageSink: Send + Sync {
    fn dispatch(&self, owner: ServiceId, msg: Message);
}

/// Distinguishes plain inter-service traffic from the network lifecycle
/// events the I/O subsystem injects into a service's mailbox. Numeric values
/// are not load-bearing (this is not an on-the-wire tag) but are kept stable
/// for log readability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Unknown = 0,
    System = 1,
    Text = 2,
    Lua = 3,
    Socket = 4,
    Error = 5,
    NetworkConnect = 0x21,
    NetworkRecv = 0x22,
    NetworkClose = 0x23,
    NetworkError = 0x24,
    NetworkLogicError = 0x25,
}

impl MessageType {
    /// Service-originated traffic a [`crate::service::Service`] sent deliberately,
    /// as opposed to a network event the I/O subsystem injected.
    pub fn is_service_message(self) -> bool {
        matches!(
            self,
            MessageType::System | MessageType::Text | MessageType::Lua | MessageType::Socket | MessageType::Error
        )
    }

    pub fn is_network_message(self) -> bool {
        matches!(
            self,
            MessageType::NetworkConnect
                | MessageType::NetworkRecv
                | MessageType::NetworkClose
                | MessageType::NetworkError
                | MessageType::NetworkLogicError
        )
    }
}

/// The two ways a session can go bad mid-stream, reported via a
/// [`MessageType::NetworkLogicError`] message rather than tearing the process
/// down.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkErrorCategory {
    /// An incoming frame declared a length over [`crate::session::MAX_MSG_SIZE`].
    MessageSizeMax,
    /// No bytes observed on the socket within the configured idle timeout.
    SocketReadTimeout,
}

/// A message routed between services, or pushed into a service's mailbox by
/// the I/O subsystem on behalf of one of its sessions.
pub struct Message {
    sender: ServiceId,
    receiver: ServiceId,
    session: Option<SessionId>,
    msg_type: MessageType,
    network_error: Option<NetworkErrorCategory>,
    header: Option<String>,
    payload: Buffer,
    broadcast: bool,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: Buffer) -> Message {
        Message {
            sender: ServiceId::BROADCAST,
            receiver: ServiceId::BROADCAST,
            session: None,
            msg_type,
            network_error: None,
            header: None,
            payload,
            broadcast: false,
        }
    }

    /// Builds one of the network lifecycle events the I/O subsystem injects
    /// into a service's mailbox on behalf of `session`.
    pub fn network_event(msg_type: MessageType, session: SessionId, payload: Buffer) -> Message {
        debug_assert!(msg_type.is_network_message());
        Message {
            sender: ServiceId::BROADCAST,
            receiver: ServiceId::BROADCAST,
            session: Some(session),
            msg_type,
            network_error: None,
            header: None,
            payload,
            broadcast: false,
        }
    }

    /// Builds a [`MessageType::NetworkLogicError`] event for `session`.
    pub fn network_logic_error(session: SessionId, category: NetworkErrorCategory) -> Message {
        Message {
            sender: ServiceId::BROADCAST,
            receiver: ServiceId::BROADCAST,
            session: Some(session),
            msg_type: MessageType::NetworkLogicError,
            network_error: Some(category),
            header: None,
            payload: Buffer::new(),
            broadcast: false,
        }
    }

    #[inline]
    pub fn sender(&self) -> ServiceId {
        self.sender
    }

    #[inline]
    pub fn set_sender(&mut self, id: ServiceId) {
        self.sender = id;
    }

    #[inline]
    pub fn receiver(&self) -> ServiceId {
        self.receiver
    }

    #[inline]
    pub fn set_receiver(&mut self, id: ServiceId) {
        self.receiver = id;
    }

    #[inline]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    #[inline]
    pub fn set_session(&mut self, id: SessionId) {
        self.session = Some(id);
    }

    #[inline]
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    #[inline]
    pub fn set_type(&mut self, msg_type: MessageType) {
        self.msg_type = msg_type;
    }

    #[inline]
    pub fn network_error(&self) -> Option<NetworkErrorCategory> {
        self.network_error
    }

    #[inline]
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    #[inline]
    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = Some(header.into());
    }

    #[inline]
    pub fn payload(&self) -> &Buffer {
        &self.payload
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut Buffer {
        &mut self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Buffer {
        self.payload
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.payload.as_slice()
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    #[inline]
    pub fn set_broadcast(&mut self, v: bool) {
        self.broadcast = v;
    }
}

impl Clone for Message {
    /// Deep-copies the payload buffer, matching `message::operator=`'s value
    /// semantics in the reference - a sent message never aliases the sender's
    /// buffer with the receiver's.
    fn clone(&self) -> Message {
        Message {
            sender: self.sender,
            receiver: self.receiver,
            session: self.session,
            msg_type: self.msg_type,
            network_error: self.network_error,
            header: self.header.clone(),
            payload: self.payload.clone(),
            broadcast: self.broadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_vs_network_classification() {
        assert!(MessageType::Text.is_service_message());
        assert!(!MessageType::Text.is_network_message());
        assert!(MessageType::NetworkRecv.is_network_message());
        assert!(!MessageType::NetworkRecv.is_service_message());
    }

    #[test]
    fn test_clone_deep_copies_payload() {
        let mut msg = Message::new(MessageType::Text, Buffer::from_slice(b"hello", 0));
        let clone = msg.clone();
        msg.payload_mut().clear();
        msg.payload_mut().write_back(b"changed");
        assert_eq!(clone.bytes(), b"hello");
    }

    #[test]
    fn test_network_logic_error_carries_category() {
        let msg = Message::network_logic_error(SessionId::new(0, 4), NetworkErrorCategory::MessageSizeMax);
        assert_eq!(msg.msg_type(), MessageType::NetworkLogicError);
        assert_eq!(msg.network_error(), Some(NetworkErrorCategory::MessageSizeMax));
        assert_eq!(msg.session(), Some(SessionId::new(0, 4)));
    }
}
