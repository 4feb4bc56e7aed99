use bytes::Bytes;

use crate::buffer::{WireBuffer, DEFAULT_MAX_PACKET, HEADER_SIZE};
use crate::error::{Result, WireError};
use crate::pool::{BufferIndex, BufferPool};
use crate::protocol::{NETIF_UNSET, PID_GENERAL, PID_GENERAL_VERIFIED};

/// Largest payload a command message may carry with the default packet size.
pub const MAX_COMMAND_DATA: usize = DEFAULT_MAX_PACKET - HEADER_SIZE;

/// How an outgoing message finds its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// Post directly to the message's interface (or the default interface).
    #[default]
    Post,
    /// Pick the interface from the receiver address.
    Address,
}

/// Failure recorded on a message that could not be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("no link registered for interface {0}")]
    BadNetIf(u8),

    #[error("payload of {size} bytes does not fit the {max} byte packet data area")]
    TooLarge { size: usize, max: usize },
}

/// Payload of a general command packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct General {
    pub verified: bool,
    pub receiver: u16,
    pub sender: u16,
    /// Correlation id matching a reply to its request.
    pub sender_id: u8,
    pub command: u8,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Link-level handshake: ping, reply, resend, cancel.
    Handshake { protocol: u8, arg: u8 },
    General(General),
}

/// Owned, decoded view of one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: MessageBody,
    pub route: Route,
    /// Interface to post to; `None` picks the dispatcher's default.
    pub post_netif: Option<u8>,
    /// Interface the message arrived on, if it came from a link.
    pub in_netif: Option<u8>,
    pub last_error: Option<MessageError>,
}

impl Message {
    pub fn handshake(protocol: u8, arg: u8) -> Self {
        Self::from_body(MessageBody::Handshake { protocol, arg })
    }

    /// Start building a general command message.
    pub fn command(command: u8) -> CommandBuilder {
        CommandBuilder::new(command)
    }

    fn from_body(body: MessageBody) -> Self {
        Self {
            body,
            route: Route::Post,
            post_netif: None,
            in_netif: None,
            last_error: None,
        }
    }

    pub fn with_post_netif(mut self, netif: u8) -> Self {
        self.post_netif = Some(netif);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    pub fn general(&self) -> Option<&General> {
        match &self.body {
            MessageBody::General(general) => Some(general),
            MessageBody::Handshake { .. } => None,
        }
    }

    /// Correlation id; handshakes never expect a correlated reply.
    pub fn sender_id(&self) -> u8 {
        self.general().map_or(0, |g| g.sender_id)
    }

    pub fn command_id(&self) -> Option<u8> {
        self.general().map(|g| g.command)
    }

    pub fn data(&self) -> &[u8] {
        self.general().map(|g| g.data.as_ref()).unwrap_or(&[])
    }

    /// Decode a received buffer.
    ///
    /// Only general packets are accepted. The data is copied out, so the
    /// caller may release the buffer as soon as this returns.
    pub fn decode(buffer: &WireBuffer) -> Result<Self> {
        let pid = buffer.protocol();
        if pid != PID_GENERAL && pid != PID_GENERAL_VERIFIED {
            return Err(WireError::UnknownProtocol(pid));
        }
        let in_netif = buffer.in_netif();
        let mut message = Self::from_body(MessageBody::General(General {
            verified: pid == PID_GENERAL_VERIFIED,
            receiver: buffer.receiver(),
            sender: buffer.sender(),
            sender_id: buffer.sender_id(),
            command: buffer.command(),
            data: Bytes::copy_from_slice(buffer.data()),
        }));
        message.in_netif = (in_netif != NETIF_UNSET).then_some(in_netif);
        Ok(message)
    }

    /// Build a packet for this message in a buffer taken from `pool`.
    pub fn encode(&self, pool: &BufferPool, out_netif: u8) -> Result<BufferIndex> {
        let index = match &self.body {
            MessageBody::Handshake { protocol, arg } => pool.create_handshake(*protocol, *arg)?,
            MessageBody::General(g) => pool.create_general(
                g.verified,
                g.command,
                g.receiver,
                g.sender,
                g.sender_id,
                &g.data,
            )?,
        };
        if let Ok(mut buffer) = pool.get(index) {
            buffer.set_out_netif(out_netif);
        }
        Ok(index)
    }
}

/// Builder for general command messages.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: u8,
    verified: bool,
    receiver: u16,
    sender: u16,
    sender_id: u8,
    route: Route,
    post_netif: Option<u8>,
    data_offset: usize,
    data: Vec<u8>,
    max_data: usize,
}

impl CommandBuilder {
    fn new(command: u8) -> Self {
        Self {
            command,
            verified: false,
            receiver: 0,
            sender: 0,
            sender_id: 0,
            route: Route::Post,
            post_netif: None,
            data_offset: 0,
            data: Vec::new(),
            max_data: MAX_COMMAND_DATA,
        }
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn receiver(mut self, address: u16) -> Self {
        self.receiver = address;
        self
    }

    pub fn sender(mut self, address: u16) -> Self {
        self.sender = address;
        self
    }

    pub fn sender_id(mut self, id: u8) -> Self {
        self.sender_id = id;
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    pub fn post_to(mut self, netif: u8) -> Self {
        self.post_netif = Some(netif);
        self
    }

    /// Leave `offset` zero bytes ahead of the data for a field the caller
    /// fills in later.
    pub fn data_offset(mut self, offset: usize) -> Self {
        self.data_offset = offset;
        self
    }

    pub fn data(mut self, data: impl AsRef<[u8]>) -> Self {
        self.data = data.as_ref().to_vec();
        self
    }

    /// Limit the payload to a link's negotiated packet size.
    pub fn max_data(mut self, max: usize) -> Self {
        self.max_data = max;
        self
    }

    pub fn build(self) -> Result<Message> {
        let size = self.data_offset + self.data.len();
        if size > self.max_data {
            return Err(WireError::PayloadTooLarge {
                size,
                max: self.max_data,
            });
        }
        let mut data = vec![0u8; self.data_offset];
        data.extend_from_slice(&self.data);
        let mut message = Message::from_body(MessageBody::General(General {
            verified: self.verified,
            receiver: self.receiver,
            sender: self.sender,
            sender_id: self.sender_id,
            command: self.command,
            data: Bytes::from(data),
        }));
        message.route = self.route;
        message.post_netif = self.post_netif;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::protocol::{CMD_READ_VAR, PID_RESEND};

    #[test]
    fn decode_rejects_handshake_protocols() {
        let mut buffer = WireBuffer::new(DEFAULT_MAX_PACKET);
        buffer.write_handshake(PID_RESEND, 1);
        assert!(matches!(
            Message::decode(&buffer),
            Err(WireError::UnknownProtocol(PID_RESEND))
        ));
    }

    #[test]
    fn decode_captures_general_fields() {
        let mut buffer = WireBuffer::new(DEFAULT_MAX_PACKET);
        buffer
            .write_general(true, CMD_READ_VAR, 0x10, 0x20, 7, &[1, 2])
            .expect("data should fit");
        buffer.set_in_netif(6);

        let message = Message::decode(&buffer).expect("general packet should decode");
        let general = message.general().expect("message should be general");
        assert!(general.verified);
        assert_eq!(general.receiver, 0x10);
        assert_eq!(general.sender, 0x20);
        assert_eq!(message.sender_id(), 7);
        assert_eq!(message.data(), &[1, 2]);
        assert_eq!(message.in_netif, Some(6));
    }

    #[test]
    fn builder_applies_offset_and_limit() {
        let message = Message::command(CMD_READ_VAR)
            .sender_id(3)
            .data_offset(4)
            .data([0xaau8])
            .build()
            .expect("small payload should build");
        assert_eq!(message.data(), &[0, 0, 0, 0, 0xaa]);

        let err = Message::command(CMD_READ_VAR)
            .data(vec![0u8; MAX_COMMAND_DATA])
            .data_offset(1)
            .build()
            .expect_err("payload past one packet must be rejected");
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[test]
    fn encode_then_decode_preserves_message() {
        let pool = BufferPool::new(PoolConfig::default().with_slots(2)).expect("pool should build");
        let message = Message::command(CMD_READ_VAR)
            .verified(true)
            .receiver(1)
            .sender(2)
            .sender_id(0x11)
            .data([3u8, 4, 5])
            .build()
            .expect("message should build");

        let index = message.encode(&pool, 5).expect("message should encode");
        let buffer = pool.get(index).expect("buffer should be held");
        assert_eq!(buffer.out_netif(), 5);
        let decoded = Message::decode(&buffer).expect("buffer should decode");
        assert_eq!(decoded.body, message.body);
    }
}
