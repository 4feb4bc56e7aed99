use bytes::{Buf, BufMut};

use crate::error::{Result, WireError};
use crate::protocol::{NETIF_UNSET, PID_GENERAL, PID_GENERAL_VERIFIED, PROTOCOL_MASK};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 11;

/// Default link-negotiated maximum packet size.
pub const DEFAULT_MAX_PACKET: usize = 64;

const PROTOCOL: usize = 0;
const LENGTH: usize = 1;
const IN_NETIF: usize = 2;
const OUT_NETIF: usize = 3;
const RECEIVER: usize = 4;
const SENDER: usize = 6;
const SENDER_ID: usize = 8;
const COMMAND: usize = 9;
const DATA_LENGTH: usize = 10;
const DATA: usize = HEADER_SIZE;

/// One packet slot.
///
/// Layout (multi-byte fields little-endian):
/// ```text
/// ┌──────────┬─────┬──────┬───────┬──────────┬────────┬──────────┬─────┬─────────┬────────────┐
/// │ proto(1) │ len │ inIf │ outIf │ recv (2) │ sender │ senderId │ cmd │ dataLen │ data       │
/// │ pid|vfy  │ (1) │ (1)  │ (1)   │          │ (2)    │ (1)      │ (1) │ (1)     │ (dataLen)  │
/// └──────────┴─────┴──────┴───────┴──────────┴────────┴──────────┴─────┴─────────┴────────────┘
/// ```
/// Handshake packets reuse the layout with the handshake argument in the
/// command byte and no data.
#[derive(Clone, PartialEq, Eq)]
pub struct WireBuffer {
    bytes: Box<[u8]>,
}

impl WireBuffer {
    /// A zeroed buffer for packets of up to `max_packet` bytes.
    pub fn new(max_packet: usize) -> Self {
        let mut buffer = Self {
            bytes: vec![0; max_packet.max(HEADER_SIZE)].into_boxed_slice(),
        };
        buffer.clear();
        buffer
    }

    /// Reset the header to an empty packet with unset interfaces.
    pub fn clear(&mut self) {
        self.bytes[..HEADER_SIZE].fill(0);
        self.bytes[IN_NETIF] = NETIF_UNSET;
        self.bytes[OUT_NETIF] = NETIF_UNSET;
        self.bytes[LENGTH] = HEADER_SIZE as u8;
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Largest data length this buffer can hold.
    pub fn max_data(&self) -> usize {
        self.bytes.len() - HEADER_SIZE
    }

    /// Protocol id with the upper nibble masked off.
    pub fn protocol(&self) -> u8 {
        self.bytes[PROTOCOL] & PROTOCOL_MASK
    }

    pub fn set_protocol(&mut self, pid: u8) {
        self.bytes[PROTOCOL] = pid & PROTOCOL_MASK;
    }

    pub fn is_verified(&self) -> bool {
        self.protocol() == PID_GENERAL_VERIFIED
    }

    pub fn packet_len(&self) -> usize {
        usize::from(self.bytes[LENGTH])
    }

    pub fn in_netif(&self) -> u8 {
        self.bytes[IN_NETIF]
    }

    pub fn set_in_netif(&mut self, netif: u8) {
        self.bytes[IN_NETIF] = netif;
    }

    pub fn out_netif(&self) -> u8 {
        self.bytes[OUT_NETIF]
    }

    pub fn set_out_netif(&mut self, netif: u8) {
        self.bytes[OUT_NETIF] = netif;
    }

    pub fn receiver(&self) -> u16 {
        (&self.bytes[RECEIVER..]).get_u16_le()
    }

    pub fn set_receiver(&mut self, address: u16) {
        (&mut self.bytes[RECEIVER..]).put_u16_le(address);
    }

    pub fn sender(&self) -> u16 {
        (&self.bytes[SENDER..]).get_u16_le()
    }

    pub fn set_sender(&mut self, address: u16) {
        (&mut self.bytes[SENDER..]).put_u16_le(address);
    }

    pub fn sender_id(&self) -> u8 {
        self.bytes[SENDER_ID]
    }

    pub fn set_sender_id(&mut self, id: u8) {
        self.bytes[SENDER_ID] = id;
    }

    pub fn command(&self) -> u8 {
        self.bytes[COMMAND]
    }

    pub fn set_command(&mut self, cmd: u8) {
        self.bytes[COMMAND] = cmd;
    }

    pub fn data_len(&self) -> usize {
        usize::from(self.bytes[DATA_LENGTH])
    }

    /// Set the data length and the packet length that follows from it.
    ///
    /// Lengths beyond the buffer are clamped to [`max_data`](Self::max_data).
    pub fn set_data_len(&mut self, len: usize) {
        let len = len.min(self.max_data());
        self.bytes[DATA_LENGTH] = len as u8;
        self.bytes[LENGTH] = (HEADER_SIZE + len) as u8;
    }

    /// The valid data bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes[DATA..DATA + self.data_len()]
    }

    /// The entire data area, including bytes past the current data length.
    pub fn data_area_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[DATA..]
    }

    /// Replace the data bytes.
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_data() {
            return Err(WireError::PayloadTooLarge {
                size: data.len(),
                max: self.max_data(),
            });
        }
        self.bytes[DATA..DATA + data.len()].copy_from_slice(data);
        self.set_data_len(data.len());
        Ok(())
    }

    /// Fill in a complete general packet.
    pub fn write_general(
        &mut self,
        verified: bool,
        command: u8,
        receiver: u16,
        sender: u16,
        sender_id: u8,
        data: &[u8],
    ) -> Result<()> {
        self.set_data(data)?;
        self.set_protocol(if verified { PID_GENERAL_VERIFIED } else { PID_GENERAL });
        self.set_receiver(receiver);
        self.set_sender(sender);
        self.set_sender_id(sender_id);
        self.set_command(command);
        Ok(())
    }

    /// Fill in a handshake packet.
    pub fn write_handshake(&mut self, pid: u8, arg: u8) {
        self.clear();
        self.set_protocol(pid);
        self.set_command(arg);
    }

    /// Turn a request around into a reply: swap sender and receiver, and
    /// send it back out through the interface it arrived on.
    pub fn turn_around(&mut self) {
        let receiver = self.receiver();
        let sender = self.sender();
        self.set_receiver(sender);
        self.set_sender(receiver);
        let in_netif = self.in_netif();
        self.set_out_netif(in_netif);
        self.set_in_netif(NETIF_UNSET);
    }

    /// The packet bytes on the wire.
    pub fn as_packet(&self) -> &[u8] {
        &self.bytes[..self.packet_len().min(self.bytes.len())]
    }

    /// Load a raw packet received from a link.
    pub fn load(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < HEADER_SIZE {
            return Err(WireError::Truncated { len: packet.len() });
        }
        let data_len = usize::from(packet[DATA_LENGTH]);
        if HEADER_SIZE + data_len > packet.len() {
            return Err(WireError::Truncated { len: packet.len() });
        }
        if data_len > self.max_data() {
            return Err(WireError::PayloadTooLarge {
                size: data_len,
                max: self.max_data(),
            });
        }
        let len = HEADER_SIZE + data_len;
        self.bytes[..len].copy_from_slice(&packet[..len]);
        self.set_data_len(data_len);
        Ok(())
    }

    /// Copy the header and valid data from `other`.
    pub fn copy_from(&mut self, other: &WireBuffer) {
        let len = (HEADER_SIZE + other.data_len()).min(self.bytes.len());
        self.bytes[..len].copy_from_slice(&other.bytes[..len]);
        self.set_data_len(len - HEADER_SIZE);
    }
}

impl std::fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBuffer")
            .field("protocol", &self.protocol())
            .field("receiver", &self.receiver())
            .field("sender", &self.sender())
            .field("sender_id", &self.sender_id())
            .field("command", &self.command())
            .field("data", &self.data())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PID_PING;

    #[test]
    fn general_packet_layout() {
        let mut buf = WireBuffer::new(DEFAULT_MAX_PACKET);
        buf.write_general(true, 8, 0x1234, 0xabcd, 7, &[1, 2, 3])
            .expect("data should fit");
        buf.set_in_netif(5);

        assert_eq!(
            buf.as_packet(),
            &[
                PID_GENERAL_VERIFIED,
                14,
                5,
                NETIF_UNSET,
                0x34,
                0x12,
                0xcd,
                0xab,
                7,
                8,
                3,
                1,
                2,
                3
            ]
        );
        assert!(buf.is_verified());
        assert_eq!(buf.receiver(), 0x1234);
        assert_eq!(buf.sender(), 0xabcd);
        assert_eq!(buf.data(), &[1, 2, 3]);
    }

    #[test]
    fn rejects_oversized_data() {
        let mut buf = WireBuffer::new(DEFAULT_MAX_PACKET);
        let data = vec![0u8; DEFAULT_MAX_PACKET - HEADER_SIZE + 1];
        assert!(matches!(
            buf.set_data(&data),
            Err(WireError::PayloadTooLarge { max: 53, .. })
        ));
    }

    #[test]
    fn load_validates_lengths() {
        let mut buf = WireBuffer::new(DEFAULT_MAX_PACKET);
        assert!(matches!(buf.load(&[4, 0, 0]), Err(WireError::Truncated { len: 3 })));

        let mut packet = vec![PID_GENERAL, 13, 1, 0, 0, 0, 0, 0, 9, 3, 2, 0xaa, 0xbb];
        buf.load(&packet).expect("packet should load");
        assert_eq!(buf.data(), &[0xaa, 0xbb]);
        assert_eq!(buf.sender_id(), 9);

        packet[DATA_LENGTH] = 5;
        assert!(buf.load(&packet).is_err());
    }

    #[test]
    fn turn_around_swaps_addresses_and_interfaces() {
        let mut buf = WireBuffer::new(DEFAULT_MAX_PACKET);
        buf.write_general(false, 8, 1, 2, 3, &[]).expect("empty data should fit");
        buf.set_in_netif(6);
        buf.turn_around();
        assert_eq!(buf.receiver(), 2);
        assert_eq!(buf.sender(), 1);
        assert_eq!(buf.out_netif(), 6);
        assert_eq!(buf.in_netif(), NETIF_UNSET);
    }

    #[test]
    fn handshake_uses_command_byte_for_arg() {
        let mut buf = WireBuffer::new(DEFAULT_MAX_PACKET);
        buf.write_handshake(PID_PING, 0x42);
        assert_eq!(buf.protocol(), PID_PING);
        assert_eq!(buf.command(), 0x42);
        assert_eq!(buf.packet_len(), HEADER_SIZE);
    }
}
