//! Protocol ids, addresses, interface ids, correlation ids and command numbers.

/// Low nibble of the first packet byte carries the protocol id.
pub const PROTOCOL_MASK: u8 = 0x0f;

/// Link-level handshake protocols.
pub const PID_PING: u8 = 0;
pub const PID_REPLY: u8 = 1;
pub const PID_RESEND: u8 = 2;
pub const PID_CANCEL: u8 = 3;

/// General command packet.
pub const PID_GENERAL: u8 = 4;

/// General command packet whose payload passed an integrity check.
pub const PID_GENERAL_VERIFIED: u8 = 5;

/// The local node.
pub const ADDRESS_LOCAL: u16 = 0;
pub const ADDRESS_BROADCAST: u16 = 0xffff;

/// Interface index of the local device endpoint (the mediator).
pub const NETIF_MEDIATOR: u8 = 0;

/// First interface index available to attached links; the default route.
pub const NETIF_USER_BASE: u8 = 5;

/// Interface byte value meaning "not set".
pub const NETIF_UNSET: u8 = 0x0f;

pub const IDENT_MEDIATOR: u8 = 0;
pub const IDENT_READ: u8 = 4;
pub const IDENT_WRITE: u8 = 5;

/// First correlation id handed out to application requests.
pub const IDENT_USER: u8 = 0x10;

/// Listener filter id matching every sender id.
pub const IDENT_WILDCARD: u8 = 0xff;

pub const CMD_STATUS: u8 = 2;
pub const CMD_TICKER: u8 = 3;
pub const CMD_READ_VAR: u8 = 8;
pub const CMD_WRITE_VAR: u8 = 9;
pub const CMD_ISO_VAR: u8 = 10;
pub const CMD_ISO_MON_VAR: u8 = 11;
pub const CMD_ISO_MSG: u8 = 12;
pub const CMD_LOG: u8 = 13;

/// Commands at or above this value are never handled by the mediator.
pub const CMD_CONTROL_BASE: u8 = 32;

/// Returns true for protocol ids carrying a general command packet.
pub fn is_general(pid: u8) -> bool {
    matches!(pid & PROTOCOL_MASK, PID_GENERAL | PID_GENERAL_VERIFIED)
}

pub fn protocol_name(pid: u8) -> &'static str {
    match pid & PROTOCOL_MASK {
        PID_PING => "PING",
        PID_REPLY => "REPLY",
        PID_RESEND => "RESEND",
        PID_CANCEL => "CANCEL",
        PID_GENERAL => "GENERAL",
        PID_GENERAL_VERIFIED => "GENERAL_VERIFIED",
        _ => "UNKNOWN",
    }
}

pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        CMD_STATUS => "STATUS",
        CMD_TICKER => "TICKER",
        CMD_READ_VAR => "READVAR",
        CMD_WRITE_VAR => "WRITEVAR",
        CMD_ISO_VAR => "ISOVAR",
        CMD_ISO_MON_VAR => "ISOMONVAR",
        CMD_ISO_MSG => "ISOMSG",
        CMD_LOG => "LOG",
        c if c >= CMD_CONTROL_BASE => "CONTROL",
        _ => "RESERVED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_ids_ignore_high_nibble() {
        assert!(is_general(PID_GENERAL));
        assert!(is_general(0x50 | PID_GENERAL_VERIFIED));
        assert!(!is_general(PID_PING));
        assert!(!is_general(0x0e));
    }

    #[test]
    fn names() {
        assert_eq!(protocol_name(PID_GENERAL_VERIFIED), "GENERAL_VERIFIED");
        assert_eq!(command_name(CMD_ISO_MON_VAR), "ISOMONVAR");
        assert_eq!(command_name(40), "CONTROL");
    }
}
