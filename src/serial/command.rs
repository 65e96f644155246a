//! Device command table.
//!
//! One `CommandMeta` per logical operation: the opcode byte, how many
//! argument bytes the request carries, and how many bytes the device sends
//! back. Multi-byte values are unsigned 16-bit little-endian on the wire;
//! power and polarity are single bytes.

/// Opcode byte selecting a device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Version = 0x20,
    SetPower = 0x30,
    GetPower = 0x31,
    Reset = 0x35,
    ArmTrigger = 0x40,
    CancelTrigger = 0x41,
    SetFilter = 0x42,
    GetFilter = 0x43,
    SetExposure = 0x44,
    GetExposure = 0x45,
    SetDelay = 0x46,
    GetDelay = 0x47,
    SetPolarity = 0x48,
    GetPolarity = 0x49,
    Commit = 0x50,
}

/// Static description of one device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMeta {
    pub opcode: Opcode,
    pub request_len: usize,
    pub response_len: usize,
    /// Identifier used in logs and errors.
    pub name: &'static str,
}

const fn meta(opcode: Opcode, request_len: usize, response_len: usize, name: &'static str) -> CommandMeta {
    CommandMeta {
        opcode,
        request_len,
        response_len,
        name,
    }
}

pub const VERSION: CommandMeta = meta(Opcode::Version, 0, 2, "version");
pub const RESET: CommandMeta = meta(Opcode::Reset, 0, 0, "reset");
pub const ARM_TRIGGER: CommandMeta = meta(Opcode::ArmTrigger, 0, 0, "arm-trigger");
pub const CANCEL_TRIGGER: CommandMeta = meta(Opcode::CancelTrigger, 0, 0, "cancel-trigger");
pub const SET_FILTER: CommandMeta = meta(Opcode::SetFilter, 2, 0, "set-filter");
pub const GET_FILTER: CommandMeta = meta(Opcode::GetFilter, 0, 2, "get-filter");
pub const SET_EXPOSURE: CommandMeta = meta(Opcode::SetExposure, 2, 0, "set-exposure");
pub const GET_EXPOSURE: CommandMeta = meta(Opcode::GetExposure, 0, 2, "get-exposure");
pub const SET_DELAY: CommandMeta = meta(Opcode::SetDelay, 2, 0, "set-delay");
pub const GET_DELAY: CommandMeta = meta(Opcode::GetDelay, 0, 2, "get-delay");
pub const SET_POLARITY: CommandMeta = meta(Opcode::SetPolarity, 1, 0, "set-polarity");
pub const GET_POLARITY: CommandMeta = meta(Opcode::GetPolarity, 0, 1, "get-polarity");
pub const COMMIT: CommandMeta = meta(Opcode::Commit, 0, 0, "commit");
pub const SET_POWER: CommandMeta = meta(Opcode::SetPower, 1, 0, "set-power");
pub const GET_POWER: CommandMeta = meta(Opcode::GetPower, 0, 1, "get-power");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(VERSION.opcode as u8, 0x20);
        assert_eq!(SET_POWER.opcode as u8, 0x30);
        assert_eq!(GET_POWER.opcode as u8, 0x31);
        assert_eq!(SET_EXPOSURE.opcode as u8, 0x44);
        assert_eq!(COMMIT.opcode as u8, 0x50);
    }

    #[test]
    fn test_lengths() {
        assert_eq!((VERSION.request_len, VERSION.response_len), (0, 2));
        assert_eq!((SET_FILTER.request_len, SET_FILTER.response_len), (2, 0));
        assert_eq!((GET_POWER.request_len, GET_POWER.response_len), (0, 1));
        assert_eq!((RESET.request_len, RESET.response_len), (0, 0));
        assert_eq!((SET_POLARITY.request_len, SET_POLARITY.response_len), (1, 0));
        assert_eq!((GET_POLARITY.request_len, GET_POLARITY.response_len), (0, 1));
    }
}
