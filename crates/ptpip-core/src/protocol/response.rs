//! Response code parsing and matching.
//!
//! Every operation ends with a 16-bit response code. 0x2001 is success;
//! anything else is a device or protocol error carried back to the caller.

use std::fmt;

/// Response code returned by the device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(u16);

impl ResponseCode {
    pub const OK: Self = Self(0x2001);
    pub const GENERAL_ERROR: Self = Self(0x2002);
    pub const SESSION_NOT_OPEN: Self = Self(0x2003);
    pub const INVALID_TRANSACTION_ID: Self = Self(0x2004);
    pub const OPERATION_NOT_SUPPORTED: Self = Self(0x2005);
    pub const PARAMETER_NOT_SUPPORTED: Self = Self(0x2006);
    pub const INCOMPLETE_TRANSFER: Self = Self(0x2007);
    pub const DEVICE_PROP_NOT_SUPPORTED: Self = Self(0x200A);
    pub const DEVICE_BUSY: Self = Self(0x2019);
    pub const SESSION_ALREADY_OPEN: Self = Self(0x201E);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Raw value.
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Check for the success code.
    pub const fn is_ok(&self) -> bool {
        self.0 == Self::OK.0
    }

    /// Name of well-known codes.
    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::OK => "OK",
            Self::GENERAL_ERROR => "GeneralError",
            Self::SESSION_NOT_OPEN => "SessionNotOpen",
            Self::INVALID_TRANSACTION_ID => "InvalidTransactionID",
            Self::OPERATION_NOT_SUPPORTED => "OperationNotSupported",
            Self::PARAMETER_NOT_SUPPORTED => "ParameterNotSupported",
            Self::INCOMPLETE_TRANSFER => "IncompleteTransfer",
            Self::DEVICE_PROP_NOT_SUPPORTED => "DevicePropNotSupported",
            Self::DEVICE_BUSY => "DeviceBusy",
            Self::SESSION_ALREADY_OPEN => "SessionAlreadyOpen",
            _ => return None,
        })
    }
}

impl From<u16> for ResponseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Debug for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResponseCode(0x{:04X} '{}')",
            self.0,
            self.name().unwrap_or("?")
        )
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:04X})", name, self.0),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_code() {
        assert!(ResponseCode::new(0x2001).is_ok());
        assert!(!ResponseCode::GENERAL_ERROR.is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(ResponseCode::DEVICE_BUSY.to_string(), "DeviceBusy (0x2019)");
        assert_eq!(ResponseCode::new(0xA001).to_string(), "0xA001");
    }
}
