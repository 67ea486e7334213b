//! Protocol constants for PTP/IP with the vendor SDIO extension.
//!
//! Standard codes follow ISO 15740 (PTP) and CIPA DC-005 (PTP/IP). Vendor
//! codes were captured from camera traffic and have no public description.

pub type OperationCode = u16;
pub type EventCode = u16;
pub type PropertyCode = u16;
pub type TransactionId = u32;
pub type ObjectHandle = u32;

// ============================================================================
// Connection
// ============================================================================

/// Default PTP/IP TCP port.
pub const PTPIP_PORT: u16 = 15740;

/// PTP/IP protocol version advertised in the init command request (1.0).
pub const PTPIP_VERSION: u32 = 0x0001_0000;

/// Size of the length + type header that starts every packet.
pub const HEADER_SIZE: usize = 8;

/// Upper bound on a single packet, guards against a corrupt length prefix.
pub const MAX_PACKET_SIZE: u32 = 64 * 1024 * 1024;

/// Maximum number of u32 arguments on an operation request or response.
pub const MAX_OPERATION_ARGS: usize = 5;

/// Maximum number of u32 parameters on an event packet.
pub const MAX_EVENT_PARAMS: usize = 3;

// ============================================================================
// Packet types
// ============================================================================

pub const PACKET_INIT_COMMAND_REQUEST: u32 = 0x01;
pub const PACKET_INIT_COMMAND_ACK: u32 = 0x02;
pub const PACKET_INIT_EVENT_REQUEST: u32 = 0x03;
pub const PACKET_INIT_EVENT_ACK: u32 = 0x04;
pub const PACKET_INIT_FAIL: u32 = 0x05;
pub const PACKET_OPERATION_REQUEST: u32 = 0x06;
pub const PACKET_OPERATION_RESPONSE: u32 = 0x07;
pub const PACKET_EVENT: u32 = 0x08;
pub const PACKET_START_DATA: u32 = 0x09;
pub const PACKET_DATA: u32 = 0x0A;
pub const PACKET_CANCEL: u32 = 0x0B;
pub const PACKET_END_DATA: u32 = 0x0C;
pub const PACKET_PROBE_REQUEST: u32 = 0x0D;
pub const PACKET_PROBE_RESPONSE: u32 = 0x0E;

/// Data phase flags carried on operation requests.
pub mod data_phase {
    /// No data, or data flows from device to host.
    pub const NONE_OR_IN: u32 = 0x01;
    /// Data flows from host to device.
    pub const OUT: u32 = 0x02;
}

// ============================================================================
// Operation codes (Host -> Device)
// ============================================================================

pub const OP_GET_DEVICE_INFO: OperationCode = 0x1001;
pub const OP_OPEN_SESSION: OperationCode = 0x1002;
pub const OP_CLOSE_SESSION: OperationCode = 0x1003;
pub const OP_GET_OBJECT_INFO: OperationCode = 0x1008;
pub const OP_GET_OBJECT: OperationCode = 0x1009;
pub const OP_GET_DEVICE_PROP_DESC: OperationCode = 0x1014;
pub const OP_GET_DEVICE_PROP_VALUE: OperationCode = 0x1015;
pub const OP_SET_DEVICE_PROP_VALUE: OperationCode = 0x1016;

/// Vendor extension connect, sent three times during the handshake.
pub const OP_SDIO_CONNECT: OperationCode = 0x9201;
/// Vendor extension device info (extra operations, events, properties).
pub const OP_SDIO_GET_EXT_DEVICE_INFO: OperationCode = 0x9202;
/// Vendor single property descriptor fetch.
pub const OP_SDIO_GET_EXT_DEVICE_PROP_INFO: OperationCode = 0x9203;
/// Vendor property write.
pub const OP_SDIO_SET_EXT_DEVICE_PROP_VALUE: OperationCode = 0x9205;
/// Vendor control write (shutter, zoom, ...).
pub const OP_SDIO_CONTROL_DEVICE: OperationCode = 0x9207;
/// Vendor batch fetch of every property descriptor.
pub const OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO: OperationCode = 0x9209;

// ============================================================================
// Handshake magic
// ============================================================================

/// Session id sent with OpenSession.
pub const SESSION_ID: u32 = 0x0000_0001;
/// Transaction id of OpenSession; it precedes the counter.
pub const OPEN_SESSION_TRANSACTION_ID: TransactionId = 0;
/// First value drawn from the transaction counter.
pub const INITIAL_TRANSACTION_ID: TransactionId = 1;

/// SDIO_Connect phase arguments, in handshake order.
pub const SDIO_CONNECT_PHASE_1: u32 = 0x0001;
pub const SDIO_CONNECT_PHASE_2: u32 = 0x0002;
pub const SDIO_CONNECT_PHASE_3: u32 = 0x0003;

/// Argument sent with SDIO_GetExtDeviceInfo.
pub const SDIO_EXT_DEVICE_INFO_ARG: u32 = 0x0000_012C;

/// Value the transaction counter is forced to after the extension info fetch.
pub const SDIO_TRANSACTION_RESET: TransactionId = 1;

// ============================================================================
// Event codes (Device -> Host)
// ============================================================================

pub const EVENT_OBJECT_ADDED: EventCode = 0x4002;
pub const EVENT_OBJECT_REMOVED: EventCode = 0x4003;
pub const EVENT_DEVICE_PROP_CHANGED: EventCode = 0x4006;

pub const EVENT_SDIO_OBJECT_ADDED: EventCode = 0xC201;
pub const EVENT_SDIO_OBJECT_REMOVED: EventCode = 0xC202;
pub const EVENT_SDIO_PROPERTY_CHANGED: EventCode = 0xC203;

// ============================================================================
// Data types (property descriptors)
// ============================================================================

pub const DATATYPE_UNDEFINED: u16 = 0x0000;
pub const DATATYPE_INT8: u16 = 0x0001;
pub const DATATYPE_UINT8: u16 = 0x0002;
pub const DATATYPE_INT16: u16 = 0x0003;
pub const DATATYPE_UINT16: u16 = 0x0004;
pub const DATATYPE_INT32: u16 = 0x0005;
pub const DATATYPE_UINT32: u16 = 0x0006;
pub const DATATYPE_INT64: u16 = 0x0007;
pub const DATATYPE_UINT64: u16 = 0x0008;
pub const DATATYPE_INT128: u16 = 0x0009;
pub const DATATYPE_UINT128: u16 = 0x000A;
/// Array types are the scalar type with this bit set.
pub const DATATYPE_ARRAY_FLAG: u16 = 0x4000;
pub const DATATYPE_STRING: u16 = 0xFFFF;

/// Property form flags.
pub const FORM_NONE: u8 = 0x00;
pub const FORM_RANGE: u8 = 0x01;
pub const FORM_ENUMERATION: u8 = 0x02;

/// Get/Set byte of a property descriptor.
pub const PROPERTY_GET: u8 = 0x00;
pub const PROPERTY_GET_SET: u8 = 0x01;

/// Human readable operation name for logs.
pub fn operation_name(code: OperationCode) -> &'static str {
    match code {
        OP_GET_DEVICE_INFO => "GetDeviceInfo",
        OP_OPEN_SESSION => "OpenSession",
        OP_CLOSE_SESSION => "CloseSession",
        OP_GET_OBJECT_INFO => "GetObjectInfo",
        OP_GET_OBJECT => "GetObject",
        OP_GET_DEVICE_PROP_DESC => "GetDevicePropDesc",
        OP_GET_DEVICE_PROP_VALUE => "GetDevicePropValue",
        OP_SET_DEVICE_PROP_VALUE => "SetDevicePropValue",
        OP_SDIO_CONNECT => "SDIO_Connect",
        OP_SDIO_GET_EXT_DEVICE_INFO => "SDIO_GetExtDeviceInfo",
        OP_SDIO_GET_EXT_DEVICE_PROP_INFO => "SDIO_GetExtDevicePropInfo",
        OP_SDIO_SET_EXT_DEVICE_PROP_VALUE => "SDIO_SetExtDevicePropValue",
        OP_SDIO_CONTROL_DEVICE => "SDIO_ControlDevice",
        OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO => "SDIO_GetAllExtDevicePropInfo",
        _ => "Unknown",
    }
}

/// Kind of code, by the range it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Operation,
    Response,
    Event,
    Property,
    Other,
}

/// Classify a 16-bit code by its high nibble.
///
/// Standard codes live in 0x1xxx-0x5xxx; vendor codes set the top bit.
pub fn code_kind(code: u16) -> CodeKind {
    match code & 0x7000 {
        0x1000 => CodeKind::Operation,
        0x2000 => CodeKind::Response,
        0x4000 => CodeKind::Event,
        0x5000 => CodeKind::Property,
        _ => CodeKind::Other,
    }
}
