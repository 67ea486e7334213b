//! Protocol module - PTP/IP wire definitions.

pub mod constants;
pub mod cursor;
pub mod device_info;
pub mod frame_buffer;
pub mod packet;
pub mod property;
pub mod response;

pub use constants::*;
pub use cursor::{DecodeError, PtpReader, PtpWrite};
pub use device_info::{DeviceInfo, SdioExtDeviceInfo};
pub use frame_buffer::FrameBuffer;
pub use packet::{
    DataContainer, EventPacket, InitCommandAck, InitCommandRequest, OperationRequest,
    OperationResponse, Packet,
};
pub use property::{DeviceProperty, PropertyForm, PropertyLayout, PropertyValue};
pub use response::ResponseCode;
