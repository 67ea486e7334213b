//! DeviceInfo and the vendor SDIO extension overlay.

use std::collections::BTreeSet;

use super::constants::*;
use super::cursor::{DecodeError, PtpReader, PtpWrite};

/// Standard PTP DeviceInfo data set.
///
/// Built once per connection from GetDeviceInfo; the vendor extension info
/// only ever adds to the supported sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub supported_operations: BTreeSet<OperationCode>,
    pub supported_events: BTreeSet<EventCode>,
    pub supported_properties: BTreeSet<PropertyCode>,
    /// Vendor control codes (write-only actions such as shutter release).
    pub supported_controls: BTreeSet<PropertyCode>,
    pub capture_formats: Vec<u16>,
    pub image_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = PtpReader::new(data);
        Ok(Self {
            standard_version: r.u16()?,
            vendor_extension_id: r.u32()?,
            vendor_extension_version: r.u16()?,
            vendor_extension_desc: r.string()?,
            functional_mode: r.u16()?,
            supported_operations: r.u16_array()?.into_iter().collect(),
            supported_events: r.u16_array()?.into_iter().collect(),
            supported_properties: r.u16_array()?.into_iter().collect(),
            supported_controls: BTreeSet::new(),
            capture_formats: r.u16_array()?,
            image_formats: r.u16_array()?,
            manufacturer: r.string()?,
            model: r.string()?,
            device_version: r.string()?,
            serial_number: r.string()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.standard_version);
        buf.put_u32(self.vendor_extension_id);
        buf.put_u16(self.vendor_extension_version);
        buf.put_string(&self.vendor_extension_desc);
        buf.put_u16(self.functional_mode);
        buf.put_u16_array(&self.supported_operations.iter().copied().collect::<Vec<_>>());
        buf.put_u16_array(&self.supported_events.iter().copied().collect::<Vec<_>>());
        buf.put_u16_array(&self.supported_properties.iter().copied().collect::<Vec<_>>());
        buf.put_u16_array(&self.capture_formats);
        buf.put_u16_array(&self.image_formats);
        buf.put_string(&self.manufacturer);
        buf.put_string(&self.model);
        buf.put_string(&self.device_version);
        buf.put_string(&self.serial_number);
        buf
    }

    pub fn supports_operation(&self, code: OperationCode) -> bool {
        self.supported_operations.contains(&code)
    }

    pub fn supports_event(&self, code: EventCode) -> bool {
        self.supported_events.contains(&code)
    }

    /// Whether the vendor extension handshake should run.
    pub fn supports_sdio(&self) -> bool {
        self.supports_operation(OP_SDIO_CONNECT)
    }

    /// Fold the vendor overlay in. Never removes a code.
    pub fn merge(&mut self, ext: &SdioExtDeviceInfo) {
        self.supported_operations.extend(ext.operations.iter().copied());
        self.supported_events.extend(ext.events.iter().copied());
        self.supported_properties.extend(ext.properties.iter().copied());
        self.supported_controls.extend(ext.controls.iter().copied());
    }
}

/// Vendor SDIO extension device info.
///
/// Wire form: `version u16 | codes AUINT16 | [controls AUINT16]`. The code
/// list mixes operations, events and properties; they are split by range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdioExtDeviceInfo {
    pub version: u16,
    pub operations: BTreeSet<OperationCode>,
    pub events: BTreeSet<EventCode>,
    pub properties: BTreeSet<PropertyCode>,
    pub controls: BTreeSet<PropertyCode>,
}

impl SdioExtDeviceInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = PtpReader::new(data);
        let version = r.u16()?;
        let codes = r.u16_array()?;
        let controls = if r.remaining() > 0 {
            r.u16_array()?
        } else {
            Vec::new()
        };

        let mut info = Self {
            version,
            controls: controls.into_iter().collect(),
            ..Default::default()
        };
        for code in codes {
            match code_kind(code) {
                CodeKind::Operation => {
                    info.operations.insert(code);
                }
                CodeKind::Event => {
                    info.events.insert(code);
                }
                CodeKind::Property => {
                    info.properties.insert(code);
                }
                CodeKind::Response | CodeKind::Other => {
                    tracing::debug!(code = %format!("0x{:04X}", code), "Ignoring unclassified extension code");
                }
            }
        }
        Ok(info)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.version);
        let codes: Vec<u16> = self
            .operations
            .iter()
            .chain(&self.events)
            .chain(&self.properties)
            .copied()
            .collect();
        buf.put_u16_array(&codes);
        buf.put_u16_array(&self.controls.iter().copied().collect::<Vec<_>>());
        buf
    }
}
