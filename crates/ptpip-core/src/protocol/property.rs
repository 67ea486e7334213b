//! Device property descriptors.
//!
//! A descriptor is `code u16 | type u16 | get/set u8 | [enabled u8] |
//! default | current | form flag u8 | form`. Value layout is fixed by the
//! type tag. The vendor layout adds the enabled byte and carries two
//! enumeration lists (settable, then available values).

use super::constants::*;
use super::cursor::{DecodeError, PtpReader, PtpWrite};

/// Typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Int128(i128),
    UInt128(u128),
    Array(u16, Vec<PropertyValue>),
    String(String),
}

impl PropertyValue {
    /// Decode one value of `data_type`.
    pub fn decode(data_type: u16, r: &mut PtpReader<'_>) -> Result<Self, DecodeError> {
        if data_type != DATATYPE_STRING && data_type & DATATYPE_ARRAY_FLAG != 0 {
            let element = data_type & !DATATYPE_ARRAY_FLAG;
            if scalar_size(element).is_none() {
                return Err(DecodeError::UnknownDataType(data_type));
            }
            let count = r.u32()? as usize;
            let values = (0..count)
                .map(|_| Self::decode(element, r))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PropertyValue::Array(element, values));
        }

        Ok(match data_type {
            DATATYPE_INT8 => PropertyValue::Int8(r.i8()?),
            DATATYPE_UINT8 => PropertyValue::UInt8(r.u8()?),
            DATATYPE_INT16 => PropertyValue::Int16(r.i16()?),
            DATATYPE_UINT16 => PropertyValue::UInt16(r.u16()?),
            DATATYPE_INT32 => PropertyValue::Int32(r.i32()?),
            DATATYPE_UINT32 => PropertyValue::UInt32(r.u32()?),
            DATATYPE_INT64 => PropertyValue::Int64(r.i64()?),
            DATATYPE_UINT64 => PropertyValue::UInt64(r.u64()?),
            DATATYPE_INT128 => PropertyValue::Int128(r.i128()?),
            DATATYPE_UINT128 => PropertyValue::UInt128(r.u128()?),
            DATATYPE_STRING => PropertyValue::String(r.string()?),
            other => return Err(DecodeError::UnknownDataType(other)),
        })
    }

    /// Type tag this value encodes as.
    pub fn data_type(&self) -> u16 {
        match self {
            PropertyValue::Int8(_) => DATATYPE_INT8,
            PropertyValue::UInt8(_) => DATATYPE_UINT8,
            PropertyValue::Int16(_) => DATATYPE_INT16,
            PropertyValue::UInt16(_) => DATATYPE_UINT16,
            PropertyValue::Int32(_) => DATATYPE_INT32,
            PropertyValue::UInt32(_) => DATATYPE_UINT32,
            PropertyValue::Int64(_) => DATATYPE_INT64,
            PropertyValue::UInt64(_) => DATATYPE_UINT64,
            PropertyValue::Int128(_) => DATATYPE_INT128,
            PropertyValue::UInt128(_) => DATATYPE_UINT128,
            PropertyValue::Array(element, _) => element | DATATYPE_ARRAY_FLAG,
            PropertyValue::String(_) => DATATYPE_STRING,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            PropertyValue::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::UInt8(v) => buf.put_u8(*v),
            PropertyValue::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::UInt16(v) => buf.put_u16(*v),
            PropertyValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::UInt32(v) => buf.put_u32(*v),
            PropertyValue::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::UInt64(v) => buf.put_u64(*v),
            PropertyValue::Int128(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::UInt128(v) => buf.extend_from_slice(&v.to_le_bytes()),
            PropertyValue::Array(_, values) => {
                buf.put_u32(values.len() as u32);
                for value in values {
                    value.encode(buf);
                }
            }
            PropertyValue::String(s) => buf.put_string(s),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Build a scalar of `data_type` from an integer, if it fits.
    pub fn from_integer(data_type: u16, v: i128) -> Option<Self> {
        Some(match data_type {
            DATATYPE_INT8 => PropertyValue::Int8(i8::try_from(v).ok()?),
            DATATYPE_UINT8 => PropertyValue::UInt8(u8::try_from(v).ok()?),
            DATATYPE_INT16 => PropertyValue::Int16(i16::try_from(v).ok()?),
            DATATYPE_UINT16 => PropertyValue::UInt16(u16::try_from(v).ok()?),
            DATATYPE_INT32 => PropertyValue::Int32(i32::try_from(v).ok()?),
            DATATYPE_UINT32 => PropertyValue::UInt32(u32::try_from(v).ok()?),
            DATATYPE_INT64 => PropertyValue::Int64(i64::try_from(v).ok()?),
            DATATYPE_UINT64 => PropertyValue::UInt64(u64::try_from(v).ok()?),
            DATATYPE_INT128 => PropertyValue::Int128(v),
            DATATYPE_UINT128 => PropertyValue::UInt128(u128::try_from(v).ok()?),
            _ => return None,
        })
    }
}

fn scalar_size(data_type: u16) -> Option<usize> {
    match data_type {
        DATATYPE_INT8 | DATATYPE_UINT8 => Some(1),
        DATATYPE_INT16 | DATATYPE_UINT16 => Some(2),
        DATATYPE_INT32 | DATATYPE_UINT32 => Some(4),
        DATATYPE_INT64 | DATATYPE_UINT64 => Some(8),
        DATATYPE_INT128 | DATATYPE_UINT128 => Some(16),
        _ => None,
    }
}

/// Allowed values of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyForm {
    None,
    Range {
        min: PropertyValue,
        max: PropertyValue,
        step: PropertyValue,
    },
    Enumeration {
        /// Values the host may write.
        supported: Vec<PropertyValue>,
        /// Values the device will currently accept.
        available: Vec<PropertyValue>,
    },
}

/// Which descriptor encoding a response uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyLayout {
    /// GetDevicePropDesc.
    Standard,
    /// SDIO_GetExtDevicePropInfo and SDIO_GetAllExtDevicePropInfo.
    Vendor,
}

/// One decoded property descriptor. A fresh fetch yields a fresh value;
/// descriptors are never patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperty {
    pub code: PropertyCode,
    pub data_type: u16,
    pub writable: bool,
    pub enabled: bool,
    pub factory_default: PropertyValue,
    pub current: PropertyValue,
    pub form: PropertyForm,
}

impl DeviceProperty {
    /// Decode one descriptor from the reader position.
    pub fn decode(r: &mut PtpReader<'_>, layout: PropertyLayout) -> Result<Self, DecodeError> {
        let code = r.u16()?;
        let data_type = r.u16()?;
        let writable = r.u8()? == PROPERTY_GET_SET;
        let enabled = match layout {
            PropertyLayout::Standard => true,
            PropertyLayout::Vendor => r.u8()? != 0,
        };
        let factory_default = PropertyValue::decode(data_type, r)?;
        let current = PropertyValue::decode(data_type, r)?;

        let form = match r.u8()? {
            FORM_NONE => PropertyForm::None,
            FORM_RANGE => PropertyForm::Range {
                min: PropertyValue::decode(data_type, r)?,
                max: PropertyValue::decode(data_type, r)?,
                step: PropertyValue::decode(data_type, r)?,
            },
            FORM_ENUMERATION => {
                let supported = read_enumeration(data_type, r)?;
                let available = match layout {
                    PropertyLayout::Standard => supported.clone(),
                    PropertyLayout::Vendor => read_enumeration(data_type, r)?,
                };
                PropertyForm::Enumeration {
                    supported,
                    available,
                }
            }
            other => {
                return Err(DecodeError::MalformedPayload(format!(
                    "property 0x{:04X}: unknown form flag {}",
                    code, other
                )));
            }
        };

        Ok(Self {
            code,
            data_type,
            writable,
            enabled,
            factory_default,
            current,
            form,
        })
    }

    /// Decode the single descriptor at `offset` inside a response blob.
    pub fn parse_at(data: &[u8], offset: usize, layout: PropertyLayout) -> Result<Self, DecodeError> {
        let mut r = PtpReader::at(data, offset)?;
        Self::decode(&mut r, layout)
    }

    /// Decode a batch response: u64 count, then vendor descriptors.
    pub fn parse_all(data: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut r = PtpReader::new(data);
        let count = r.u64()?;
        // Smallest descriptor is 8 bytes; reject counts the payload cannot hold.
        if count > (r.remaining() / 8) as u64 {
            return Err(DecodeError::MalformedPayload(format!(
                "{} descriptors cannot fit in {} bytes",
                count,
                r.remaining()
            )));
        }
        (0..count)
            .map(|_| Self::decode(&mut r, PropertyLayout::Vendor))
            .collect()
    }

    pub fn encode(&self, layout: PropertyLayout, buf: &mut Vec<u8>) {
        buf.put_u16(self.code);
        buf.put_u16(self.data_type);
        buf.put_u8(if self.writable {
            PROPERTY_GET_SET
        } else {
            PROPERTY_GET
        });
        if layout == PropertyLayout::Vendor {
            buf.put_u8(self.enabled as u8);
        }
        self.factory_default.encode(buf);
        self.current.encode(buf);
        match &self.form {
            PropertyForm::None => buf.put_u8(FORM_NONE),
            PropertyForm::Range { min, max, step } => {
                buf.put_u8(FORM_RANGE);
                min.encode(buf);
                max.encode(buf);
                step.encode(buf);
            }
            PropertyForm::Enumeration {
                supported,
                available,
            } => {
                buf.put_u8(FORM_ENUMERATION);
                write_enumeration(supported, buf);
                if layout == PropertyLayout::Vendor {
                    write_enumeration(available, buf);
                }
            }
        }
    }

    pub fn to_bytes(&self, layout: PropertyLayout) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(layout, &mut buf);
        buf
    }

    /// Encode a batch response body.
    pub fn encode_all(properties: &[DeviceProperty]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(properties.len() as u64);
        for property in properties {
            property.encode(PropertyLayout::Vendor, &mut buf);
        }
        buf
    }

    /// Values the device currently accepts, empty unless enumerated.
    pub fn available_values(&self) -> &[PropertyValue] {
        match &self.form {
            PropertyForm::Enumeration { available, .. } => available,
            _ => &[],
        }
    }

    pub fn supported_values(&self) -> &[PropertyValue] {
        match &self.form {
            PropertyForm::Enumeration { supported, .. } => supported,
            _ => &[],
        }
    }
}

fn read_enumeration(data_type: u16, r: &mut PtpReader<'_>) -> Result<Vec<PropertyValue>, DecodeError> {
    let count = r.u16()? as usize;
    (0..count).map(|_| PropertyValue::decode(data_type, r)).collect()
}

fn write_enumeration(values: &[PropertyValue], buf: &mut Vec<u8>) {
    buf.put_u16(values.len() as u16);
    for value in values {
        value.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso() -> DeviceProperty {
        DeviceProperty {
            code: 0xD21E,
            data_type: DATATYPE_UINT32,
            writable: true,
            enabled: true,
            factory_default: PropertyValue::UInt32(0x00FF_FFFF),
            current: PropertyValue::UInt32(100),
            form: PropertyForm::Enumeration {
                supported: vec![PropertyValue::UInt32(100), PropertyValue::UInt32(200)],
                available: vec![PropertyValue::UInt32(100)],
            },
        }
    }

    #[test]
    fn test_vendor_descriptor_layout() {
        let bytes = iso().to_bytes(PropertyLayout::Vendor);
        // code, type, get/set, enabled
        assert_eq!(&bytes[..6], &[0x1E, 0xD2, 0x06, 0x00, 0x01, 0x01]);
        let parsed = DeviceProperty::parse_at(&bytes, 0, PropertyLayout::Vendor).unwrap();
        assert_eq!(parsed, iso());
        assert_eq!(parsed.available_values(), &[PropertyValue::UInt32(100)]);
    }

    #[test]
    fn test_standard_descriptor_shares_enumeration() {
        let mut prop = iso();
        prop.form = PropertyForm::Enumeration {
            supported: vec![PropertyValue::UInt32(100)],
            available: vec![PropertyValue::UInt32(100)],
        };
        let bytes = prop.to_bytes(PropertyLayout::Standard);
        let parsed = DeviceProperty::parse_at(&bytes, 0, PropertyLayout::Standard).unwrap();
        assert_eq!(parsed, prop);
    }

    #[test]
    fn test_parse_at_offset() {
        let mut blob = vec![0xEE; 12];
        blob.extend(iso().to_bytes(PropertyLayout::Vendor));
        let parsed = DeviceProperty::parse_at(&blob, 12, PropertyLayout::Vendor).unwrap();
        assert_eq!(parsed.code, 0xD21E);
    }

    #[test]
    fn test_parse_all_with_string_and_range() {
        let name = DeviceProperty {
            code: 0xD2FF,
            data_type: DATATYPE_STRING,
            writable: false,
            enabled: true,
            factory_default: PropertyValue::String(String::new()),
            current: PropertyValue::String("Zoom".into()),
            form: PropertyForm::None,
        };
        let zoom = DeviceProperty {
            code: 0xD25F,
            data_type: DATATYPE_INT8,
            writable: true,
            enabled: false,
            factory_default: PropertyValue::Int8(0),
            current: PropertyValue::Int8(-1),
            form: PropertyForm::Range {
                min: PropertyValue::Int8(-8),
                max: PropertyValue::Int8(8),
                step: PropertyValue::Int8(1),
            },
        };
        let all = vec![iso(), name, zoom];
        let parsed = DeviceProperty::parse_all(&DeviceProperty::encode_all(&all)).unwrap();
        assert_eq!(parsed, all);
    }

    #[test]
    fn test_truncated_descriptor_is_malformed() {
        let bytes = iso().to_bytes(PropertyLayout::Vendor);
        let err = DeviceProperty::parse_at(&bytes[..bytes.len() - 1], 0, PropertyLayout::Vendor);
        assert!(matches!(err, Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_array_value() {
        let value = PropertyValue::Array(DATATYPE_UINT16, vec![PropertyValue::UInt16(1), PropertyValue::UInt16(2)]);
        let bytes = value.to_bytes();
        let mut r = PtpReader::new(&bytes);
        assert_eq!(PropertyValue::decode(value.data_type(), &mut r).unwrap(), value);
    }

    #[test]
    fn test_unknown_data_type() {
        let mut r = PtpReader::new(&[0, 0]);
        assert_eq!(
            PropertyValue::decode(0x0042, &mut r),
            Err(DecodeError::UnknownDataType(0x0042))
        );
    }
}
