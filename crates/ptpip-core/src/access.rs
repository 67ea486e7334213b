//! Capability-driven property access.
//!
//! Which wire operation reads or writes a property depends on what the
//! device advertises. The choice is made here, once, and re-evaluated on
//! every call since the vendor extension info can grow the supported set.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::client::{ClientError, PtpIpClient};
use crate::protocol::{
    DecodeError, DeviceInfo, DeviceProperty, OP_GET_DEVICE_PROP_DESC, OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO,
    OP_SDIO_GET_EXT_DEVICE_PROP_INFO, OP_SDIO_SET_EXT_DEVICE_PROP_VALUE, OP_SET_DEVICE_PROP_VALUE,
    OperationCode, PropertyCode, PropertyLayout, PropertyValue,
};

/// How a property descriptor is fetched, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One round trip for every descriptor, then a local search.
    All,
    /// Vendor single-property fetch.
    Vendor,
    /// Standard GetDevicePropDesc.
    Standard,
}

impl FetchStrategy {
    /// Pick the fetch operation for `info`.
    pub fn select(info: &DeviceInfo) -> Result<Self, ClientError> {
        if info.supports_operation(OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO) {
            Ok(FetchStrategy::All)
        } else if info.supports_operation(OP_SDIO_GET_EXT_DEVICE_PROP_INFO) {
            Ok(FetchStrategy::Vendor)
        } else if info.supports_operation(OP_GET_DEVICE_PROP_DESC) {
            Ok(FetchStrategy::Standard)
        } else {
            Err(ClientError::OperationNotSupported {
                action: "property fetch",
            })
        }
    }

    pub fn operation(&self) -> OperationCode {
        match self {
            FetchStrategy::All => OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO,
            FetchStrategy::Vendor => OP_SDIO_GET_EXT_DEVICE_PROP_INFO,
            FetchStrategy::Standard => OP_GET_DEVICE_PROP_DESC,
        }
    }
}

/// Pick the write operation for `info`: vendor first, then standard.
pub fn select_write(info: &DeviceInfo) -> Result<OperationCode, ClientError> {
    [OP_SDIO_SET_EXT_DEVICE_PROP_VALUE, OP_SET_DEVICE_PROP_VALUE]
        .into_iter()
        .find(|op| info.supports_operation(*op))
        .ok_or(ClientError::OperationNotSupported {
            action: "property write",
        })
}

/// Snapshot of the device's properties at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraEvent {
    pub properties: BTreeMap<PropertyCode, DeviceProperty>,
}

impl CameraEvent {
    pub fn from_properties(properties: impl IntoIterator<Item = DeviceProperty>) -> Self {
        Self {
            properties: properties.into_iter().map(|p| (p.code, p)).collect(),
        }
    }

    pub fn get(&self, code: PropertyCode) -> Option<&DeviceProperty> {
        self.properties.get(&code)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Property reads and writes against one connection.
pub struct PropertyAccess<'a> {
    client: &'a PtpIpClient,
    info: &'a DeviceInfo,
}

impl<'a> PropertyAccess<'a> {
    pub fn new(client: &'a PtpIpClient, info: &'a DeviceInfo) -> Self {
        Self { client, info }
    }

    /// Fetch the descriptor for `code`.
    #[instrument(level = "debug", skip(self), fields(code = %format!("0x{:04X}", code)))]
    pub async fn get_property(&self, code: PropertyCode) -> Result<DeviceProperty, ClientError> {
        let strategy = FetchStrategy::select(self.info)?;
        debug!(?strategy, "Fetching property");

        let property = match strategy {
            FetchStrategy::All => {
                return self
                    .get_all_properties()
                    .await?
                    .into_iter()
                    .find(|p| p.code == code)
                    .ok_or(ClientError::PropertyNotFound(code));
            }
            FetchStrategy::Vendor => self.fetch_single(strategy, code, PropertyLayout::Vendor).await?,
            FetchStrategy::Standard => {
                self.fetch_single(strategy, code, PropertyLayout::Standard)
                    .await?
            }
        };

        if property.code != code {
            debug!(got = %format!("0x{:04X}", property.code), "Device answered for another property");
            return Err(ClientError::PropertyNotFound(code));
        }
        Ok(property)
    }

    /// Every descriptor in one round trip. Requires the batch operation.
    pub async fn get_all_properties(&self) -> Result<Vec<DeviceProperty>, ClientError> {
        if !self
            .info
            .supports_operation(OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO)
        {
            return Err(ClientError::OperationNotSupported {
                action: "batch property fetch",
            });
        }
        let completion = self
            .client
            .execute(OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO, [])
            .await?;
        let properties = DeviceProperty::parse_all(&data_phase(completion.data)?)?;
        debug!(count = properties.len(), "Fetched all properties");
        Ok(properties)
    }

    async fn fetch_single(
        &self,
        strategy: FetchStrategy,
        code: PropertyCode,
        layout: PropertyLayout,
    ) -> Result<DeviceProperty, ClientError> {
        let completion = self
            .client
            .execute(strategy.operation(), [u32::from(code)])
            .await?;
        let data = data_phase(completion.data)?;
        Ok(DeviceProperty::parse_at(&data, 0, layout)?)
    }

    /// Write `value` to property `code`.
    #[instrument(level = "debug", skip(self, value), fields(code = %format!("0x{:04X}", code)))]
    pub async fn set_property(
        &self,
        code: PropertyCode,
        value: &PropertyValue,
    ) -> Result<(), ClientError> {
        let op = select_write(self.info)?;
        self.client
            .execute_with_data(op, [u32::from(code)], value.to_bytes())
            .await?;
        Ok(())
    }

    /// Build a property snapshot.
    ///
    /// Uses the batch fetch when available, otherwise walks every
    /// advertised property code.
    pub async fn fetch_event(&self) -> Result<CameraEvent, ClientError> {
        match FetchStrategy::select(self.info)? {
            FetchStrategy::All => Ok(CameraEvent::from_properties(
                self.get_all_properties().await?,
            )),
            _ => {
                let mut properties = Vec::with_capacity(self.info.supported_properties.len());
                for code in &self.info.supported_properties {
                    properties.push(self.get_property(*code).await?);
                }
                Ok(CameraEvent::from_properties(properties))
            }
        }
    }
}

fn data_phase(data: Option<Vec<u8>>) -> Result<Vec<u8>, ClientError> {
    data.ok_or_else(|| ClientError::Decode(DecodeError::MalformedPayload("missing data phase".into())))
}
