//! PTP/IP packet framing.
//!
//! Every packet is `u32 length | u32 type | payload`, little-endian, where
//! `length` counts the 8 header bytes.

use super::constants::*;
use super::cursor::{DecodeError, PtpReader, PtpWrite};
use super::response::ResponseCode;

/// Operation request sent on the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub data_phase: u32,
    pub code: OperationCode,
    pub transaction_id: TransactionId,
    pub args: Vec<u32>,
}

impl OperationRequest {
    /// Request without a host-to-device data phase.
    ///
    /// # Panics
    ///
    /// Panics if more than five arguments are given.
    pub fn new(
        code: OperationCode,
        args: impl IntoIterator<Item = u32>,
        transaction_id: TransactionId,
    ) -> Self {
        let args: Vec<u32> = args.into_iter().collect();
        assert!(
            args.len() <= MAX_OPERATION_ARGS,
            "operation 0x{code:04X} takes at most {MAX_OPERATION_ARGS} arguments, got {}",
            args.len()
        );
        Self {
            data_phase: data_phase::NONE_OR_IN,
            code,
            transaction_id,
            args,
        }
    }

    /// Request followed by a host-to-device data phase.
    pub fn with_data_out(mut self) -> Self {
        self.data_phase = data_phase::OUT;
        self
    }

    pub fn has_data_out(&self) -> bool {
        self.data_phase == data_phase::OUT
    }
}

/// Operation response closing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResponse {
    pub code: ResponseCode,
    pub transaction_id: TransactionId,
    pub params: Vec<u32>,
}

impl OperationResponse {
    pub fn new(code: ResponseCode, transaction_id: TransactionId) -> Self {
        Self {
            code,
            transaction_id,
            params: Vec::new(),
        }
    }
}

/// Unsolicited event from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPacket {
    pub code: EventCode,
    pub transaction_id: TransactionId,
    pub params: Vec<u32>,
}

impl EventPacket {
    /// # Panics
    ///
    /// Panics if more than three parameters are given.
    pub fn new(code: EventCode, params: impl IntoIterator<Item = u32>) -> Self {
        let params: Vec<u32> = params.into_iter().collect();
        assert!(
            params.len() <= MAX_EVENT_PARAMS,
            "event 0x{code:04X} carries at most {MAX_EVENT_PARAMS} parameters, got {}",
            params.len()
        );
        Self {
            code,
            transaction_id: 0,
            params,
        }
    }
}

/// Payload chunk belonging to a transaction's data phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContainer {
    pub transaction_id: TransactionId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommandRequest {
    pub guid: [u8; 16],
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommandAck {
    pub connection_number: u32,
    pub guid: [u8; 16],
    pub name: String,
    pub version: u32,
}

/// A decoded PTP/IP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    InitCommandRequest(InitCommandRequest),
    InitCommandAck(InitCommandAck),
    InitEventRequest { connection_number: u32 },
    InitEventAck,
    InitFail { reason: u32 },
    OperationRequest(OperationRequest),
    OperationResponse(OperationResponse),
    Event(EventPacket),
    StartData {
        transaction_id: TransactionId,
        total_length: u64,
    },
    Data(DataContainer),
    EndData(DataContainer),
    Cancel { transaction_id: TransactionId },
    ProbeRequest,
    ProbeResponse,
}

impl Packet {
    /// Wire type tag.
    pub fn kind(&self) -> u32 {
        match self {
            Packet::InitCommandRequest(_) => PACKET_INIT_COMMAND_REQUEST,
            Packet::InitCommandAck(_) => PACKET_INIT_COMMAND_ACK,
            Packet::InitEventRequest { .. } => PACKET_INIT_EVENT_REQUEST,
            Packet::InitEventAck => PACKET_INIT_EVENT_ACK,
            Packet::InitFail { .. } => PACKET_INIT_FAIL,
            Packet::OperationRequest(_) => PACKET_OPERATION_REQUEST,
            Packet::OperationResponse(_) => PACKET_OPERATION_RESPONSE,
            Packet::Event(_) => PACKET_EVENT,
            Packet::StartData { .. } => PACKET_START_DATA,
            Packet::Data(_) => PACKET_DATA,
            Packet::Cancel { .. } => PACKET_CANCEL,
            Packet::EndData(_) => PACKET_END_DATA,
            Packet::ProbeRequest => PACKET_PROBE_REQUEST,
            Packet::ProbeResponse => PACKET_PROBE_RESPONSE,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::InitCommandRequest(_) => "InitCommandRequest",
            Packet::InitCommandAck(_) => "InitCommandAck",
            Packet::InitEventRequest { .. } => "InitEventRequest",
            Packet::InitEventAck => "InitEventAck",
            Packet::InitFail { .. } => "InitFail",
            Packet::OperationRequest(_) => "OperationRequest",
            Packet::OperationResponse(_) => "OperationResponse",
            Packet::Event(_) => "Event",
            Packet::StartData { .. } => "StartData",
            Packet::Data(_) => "Data",
            Packet::Cancel { .. } => "Cancel",
            Packet::EndData(_) => "EndData",
            Packet::ProbeRequest => "ProbeRequest",
            Packet::ProbeResponse => "ProbeResponse",
        }
    }

    /// Encode to wire bytes, header included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Packet::InitCommandRequest(req) => {
                payload.extend_from_slice(&req.guid);
                payload.put_wide_cstring(&req.name);
                payload.put_u32(req.version);
            }
            Packet::InitCommandAck(ack) => {
                payload.put_u32(ack.connection_number);
                payload.extend_from_slice(&ack.guid);
                payload.put_wide_cstring(&ack.name);
                payload.put_u32(ack.version);
            }
            Packet::InitEventRequest { connection_number } => {
                payload.put_u32(*connection_number);
            }
            Packet::InitFail { reason } => payload.put_u32(*reason),
            Packet::OperationRequest(req) => {
                payload.put_u32(req.data_phase);
                payload.put_u16(req.code);
                payload.put_u32(req.transaction_id);
                for &arg in &req.args {
                    payload.put_u32(arg);
                }
            }
            Packet::OperationResponse(resp) => {
                payload.put_u16(resp.code.value());
                payload.put_u32(resp.transaction_id);
                for &param in &resp.params {
                    payload.put_u32(param);
                }
            }
            Packet::Event(event) => {
                payload.put_u16(event.code);
                payload.put_u32(event.transaction_id);
                for &param in &event.params {
                    payload.put_u32(param);
                }
            }
            Packet::StartData {
                transaction_id,
                total_length,
            } => {
                payload.put_u32(*transaction_id);
                payload.put_u64(*total_length);
            }
            Packet::Data(data) | Packet::EndData(data) => {
                payload.put_u32(data.transaction_id);
                payload.extend_from_slice(&data.payload);
            }
            Packet::Cancel { transaction_id } => payload.put_u32(*transaction_id),
            Packet::InitEventAck | Packet::ProbeRequest | Packet::ProbeResponse => {}
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32((HEADER_SIZE + payload.len()) as u32);
        buf.put_u32(self.kind());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Read the declared length of the packet at the start of `buf`.
    ///
    /// Returns `Ok(None)` while fewer than 8 header bytes are available.
    pub fn peek_length(buf: &[u8]) -> Result<Option<u32>, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (length as usize) < HEADER_SIZE || length > MAX_PACKET_SIZE {
            return Err(DecodeError::InvalidLength(length));
        }
        Ok(Some(length))
    }

    /// Decode the packet at the start of `buf`. Bytes past the declared
    /// length are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let length = Self::peek_length(buf)?.ok_or(DecodeError::Truncated {
            expected: HEADER_SIZE,
            actual: buf.len(),
        })? as usize;
        if buf.len() < length {
            return Err(DecodeError::Truncated {
                expected: length,
                actual: buf.len(),
            });
        }

        let kind = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut r = PtpReader::new(&buf[HEADER_SIZE..length]);

        let packet = match kind {
            PACKET_INIT_COMMAND_REQUEST => {
                let guid = read_guid(&mut r)?;
                let name = r.wide_cstring()?;
                let version = r.u32()?;
                Packet::InitCommandRequest(InitCommandRequest {
                    guid,
                    name,
                    version,
                })
            }
            PACKET_INIT_COMMAND_ACK => {
                let connection_number = r.u32()?;
                let guid = read_guid(&mut r)?;
                let name = r.wide_cstring()?;
                let version = r.u32()?;
                Packet::InitCommandAck(InitCommandAck {
                    connection_number,
                    guid,
                    name,
                    version,
                })
            }
            PACKET_INIT_EVENT_REQUEST => Packet::InitEventRequest {
                connection_number: r.u32()?,
            },
            PACKET_INIT_EVENT_ACK => Packet::InitEventAck,
            PACKET_INIT_FAIL => Packet::InitFail { reason: r.u32()? },
            PACKET_OPERATION_REQUEST => {
                let data_phase = r.u32()?;
                let code = r.u16()?;
                let transaction_id = r.u32()?;
                let args = read_params(&mut r, MAX_OPERATION_ARGS)?;
                Packet::OperationRequest(OperationRequest {
                    data_phase,
                    code,
                    transaction_id,
                    args,
                })
            }
            PACKET_OPERATION_RESPONSE => {
                let code = ResponseCode::new(r.u16()?);
                let transaction_id = r.u32()?;
                let params = read_params(&mut r, MAX_OPERATION_ARGS)?;
                Packet::OperationResponse(OperationResponse {
                    code,
                    transaction_id,
                    params,
                })
            }
            PACKET_EVENT => {
                let code = r.u16()?;
                let transaction_id = r.u32()?;
                let params = read_params(&mut r, MAX_EVENT_PARAMS)?;
                Packet::Event(EventPacket {
                    code,
                    transaction_id,
                    params,
                })
            }
            PACKET_START_DATA => Packet::StartData {
                transaction_id: r.u32()?,
                total_length: r.u64()?,
            },
            PACKET_DATA => Packet::Data(read_data(&mut r)?),
            PACKET_END_DATA => Packet::EndData(read_data(&mut r)?),
            PACKET_CANCEL => Packet::Cancel {
                transaction_id: r.u32()?,
            },
            PACKET_PROBE_REQUEST => Packet::ProbeRequest,
            PACKET_PROBE_RESPONSE => Packet::ProbeResponse,
            other => return Err(DecodeError::UnknownPacketKind(other)),
        };
        Ok(packet)
    }
}

fn read_guid(r: &mut PtpReader<'_>) -> Result<[u8; 16], DecodeError> {
    let mut guid = [0u8; 16];
    guid.copy_from_slice(r.bytes(16)?);
    Ok(guid)
}

fn read_params(r: &mut PtpReader<'_>, max: usize) -> Result<Vec<u32>, DecodeError> {
    let remaining = r.remaining();
    if remaining % 4 != 0 || remaining / 4 > max {
        return Err(DecodeError::MalformedPayload(format!(
            "{} trailing bytes do not form at most {} u32 parameters",
            remaining, max
        )));
    }
    (0..remaining / 4).map(|_| r.u32()).collect()
}

fn read_data(r: &mut PtpReader<'_>) -> Result<DataContainer, DecodeError> {
    let transaction_id = r.u32()?;
    Ok(DataContainer {
        transaction_id,
        payload: r.rest().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_request_layout() {
        let packet = Packet::OperationRequest(OperationRequest::new(
            OP_SDIO_GET_EXT_DEVICE_INFO,
            [SDIO_EXT_DEVICE_INFO_ARG],
            4,
        ));
        let bytes = packet.encode();
        assert_eq!(
            bytes,
            vec![
                0x16, 0x00, 0x00, 0x00, // length 22
                0x06, 0x00, 0x00, 0x00, // operation request
                0x01, 0x00, 0x00, 0x00, // data phase
                0x02, 0x92, // op code
                0x04, 0x00, 0x00, 0x00, // transaction id
                0x2C, 0x01, 0x00, 0x00, // arg
            ]
        );
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let packets = vec![
            Packet::InitCommandRequest(InitCommandRequest {
                guid: [7; 16],
                name: "ptpip".into(),
                version: PTPIP_VERSION,
            }),
            Packet::InitCommandAck(InitCommandAck {
                connection_number: 1,
                guid: [9; 16],
                name: "Camera".into(),
                version: PTPIP_VERSION,
            }),
            Packet::InitEventRequest {
                connection_number: 1,
            },
            Packet::InitEventAck,
            Packet::InitFail { reason: 2 },
            Packet::OperationResponse(OperationResponse {
                code: ResponseCode::OK,
                transaction_id: 3,
                params: vec![1, 2],
            }),
            Packet::Event(EventPacket::new(EVENT_SDIO_OBJECT_ADDED, [0xA1])),
            Packet::StartData {
                transaction_id: 5,
                total_length: 1 << 33,
            },
            Packet::Data(DataContainer {
                transaction_id: 5,
                payload: vec![1, 2, 3],
            }),
            Packet::EndData(DataContainer {
                transaction_id: 5,
                payload: vec![],
            }),
            Packet::Cancel { transaction_id: 5 },
            Packet::ProbeRequest,
            Packet::ProbeResponse,
        ];
        for packet in packets {
            let bytes = packet.encode();
            let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            assert_eq!(declared as usize, bytes.len());
            assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_truncated_never_panics() {
        let bytes = Packet::Event(EventPacket::new(EVENT_SDIO_PROPERTY_CHANGED, [1, 2, 3])).encode();
        for cut in 0..bytes.len() {
            match Packet::decode(&bytes[..cut]) {
                Err(DecodeError::Truncated { .. }) => {}
                other => panic!("cut at {}: {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = Packet::ProbeRequest.encode();
        bytes[4] = 0x42;
        assert_eq!(
            Packet::decode(&bytes),
            Err(DecodeError::UnknownPacketKind(0x42))
        );
    }

    #[test]
    fn test_too_many_arguments_is_malformed() {
        let mut bytes = Vec::new();
        bytes.put_u32(8 + 10 + 24);
        bytes.put_u32(PACKET_OPERATION_REQUEST);
        bytes.put_u32(1);
        bytes.put_u16(OP_OPEN_SESSION);
        bytes.put_u32(0);
        for i in 0..6 {
            bytes.put_u32(i);
        }
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    #[test]
    #[should_panic(expected = "at most 5 arguments")]
    fn test_request_rejects_sixth_argument() {
        OperationRequest::new(OP_OPEN_SESSION, [1, 2, 3, 4, 5, 6], 0);
    }

    #[test]
    #[should_panic(expected = "at most 3 parameters")]
    fn test_event_rejects_fourth_parameter() {
        EventPacket::new(0x4006, [1, 2, 3, 4]);
    }

    #[test]
    fn test_request_keeps_five_arguments() {
        let request = OperationRequest::new(OP_OPEN_SESSION, [1, 2, 3, 4, 5], 0);
        assert_eq!(request.args, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_length_below_header_rejected() {
        let bytes = [4u8, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::InvalidLength(4)));
    }
}
