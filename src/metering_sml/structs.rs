use std::fmt;

// SML protocol data structures. Only the message body this bridge acts on
// (GetListResponse) is modelled; everything else is skipped by the parser.

#[derive(Debug, Clone)]
pub struct SmlFile {
    pub messages: Vec<SmlMessage>,
}

#[derive(Debug, Clone)]
pub struct SmlMessage {
    pub transaction_id: Vec<u8>,
    pub group_no: u8,
    pub abort_on_error: u8,
    pub message_body: SmlMessageBody,
    pub crc: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SmlMessageBody {
    pub msg_type: u32,
    pub get_list_response: Option<SmlGetListResponse>,
}

#[derive(Debug, Clone)]
pub struct SmlGetListResponse {
    pub client_id: Option<Vec<u8>>,
    pub server_id: Option<Vec<u8>>,
    pub list_name: Option<Vec<u8>>,
    pub act_sensor_time: Option<u32>,
    pub val_list: Vec<SmlListEntry>,
    pub list_signature: Option<Vec<u8>>,
    pub act_gateway_time: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SmlListEntry {
    pub obis_code: Option<Vec<u8>>,
    pub status: Option<u64>,
    pub val_time: Option<u32>,
    pub unit: Option<u8>,
    pub scaler: Option<i8>,
    pub value: Option<SmlValue>,
    pub value_signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub enum SmlValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    OctetString(Vec<u8>),
    List(Vec<SmlValue>),
}

impl SmlValue {
    /// Numeric view of a list entry value. Octet strings, booleans and
    /// nested lists carry no measurement and map to `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SmlValue::Int8(v) => Some(*v as f64),
            SmlValue::Int16(v) => Some(*v as f64),
            SmlValue::Int32(v) => Some(*v as f64),
            SmlValue::Int64(v) => Some(*v as f64),
            SmlValue::UInt8(v) => Some(*v as f64),
            SmlValue::UInt16(v) => Some(*v as f64),
            SmlValue::UInt32(v) => Some(*v as f64),
            SmlValue::UInt64(v) => Some(*v as f64),
            SmlValue::Bool(_) | SmlValue::OctetString(_) | SmlValue::List(_) => None,
        }
    }
}

// SML-specific OBIS code format (6 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmlObisCode {
    pub medium: u8,      // 0: abstract, 1: electricity, etc.
    pub channel: u8,     // 0-255
    pub indicator: u8,   // Physical value indicator
    pub mode: u8,        // Processing method
    pub tariff: u8,      // Tariff/time
    pub previous: u8,    // Historical value indicator
}

impl SmlObisCode {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 6 {
            Some(SmlObisCode {
                medium: bytes[0],
                channel: bytes[1],
                indicator: bytes[2],
                mode: bytes[3],
                tariff: bytes[4],
                previous: bytes[5],
            })
        } else {
            None
        }
    }
}

impl fmt::Display for SmlObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}.{}.{}*{}",
            self.medium, self.channel, self.indicator, self.mode, self.tariff, self.previous
        )
    }
}

/// OBIS bytes for logging. Falls back to hex when the code is not the
/// usual 6 bytes long.
pub fn format_obis_code(obis_bytes: &[u8]) -> String {
    match SmlObisCode::from_bytes(obis_bytes) {
        Some(obis) => obis.to_string(),
        None => hex::encode(obis_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sml_obis_code() {
        let bytes = [0x01, 0x00, 0x01, 0x08, 0x00, 0xFF];
        let obis = SmlObisCode::from_bytes(&bytes).unwrap();
        assert_eq!(obis.to_string(), "1-0:1.8.0*255");
    }

    #[test]
    fn test_format_obis_code_falls_back_to_hex() {
        assert_eq!(format_obis_code(&[0xAB, 0xCD]), "abcd");
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(SmlValue::UInt32(9000).as_f64(), Some(9000.0));
        assert_eq!(SmlValue::Int16(-42).as_f64(), Some(-42.0));
        assert_eq!(SmlValue::OctetString(vec![1, 2]).as_f64(), None);
    }
}
