use super::structs::*;
use super::utils::calculate_crc16;
use super::SmlError;
use log::{debug, warn};

// SML transport constants
pub(crate) const SML_START_SEQUENCE: [u8; 8] = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x01, 0x01, 0x01];
pub(crate) const SML_END_ESCAPE: [u8; 4] = [0x1B, 0x1B, 0x1B, 0x1A];
// padding count + CRC16 following the end escape
const SML_END_TRAILER: usize = 3;

// SML message type constants
const SML_GET_LIST_RESPONSE: u32 = 0x0701;

// Value nesting bound; real telegrams stay far below this.
const MAX_NESTING: usize = 16;

/// Scan the accumulation buffer for one complete SML transport frame.
///
/// Returns the number of bytes consumed from the front of the buffer and
/// the messages decoded from the first complete frame found. The caller
/// discards the consumed prefix, keeps the remainder and calls again; a
/// result of zero consumed bytes and zero messages means nothing further
/// can be extracted until more data arrives.
///
/// Garbage before a start sequence is consumed. A frame whose end escape
/// or trailer has not arrived yet is retained verbatim. A complete frame
/// whose content does not decode is consumed and skipped with a warning,
/// so a corrupt telegram can never wedge the ingest loop.
pub fn parse_frame(buf: &[u8]) -> (usize, Vec<SmlMessage>) {
    let start = match find_subsequence(buf, &SML_START_SEQUENCE) {
        Some(pos) => pos,
        None => {
            // keep a tail that could be a start sequence split across reads
            let keep = SML_START_SEQUENCE.len() - 1;
            return (buf.len().saturating_sub(keep), Vec::new());
        }
    };

    let content_start = start + SML_START_SEQUENCE.len();
    let end = match find_subsequence(&buf[content_start..], &SML_END_ESCAPE) {
        Some(pos) => content_start + pos,
        None => return (start, Vec::new()),
    };

    let frame_end = end + SML_END_ESCAPE.len() + SML_END_TRAILER;
    if frame_end > buf.len() {
        // end escape seen but the trailer is still in flight
        return (start, Vec::new());
    }

    let expected = u16::from_be_bytes([buf[frame_end - 2], buf[frame_end - 1]]);
    let calculated = calculate_crc16(&buf[start..frame_end - 2]);
    if expected != calculated {
        debug!(
            "SML frame checksum mismatch: expected=0x{:04X}, calculated=0x{:04X}",
            expected, calculated
        );
    }

    match SmlParser::new(&buf[content_start..end]).parse_sml_file() {
        Ok(file) => (frame_end, file.messages),
        Err(e) => {
            warn!("Dropping undecodable SML frame: {}", e);
            (frame_end, Vec::new())
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

struct SmlParser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SmlParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn parse_sml_file(&mut self) -> Result<SmlFile, SmlError> {
        let mut messages = Vec::new();

        // 0x00 at a message boundary is padding before the end escape
        while self.pos < self.data.len() && self.data[self.pos] != 0x00 {
            match self.parse_sml_message() {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!("Failed to parse SML message at position {}: {}", self.pos, e);
                    break;
                }
            }
        }

        if messages.is_empty() {
            return Err(SmlError::ParseError("no valid SML messages found".to_string()));
        }

        Ok(SmlFile { messages })
    }

    fn parse_sml_message(&mut self) -> Result<SmlMessage, SmlError> {
        self.expect_list(6)?;
        let transaction_id = self.parse_octet_string()?.unwrap_or_default();
        let group_no = self.parse_unsigned()? as u8;
        let abort_on_error = self.parse_unsigned()? as u8;
        let message_body = self.parse_message_body()?;
        let crc = self.parse_optional_u16()?;
        self.expect_end_of_message()?;

        Ok(SmlMessage {
            transaction_id,
            group_no,
            abort_on_error,
            message_body,
            crc,
        })
    }

    fn parse_message_body(&mut self) -> Result<SmlMessageBody, SmlError> {
        self.expect_list(2)?;
        let msg_type = self.parse_unsigned()? as u32;

        let mut body = SmlMessageBody {
            msg_type,
            get_list_response: None,
        };

        match msg_type {
            SML_GET_LIST_RESPONSE => {
                body.get_list_response = Some(self.parse_get_list_response()?);
            }
            _ => {
                debug!("Skipping SML message type 0x{:04x}", msg_type);
                self.skip_value(0)?;
            }
        }

        Ok(body)
    }

    fn parse_get_list_response(&mut self) -> Result<SmlGetListResponse, SmlError> {
        self.expect_list(7)?;
        let client_id = self.parse_octet_string()?;
        let server_id = self.parse_octet_string()?;
        let list_name = self.parse_octet_string()?;
        let act_sensor_time = self.parse_optional_time()?;
        let val_list = self.parse_val_list()?;
        let list_signature = self.parse_octet_string()?;
        let act_gateway_time = self.parse_optional_time()?;

        Ok(SmlGetListResponse {
            client_id,
            server_id,
            list_name,
            act_sensor_time,
            val_list,
            list_signature,
            act_gateway_time,
        })
    }

    fn parse_val_list(&mut self) -> Result<Vec<SmlListEntry>, SmlError> {
        let count = self.parse_list_length()?;
        // no with_capacity here: the count is attacker-controlled and a
        // bogus length must fail on the missing data, not on allocation
        let mut entries = Vec::new();

        for _ in 0..count {
            entries.push(self.parse_list_entry()?);
        }

        Ok(entries)
    }

    fn parse_list_entry(&mut self) -> Result<SmlListEntry, SmlError> {
        self.expect_list(7)?;
        let obis_code = self.parse_octet_string()?;
        let status = self.parse_optional_unsigned()?;
        let val_time = self.parse_optional_time()?;
        let unit = self.parse_optional_u8()?;
        let scaler = self.parse_optional_i8()?;
        let value = self.parse_value(0)?;
        let value_signature = self.parse_octet_string()?;

        Ok(SmlListEntry {
            obis_code,
            status,
            val_time,
            unit,
            scaler,
            value,
            value_signature,
        })
    }

    // Basic type parsers

    fn take_byte(&mut self) -> Result<u8, SmlError> {
        if self.pos >= self.data.len() {
            return Err(SmlError::ParseError("unexpected end of data".to_string()));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn peek_byte(&self) -> Result<u8, SmlError> {
        if self.pos >= self.data.len() {
            return Err(SmlError::ParseError("unexpected end of data".to_string()));
        }
        Ok(self.data[self.pos])
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], SmlError> {
        if self.pos + len > self.data.len() {
            return Err(SmlError::ParseError("field extends beyond data".to_string()));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Type-length field. For simple types the length includes the TL
    /// bytes themselves; for lists it counts elements. A set msb chains
    /// another length nibble.
    fn parse_type_length(&mut self) -> Result<(u8, usize, usize), SmlError> {
        let first = self.take_byte()?;
        let type_field = (first >> 4) & 0x07;
        let mut length = (first & 0x0F) as usize;
        let mut tl_bytes = 1;

        let mut current = first;
        while current & 0x80 != 0 {
            if tl_bytes >= 8 {
                return Err(SmlError::ParseError("type length field too long".to_string()));
            }
            current = self.take_byte()?;
            length = (length << 4) | (current & 0x0F) as usize;
            tl_bytes += 1;
        }

        Ok((type_field, length, tl_bytes))
    }

    fn data_len(length: usize, tl_bytes: usize) -> Result<usize, SmlError> {
        length
            .checked_sub(tl_bytes)
            .ok_or_else(|| SmlError::ParseError("type length shorter than its own field".to_string()))
    }

    fn parse_list_length(&mut self) -> Result<usize, SmlError> {
        let (type_field, length, _) = self.parse_type_length()?;
        if type_field != 7 {
            return Err(SmlError::ParseError(format!(
                "expected list type, got type {}",
                type_field
            )));
        }
        Ok(length)
    }

    fn expect_list(&mut self, expected: usize) -> Result<(), SmlError> {
        let count = self.parse_list_length()?;
        if count != expected {
            return Err(SmlError::ParseError(format!(
                "expected list of {}, got {}",
                expected, count
            )));
        }
        Ok(())
    }

    fn expect_end_of_message(&mut self) -> Result<(), SmlError> {
        match self.take_byte()? {
            0x00 => Ok(()),
            byte => Err(SmlError::ParseError(format!(
                "expected end of message, got 0x{:02x}",
                byte
            ))),
        }
    }

    /// True when the next element is the "optional not set" marker 0x01,
    /// consuming it.
    fn optional_absent(&mut self) -> Result<bool, SmlError> {
        if self.peek_byte()? == 0x01 {
            self.pos += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_octet_string(&mut self) -> Result<Option<Vec<u8>>, SmlError> {
        let (type_field, length, tl_bytes) = self.parse_type_length()?;
        if type_field != 0 {
            return Err(SmlError::ParseError(format!(
                "expected octet string, got type {}",
                type_field
            )));
        }
        let len = Self::data_len(length, tl_bytes)?;
        if len == 0 {
            // the empty encoding doubles as "optional not set"
            return Ok(None);
        }
        Ok(Some(self.take_bytes(len)?.to_vec()))
    }

    fn parse_unsigned(&mut self) -> Result<u64, SmlError> {
        let (type_field, length, tl_bytes) = self.parse_type_length()?;
        if type_field != 6 {
            return Err(SmlError::ParseError(format!(
                "expected unsigned, got type {}",
                type_field
            )));
        }
        let len = Self::data_len(length, tl_bytes)?;
        if len == 0 || len > 8 {
            return Err(SmlError::ParseError(format!("invalid unsigned length {}", len)));
        }
        Ok(fold_unsigned(self.take_bytes(len)?))
    }

    fn parse_signed(&mut self) -> Result<i64, SmlError> {
        let (type_field, length, tl_bytes) = self.parse_type_length()?;
        if type_field != 5 {
            return Err(SmlError::ParseError(format!(
                "expected signed, got type {}",
                type_field
            )));
        }
        let len = Self::data_len(length, tl_bytes)?;
        if len == 0 || len > 8 {
            return Err(SmlError::ParseError(format!("invalid signed length {}", len)));
        }
        Ok(fold_signed(self.take_bytes(len)?))
    }

    fn parse_optional_unsigned(&mut self) -> Result<Option<u64>, SmlError> {
        if self.optional_absent()? {
            return Ok(None);
        }
        Ok(Some(self.parse_unsigned()?))
    }

    fn parse_optional_u8(&mut self) -> Result<Option<u8>, SmlError> {
        Ok(self.parse_optional_unsigned()?.map(|v| v as u8))
    }

    fn parse_optional_u16(&mut self) -> Result<Option<u16>, SmlError> {
        Ok(self.parse_optional_unsigned()?.map(|v| v as u16))
    }

    fn parse_optional_i8(&mut self) -> Result<Option<i8>, SmlError> {
        if self.optional_absent()? {
            return Ok(None);
        }
        Ok(Some(self.parse_signed()? as i8))
    }

    /// SML_Time is a choice (tag plus value) in newer firmwares and a bare
    /// unsigned in older ones; both occur in the field.
    fn parse_optional_time(&mut self) -> Result<Option<u32>, SmlError> {
        if self.optional_absent()? {
            return Ok(None);
        }
        if (self.peek_byte()? >> 4) & 0x07 == 7 {
            self.expect_list(2)?;
            let _choice = self.parse_unsigned()?;
            return Ok(Some(self.parse_unsigned()? as u32));
        }
        Ok(Some(self.parse_unsigned()? as u32))
    }

    fn parse_value(&mut self, depth: usize) -> Result<Option<SmlValue>, SmlError> {
        if depth >= MAX_NESTING {
            return Err(SmlError::ParseError("value nesting too deep".to_string()));
        }
        if self.optional_absent()? {
            return Ok(None);
        }

        match (self.peek_byte()? >> 4) & 0x07 {
            0 => Ok(Some(SmlValue::OctetString(
                self.parse_octet_string()?.unwrap_or_default(),
            ))),
            4 => {
                let (_, length, tl_bytes) = self.parse_type_length()?;
                if Self::data_len(length, tl_bytes)? != 1 {
                    return Err(SmlError::ParseError("invalid bool length".to_string()));
                }
                Ok(Some(SmlValue::Bool(self.take_byte()? != 0)))
            }
            5 => {
                let (_, length, tl_bytes) = self.parse_type_length()?;
                let len = Self::data_len(length, tl_bytes)?;
                if len == 0 || len > 8 {
                    return Err(SmlError::ParseError(format!(
                        "invalid signed integer length {}",
                        len
                    )));
                }
                let value = fold_signed(self.take_bytes(len)?);
                Ok(Some(match len {
                    1 => SmlValue::Int8(value as i8),
                    2 => SmlValue::Int16(value as i16),
                    4 => SmlValue::Int32(value as i32),
                    _ => SmlValue::Int64(value),
                }))
            }
            6 => {
                let (_, length, tl_bytes) = self.parse_type_length()?;
                let len = Self::data_len(length, tl_bytes)?;
                if len == 0 || len > 8 {
                    return Err(SmlError::ParseError(format!(
                        "invalid unsigned integer length {}",
                        len
                    )));
                }
                let value = fold_unsigned(self.take_bytes(len)?);
                Ok(Some(match len {
                    1 => SmlValue::UInt8(value as u8),
                    2 => SmlValue::UInt16(value as u16),
                    4 => SmlValue::UInt32(value as u32),
                    _ => SmlValue::UInt64(value),
                }))
            }
            7 => {
                let count = self.parse_list_length()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    let item = self
                        .parse_value(depth + 1)?
                        .unwrap_or(SmlValue::OctetString(Vec::new()));
                    items.push(item);
                }
                Ok(Some(SmlValue::List(items)))
            }
            other => Err(SmlError::ParseError(format!("unsupported value type {}", other))),
        }
    }

    /// Consume one element of any type without decoding it; used for
    /// message bodies this bridge does not act on.
    fn skip_value(&mut self, depth: usize) -> Result<(), SmlError> {
        if depth >= MAX_NESTING {
            return Err(SmlError::ParseError("value nesting too deep".to_string()));
        }
        let (type_field, length, tl_bytes) = self.parse_type_length()?;
        if type_field == 7 {
            for _ in 0..length {
                self.skip_value(depth + 1)?;
            }
        } else {
            let len = Self::data_len(length, tl_bytes)?;
            self.take_bytes(len)?;
        }
        Ok(())
    }
}

fn fold_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn fold_signed(bytes: &[u8]) -> i64 {
    let mut value: u64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        u64::MAX
    } else {
        0
    };
    for &b in bytes {
        value = (value << 8) | b as u64;
    }
    value as i64
}
