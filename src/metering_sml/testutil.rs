//! Hand-assembled SML frames for parser and link manager tests.

use super::parser::{SML_END_ESCAPE, SML_START_SEQUENCE};
use super::utils::calculate_crc16;

pub(crate) fn encode_none(out: &mut Vec<u8>) {
    out.push(0x01);
}

pub(crate) fn encode_octet(out: &mut Vec<u8>, data: &[u8]) {
    assert!(data.len() <= 14, "single TL byte only");
    out.push(0x01 + data.len() as u8);
    out.extend_from_slice(data);
}

pub(crate) fn encode_u8(out: &mut Vec<u8>, value: u8) {
    out.push(0x62);
    out.push(value);
}

pub(crate) fn encode_u16(out: &mut Vec<u8>, value: u16) {
    out.push(0x63);
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn encode_i8(out: &mut Vec<u8>, value: i8) {
    out.push(0x52);
    out.push(value as u8);
}

pub(crate) fn encode_i32(out: &mut Vec<u8>, value: i32) {
    out.push(0x55);
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn encode_list(out: &mut Vec<u8>, count: usize) {
    assert!(count <= 15, "single TL byte only");
    out.push(0x70 | count as u8);
}

/// One GetListResponse message; each entry is (obis, raw value, scaler).
pub(crate) fn encode_get_list_message(entries: &[(&[u8], i32, Option<i8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_list(&mut out, 6);
    encode_octet(&mut out, &[0x42]); // transaction id
    encode_u8(&mut out, 0x00); // group no
    encode_u8(&mut out, 0x00); // abort on error
    encode_list(&mut out, 2);
    encode_u16(&mut out, 0x0701); // GetListResponse
    encode_list(&mut out, 7);
    encode_none(&mut out); // client id
    encode_octet(&mut out, b"meter1"); // server id
    encode_none(&mut out); // list name
    encode_none(&mut out); // act sensor time
    encode_list(&mut out, entries.len());
    for (obis, value, scaler) in entries {
        encode_list(&mut out, 7);
        encode_octet(&mut out, obis);
        encode_none(&mut out); // status
        encode_none(&mut out); // val time
        encode_none(&mut out); // unit
        match scaler {
            Some(s) => encode_i8(&mut out, *s),
            None => encode_none(&mut out),
        }
        encode_i32(&mut out, *value);
        encode_none(&mut out); // value signature
    }
    encode_none(&mut out); // list signature
    encode_none(&mut out); // act gateway time
    encode_u16(&mut out, 0x0000); // message crc, not checked
    out.push(0x00); // end of message
    out
}

/// A message with a body type the bridge does not decode (0x0601).
pub(crate) fn encode_unknown_body_message() -> Vec<u8> {
    let mut out = Vec::new();
    encode_list(&mut out, 6);
    encode_octet(&mut out, &[0x42]);
    encode_u8(&mut out, 0x00);
    encode_u8(&mut out, 0x00);
    encode_list(&mut out, 2);
    encode_u16(&mut out, 0x0601);
    encode_octet(&mut out, b"zz"); // opaque body, skipped structurally
    encode_u16(&mut out, 0x0000);
    out.push(0x00);
    out
}

/// Wrap message content into a complete transport frame with a valid CRC.
pub(crate) fn wrap_frame(content: &[u8]) -> Vec<u8> {
    let mut frame = SML_START_SEQUENCE.to_vec();
    frame.extend_from_slice(content);
    frame.extend_from_slice(&SML_END_ESCAPE);
    frame.push(0x00); // no padding
    let crc = calculate_crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

pub(crate) fn build_get_list_frame(entries: &[(&[u8], i32, Option<i8>)]) -> Vec<u8> {
    wrap_frame(&encode_get_list_message(entries))
}
