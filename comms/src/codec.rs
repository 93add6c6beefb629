//! Payload codecs for the wire frames.
//!
//! Scalars travel big-endian, array bodies as raw `f32` bytes (the shape is
//! fixed group-wide at setup, so only the data moves), structured control
//! payloads as JSON.

use serde::{Serialize, de::DeserializeOwned};

use crate::{CommsErr, Result};

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| CommsErr::InvalidPayload {
        what: "u64",
        len: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(arr))
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![value as u8]
}

pub fn decode_bool(bytes: &[u8]) -> Result<bool> {
    match bytes {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(CommsErr::InvalidPayload {
            what: "bool",
            len: bytes.len(),
        }),
    }
}

pub fn encode_f32s(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

pub fn decode_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(CommsErr::InvalidPayload {
            what: "f32 array",
            len: bytes.len(),
        });
    }
    // pod_collect_to_vec copes with the source buffer being unaligned.
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
