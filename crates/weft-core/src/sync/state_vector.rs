//! State-vector wire form: a count-prefixed sequence of
//! `(client, clock)` varint pairs, clients ascending.

use weft_buffers::{Reader, Writer};

use crate::error::CodecError;
use crate::store::StateVector;

pub(crate) fn encode_state_vector(sv: &StateVector) -> Vec<u8> {
    let entries = sv.iter_sorted();
    let mut w = Writer::new();
    w.var_u64(entries.len() as u64);
    for (client, clock) in entries {
        w.var_u64(client);
        w.var_u64(clock);
    }
    w.into_vec()
}

pub(crate) fn decode_state_vector(bytes: &[u8]) -> Result<StateVector, CodecError> {
    let mut r = Reader::new(bytes);
    let count = r.var_u64()?;
    let mut sv = StateVector::default();
    for _ in 0..count {
        let client = r.var_u64()?;
        let clock = r.var_u64()?;
        sv.insert(client, clock);
    }
    if !r.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(sv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut sv = StateVector::default();
        sv.bump(42, 7);
        sv.bump(7, 1);
        let bytes = encode_state_vector(&sv);
        assert_eq!(decode_state_vector(&bytes).unwrap(), sv);
    }

    #[test]
    fn empty_vector_is_one_byte() {
        let sv = StateVector::default();
        assert_eq!(encode_state_vector(&sv), vec![0]);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_state_vector(&StateVector::default());
        bytes.push(0);
        assert!(decode_state_vector(&bytes).is_err());
    }
}
