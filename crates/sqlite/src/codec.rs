//! Binary layout of the `fields` column: repeated
//! `u32 name len | name | u32 value len | value`, big endian.

use {
    backbone_core::{EntryFields, Error, Result},
    bytes::{Buf, BufMut, Bytes, BytesMut},
};

pub(crate) fn encode(fields: &EntryFields) -> Vec<u8> {
    let size = fields
        .iter()
        .map(|(name, value)| 8 + name.len() + value.len())
        .sum();
    let mut buf = BytesMut::with_capacity(size);
    for (name, value) in fields {
        buf.put_u32(name.len() as u32);
        buf.put_slice(name.as_bytes());
        buf.put_u32(value.len() as u32);
        buf.put_slice(value);
    }
    buf.to_vec()
}

pub(crate) fn decode(raw: &[u8]) -> Result<EntryFields> {
    let mut buf = Bytes::copy_from_slice(raw);
    let mut fields = EntryFields::new();
    while buf.has_remaining() {
        let name = chunk(&mut buf)?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|e| Error::invalid_envelope(format!("field name is not utf-8: {e}")))?;
        let value = chunk(&mut buf)?;
        fields.insert(name, value);
    }
    Ok(fields)
}

fn chunk(buf: &mut Bytes) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::invalid_envelope("truncated field length"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::invalid_envelope(format!(
            "field needs {len} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_survive_the_column() {
        let fields = EntryFields::from([
            ("meta".to_string(), Bytes::from_static(br#"{"operation":"Placed"}"#)),
            ("s:Placed~pdf".to_string(), Bytes::from_static(&[0, 159, 255])),
            ("empty".to_string(), Bytes::new()),
        ]);
        assert_eq!(decode(&encode(&fields)).unwrap(), fields);
    }

    #[test]
    fn truncated_column_is_rejected() {
        let fields = EntryFields::from([("meta".to_string(), Bytes::from_static(b"{}"))]);
        let raw = encode(&fields);
        let err = decode(&raw[..raw.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope { .. }));
    }
}
