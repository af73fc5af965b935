//! Identifier and encoding helpers

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::StoreError;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Same as [`new_uuid_to_bech32`] but for the store's own error type.
pub(crate) fn new_record_id(hrp: &str) -> Result<String, StoreError> {
    new_uuid_to_bech32(hrp).map_err(|e| StoreError::Encode(e.to_string()))
}

pub(crate) fn to_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

pub(crate) fn from_cbor<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, StoreError> {
    Ok(minicbor::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_carry_their_prefix() {
        let id = new_record_id("quote_").unwrap();
        assert!(id.starts_with("quote_1"));
        assert_ne!(id, new_record_id("quote_").unwrap());
    }
}
