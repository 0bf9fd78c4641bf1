//! Entry Codec

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn decode_opt<T: DeserializeOwned>(bytes: Option<Bytes>) -> Result<Option<T>> {
    bytes.map(|b| decode(&b)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;

    #[test]
    fn test_decode_rejects_wrong_type() {
        let bytes = encode(&7u8).unwrap();
        let err = decode::<String>(&bytes).unwrap_err();
        assert!(matches!(err, ClusterError::Codec(_)));
    }

    #[test]
    fn test_decode_opt() {
        let bytes = encode("handler-1").unwrap();
        assert_eq!(
            decode_opt::<String>(Some(bytes)).unwrap().as_deref(),
            Some("handler-1")
        );
        assert_eq!(decode_opt::<String>(None).unwrap(), None);
    }
}
