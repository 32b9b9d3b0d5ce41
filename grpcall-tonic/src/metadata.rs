use bytes::Bytes;
use grpcall_core::Metadata;
use grpcall_core::descriptor::MetadataDescriptor;
use grpcall_core::metadata::is_binary_key;
use grpcall_core::transport::TransportError;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue, KeyAndValueRef,
    MetadataMap,
};

use crate::{Error, Result};

/// Decode a call's metadata descriptor, fill in `defaults` for keys the call does not set,
/// and append everything to `dst`.
pub(crate) fn apply_descriptor(
    descriptor: &str,
    defaults: &Metadata,
    dst: &mut MetadataMap,
) -> Result<()> {
    let mut md = if descriptor.trim().is_empty() {
        Metadata::new()
    } else {
        MetadataDescriptor::decode(descriptor)?.to_metadata()?
    };
    for (key, value) in defaults.iter() {
        if !md.contains_key(key) {
            md.add(key, value.clone())?;
        }
    }
    to_tonic(&md, dst)
}

pub(crate) fn to_tonic(md: &Metadata, dst: &mut MetadataMap) -> Result<()> {
    for (key, value) in md.iter() {
        if is_binary_key(key) {
            let k = BinaryMetadataKey::from_bytes(key.as_bytes())
                .map_err(|_| Error::MetadataKey(key.to_string()))?;
            dst.append_bin(k, BinaryMetadataValue::from_bytes(value.as_bytes()));
        } else {
            let k = AsciiMetadataKey::from_bytes(key.as_bytes())
                .map_err(|_| Error::MetadataKey(key.to_string()))?;
            let v = value
                .as_str()
                .and_then(|s| AsciiMetadataValue::try_from(s).ok())
                .ok_or_else(|| Error::MetadataValue(key.to_string()))?;
            dst.append(k, v);
        }
    }
    Ok(())
}

/// Entries that do not fit the metadata model are skipped.
pub(crate) fn from_tonic(src: &MetadataMap) -> Metadata {
    let mut md = Metadata::new();
    for entry in src.iter() {
        let added = match entry {
            KeyAndValueRef::Ascii(key, value) => match value.to_str() {
                Ok(v) => md.add(key.as_str(), v),
                Err(_) => continue,
            },
            KeyAndValueRef::Binary(key, value) => match value.to_bytes() {
                Ok(v) => md.add(key.as_str(), v),
                Err(_) => continue,
            },
        };
        if let Err(err) = added {
            tracing::warn!(error = %err, "dropping response metadata entry");
        }
    }
    md
}

pub(crate) fn descriptor_json(src: &MetadataMap) -> String {
    from_tonic(src).to_descriptor().encode()
}

pub(crate) fn status_error(status: &tonic::Status) -> TransportError {
    TransportError::Status {
        code: status.code() as i32,
        message: status.message().to_string(),
        metadata: descriptor_json(status.metadata()),
    }
}
