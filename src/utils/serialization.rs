//! CBOR (de)serialization: the data item wrappers used throughout the ISO 18013-5
//! data structures, and the process-wide codec options.

use std::{borrow::Cow, fmt::Debug, io, marker::PhantomData, sync::OnceLock};

use ciborium::{tag, value::Value};
use serde::{
    de::{self, DeserializeOwned},
    ser, Deserialize, Deserializer, Serialize, Serializer,
};
use serde_bytes::ByteBuf;

/// CBOR tag for an embedded, pre-encoded CBOR data item (RFC 8949 §3.4.5.1).
const CBOR_TAG_ENC_CBOR: u64 = 24;

#[derive(thiserror::Error, Debug)]
pub enum CborError {
    #[error("deserialization failed: {0}")]
    Deserialization(#[from] ciborium::de::Error<io::Error>),
    #[error("serialization failed: {0}")]
    Serialization(#[from] ciborium::ser::Error<io::Error>),
    #[error("value conversion failed: {0}")]
    Value(#[from] ciborium::value::Error),
    #[error("CBOR codec options can only be set before first use")]
    OptionsAlreadySet,
}

/// Process-wide CBOR codec settings. Settable once, before the first encode or
/// decode; all later reads observe the same value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CborEncodeDecodeOptions {
    /// Re-order map keys on encode per the RFC 8949 core deterministic rule
    /// (length-first, then lexicographic, of the encoded key). Off by default:
    /// mdoc structures preserve insertion order so that digests stay stable.
    pub deterministic_map_order: bool,
}

static CBOR_OPTIONS: OnceLock<CborEncodeDecodeOptions> = OnceLock::new();

pub fn get_cbor_encode_decode_options() -> CborEncodeDecodeOptions {
    *CBOR_OPTIONS.get_or_init(CborEncodeDecodeOptions::default)
}

pub fn set_cbor_encode_decode_options(options: CborEncodeDecodeOptions) -> Result<(), CborError> {
    CBOR_OPTIONS.set(options).map_err(|_| CborError::OptionsAlreadySet)
}

pub fn cbor_serialize<T: Serialize>(o: &T) -> Result<Vec<u8>, CborError> {
    let mut bytes = Vec::new();
    if get_cbor_encode_decode_options().deterministic_map_order {
        let value = sort_map_keys(Value::serialized(o)?)?;
        ciborium::ser::into_writer(&value, &mut bytes)?;
    } else {
        ciborium::ser::into_writer(o, &mut bytes)?;
    }
    Ok(bytes)
}

pub fn cbor_deserialize<T: DeserializeOwned>(reader: &[u8]) -> Result<T, CborError> {
    let deserialized = ciborium::de::from_reader(reader)?;
    Ok(deserialized)
}

/// Recursively order map entries by their encoded key, length first and then
/// lexicographically. Values inside arrays, maps and tags are visited; the
/// contents of byte strings (including Tag 24 items) are left untouched.
fn sort_map_keys(value: Value) -> Result<Value, CborError> {
    let value = match value {
        Value::Map(entries) => {
            let mut encoded: Vec<(Vec<u8>, (Value, Value))> = entries
                .into_iter()
                .map(|(key, val)| {
                    let mut key_bytes = Vec::new();
                    ciborium::ser::into_writer(&key, &mut key_bytes)?;
                    Ok((key_bytes, (key, sort_map_keys(val)?)))
                })
                .collect::<Result<_, CborError>>()?;
            encoded.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            Value::Map(encoded.into_iter().map(|(_, entry)| entry).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_map_keys).collect::<Result<_, _>>()?),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(sort_map_keys(*inner)?)),
        other => other,
    };
    Ok(value)
}

/// An embedded CBOR data item: CBOR tag 24 wrapping the encoding of `T`.
///
/// The encoded form of the inner value is kept verbatim, both when constructed
/// locally and when read off the wire, so that re-serializing (and in particular
/// digesting, see [`cbor_digest`](super::crypto::cbor_digest)) never depends on
/// how this encoder would have chosen to encode `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedBytes<T> {
    inner: T,
    encoded: Vec<u8>,
}

impl<T> TaggedBytes<T> {
    /// The encoding of the inner value: the content of the tagged byte string,
    /// without the tag 24 head.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Serialize> TaggedBytes<T> {
    pub fn try_new(inner: T) -> Result<Self, CborError> {
        let encoded = cbor_serialize(&inner)?;
        Ok(TaggedBytes { inner, encoded })
    }
}

impl<T> AsRef<T> for TaggedBytes<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> Serialize for TaggedBytes<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        tag::Required::<&serde_bytes::Bytes, CBOR_TAG_ENC_CBOR>(serde_bytes::Bytes::new(&self.encoded))
            .serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for TaggedBytes<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag::Required::<ByteBuf, CBOR_TAG_ENC_CBOR>(buf) = Deserialize::deserialize(deserializer)?;
        let inner = cbor_deserialize(&buf).map_err(de::Error::custom)?;
        Ok(TaggedBytes {
            inner,
            encoded: buf.into_vec(),
        })
    }
}

/// Wrapper around structs that serializes them as a CBOR array of the field
/// values instead of a map, as several ISO 18013-5 structures require
/// (`DeviceAuthentication`, `SessionTranscript`, `OID4VPHandover`).
#[derive(Debug, Clone, PartialEq)]
pub struct CborSeq<T>(pub T);

impl<T: Serialize> Serialize for CborSeq<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match Value::serialized(&self.0).map_err(ser::Error::custom)? {
            Value::Map(entries) => serializer.collect_seq(entries.into_iter().map(|(_, value)| value)),
            _ => Err(ser::Error::custom("struct did not serialize to a map")),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CborSeq<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // serde-derived struct visitors accept sequences, pairing array
        // elements with the fields in declaration order.
        T::deserialize(deserializer).map(CborSeq)
    }
}

/// Field whose value is a constant dictated by the standard, e.g. a version
/// string. Carries no data; serializes to the required value and fails
/// deserialization on anything else.
pub struct RequiredValue<T: RequiredValueTrait>(PhantomData<T>);

pub trait RequiredValueTrait {
    type Type: Serialize + DeserializeOwned + PartialEq + Debug;
    const REQUIRED_VALUE: Self::Type;
}

impl<T: RequiredValueTrait> Default for RequiredValue<T> {
    fn default() -> Self {
        RequiredValue(PhantomData)
    }
}

impl<T: RequiredValueTrait> Clone for RequiredValue<T> {
    fn clone(&self) -> Self {
        RequiredValue(PhantomData)
    }
}

impl<T: RequiredValueTrait> Copy for RequiredValue<T> {}

impl<T: RequiredValueTrait> PartialEq for RequiredValue<T> {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl<T: RequiredValueTrait> Debug for RequiredValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", T::REQUIRED_VALUE)
    }
}

impl<T: RequiredValueTrait> Serialize for RequiredValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        T::REQUIRED_VALUE.serialize(serializer)
    }
}

impl<'de, T: RequiredValueTrait> Deserialize<'de> for RequiredValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let found = T::Type::deserialize(deserializer)?;
        if found == T::REQUIRED_VALUE {
            Ok(RequiredValue(PhantomData))
        } else {
            Err(de::Error::custom(format!(
                "unexpected value {:?}, expected {:?}",
                found,
                T::REQUIRED_VALUE
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceAuthenticationString;
impl RequiredValueTrait for DeviceAuthenticationString {
    type Type = Cow<'static, str>;
    const REQUIRED_VALUE: Self::Type = Cow::Borrowed("DeviceAuthentication");
}
