//! [`serde`] (de)serialize helpers for byte buffers that should render as
//! hex strings in human-readable formats (JSON) and raw bytes otherwise.

use std::fmt;
use std::marker::PhantomData;

use hex::FromHex;
use serde::{de, Deserializer, Serializer};

pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(data.as_ref()))
    } else {
        serializer.serialize_bytes(data.as_ref())
    }
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromHex,
    <T as FromHex>::Error: fmt::Display,
    T: for<'a> TryFrom<&'a [u8]>,
    for<'a> <T as TryFrom<&'a [u8]>>::Error: fmt::Display,
{
    struct HexVisitor<T>(PhantomData<T>);

    impl<T> de::Visitor<'_> for HexVisitor<T>
    where
        T: FromHex,
        <T as FromHex>::Error: fmt::Display,
        T: for<'a> TryFrom<&'a [u8]>,
        for<'a> <T as TryFrom<&'a [u8]>>::Error: fmt::Display,
    {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a hex string or byte array")
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
            T::from_hex(s).map_err(de::Error::custom)
        }

        fn visit_bytes<E: de::Error>(self, b: &[u8]) -> Result<Self::Value, E> {
            T::try_from(b).map_err(de::Error::custom)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(HexVisitor(PhantomData))
    } else {
        deserializer.deserialize_bytes(HexVisitor(PhantomData))
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wrapper(#[serde(with = "super")] Vec<u8>);

    #[test]
    fn json_roundtrip() {
        let w = Wrapper(vec![0xab, 0xcd, 0xef]);
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, "\"abcdef\"");
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
