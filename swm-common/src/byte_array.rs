//! A trait for types represented in memory as a fixed-size byte array, with
//! hex conversions for human-readable formats.

use std::array::TryFromSliceError;
use std::fmt;

/// A trait for types that are newtype wrappers around `[u8; N]` and carry no
/// additional validation beyond their length. Should NOT be implemented for
/// types whose byte contents need validating (e.g. a curve point).
pub trait ByteArray<const N: usize>: Copy + Sized {
    fn from_array(array: [u8; N]) -> Self;
    fn to_array(self) -> [u8; N];
    fn as_array(&self) -> &[u8; N];

    fn as_slice(&self) -> &[u8] {
        self.as_array().as_slice()
    }

    fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    fn try_from_slice(slice: &[u8]) -> Result<Self, TryFromSliceError> {
        <[u8; N]>::try_from(slice).map(Self::from_array)
    }

    fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }

    fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buf = [0u8; N];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self::from_array(buf))
    }
}

/// Implements [`fmt::Display`] as the lowercase hex encoding for a
/// [`ByteArray`] newtype. Usage: `impl_display_as_hex!(MyPubkey, 33);`
#[macro_export]
macro_rules! impl_display_as_hex {
    ($ty:ty) => {
        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", $crate::ByteArray::to_hex(self))
            }
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct Id([u8; 4]);

    impl ByteArray<4> for Id {
        fn from_array(array: [u8; 4]) -> Self {
            Self(array)
        }
        fn to_array(self) -> [u8; 4] {
            self.0
        }
        fn as_array(&self) -> &[u8; 4] {
            &self.0
        }
    }

    #[test]
    fn hex_roundtrip() {
        let id = Id([0xde, 0xad, 0xbe, 0xef]);
        let s = id.to_hex();
        assert_eq!(s, "deadbeef");
        assert_eq!(Id::from_hex(&s).unwrap(), id);
    }

    #[test]
    fn slice_too_short_errors() {
        assert!(Id::try_from_slice(&[1, 2, 3]).is_err());
    }
}
