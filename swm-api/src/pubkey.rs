use serde::{Deserialize, Serialize};
use swm_common::byte_array::ByteArray;
use swm_common::impl_display_as_hex;

/// A 33-byte compressed secp256k1 point identifying a sub-wallet on the
/// transport; this is the address clients send requests to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "test-utils", derive(proptest_derive::Arbitrary))]
pub struct ServicePubkey(#[serde(with = "swm_common::hexstr")] pub [u8; 33]);

/// A 33-byte compressed secp256k1 point identifying the one client
/// authorized to act on a given sub-wallet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "test-utils", derive(proptest_derive::Arbitrary))]
pub struct ClientPubkey(#[serde(with = "swm_common::hexstr")] pub [u8; 33]);

impl ByteArray<33> for ServicePubkey {
    fn from_array(array: [u8; 33]) -> Self {
        Self(array)
    }
    fn to_array(self) -> [u8; 33] {
        self.0
    }
    fn as_array(&self) -> &[u8; 33] {
        &self.0
    }
}

impl ByteArray<33> for ClientPubkey {
    fn from_array(array: [u8; 33]) -> Self {
        Self(array)
    }
    fn to_array(self) -> [u8; 33] {
        self.0
    }
    fn as_array(&self) -> &[u8; 33] {
        &self.0
    }
}

impl_display_as_hex!(ServicePubkey);
impl_display_as_hex!(ClientPubkey);
