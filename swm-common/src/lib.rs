//! Small, dependency-light utilities shared across the sub-wallet mux
//! workspace: a CSPRNG trait alias, a fixed-size byte-array helper trait,
//! hex/base64 serde adapters, and a millisecond-precision timestamp type.

pub mod byte_array;
pub mod hexstr;
pub mod rng;
pub mod time;

pub use byte_array::ByteArray;
pub use time::TimestampMs;
