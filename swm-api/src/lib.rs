//! Wire types shared between the sub-wallet mux core and its clients: the
//! 33-byte service/client key newtypes, the request/response protocol
//! payloads (a NIP-47-shaped JSON envelope, the same shape NWC uses), and
//! the abstract error-kind taxonomy from the error handling design.

pub mod error;
pub mod protocol;
pub mod pubkey;

pub use error::{ErrorKind, MuxError};
pub use protocol::{MethodName, Notification, Request, Response};
pub use pubkey::{ClientPubkey, ServicePubkey};
