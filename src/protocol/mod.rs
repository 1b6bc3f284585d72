//! Binary wire protocol shared by the server and the client.
//!
//! Every message travels in one frame:
//!
//! ```text
//! +----------------+--------+-----------------+
//! | length: u32 BE | tag u8 | payload         |
//! +----------------+--------+-----------------+
//!                  |<------- length -------->|
//! ```
//!
//! Integers are big-endian. Strings are a `u16` byte length followed by UTF-8
//! bytes. Byte strings are an `i32` length followed by raw bytes; a length of
//! `-1` means "absent" where a value is optional.
//!
//! | Tag | Message |
//! |-----|---------|
//! | 1 | `PutRequest` |
//! | 2 | `GetRequest` |
//! | 3 | `MultiPutRequest` |
//! | 4 | `MultiGetRequest` |
//! | 5 | `GetWhenRequest` |
//! | 6 | `PutResponse` |
//! | 7 | `GetResponse` |
//! | 8 | `MultiGetResponse` |
//! | 9 | `AuthRequest` |
//! | 10 | `AuthResponse` |
//! | 11 | `ErrorResponse` |

mod codec;
mod error;
mod message;

pub(crate) use codec::check_frame_length;
pub use codec::{decode, encode, frame, read_frame, write_frame, FRAME_HEADER_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{AuthStatus, Message, RequestId};

/// Default upper bound on a frame's length (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
