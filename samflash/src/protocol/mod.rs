//! Wire protocols.

pub mod crc;
pub mod samba;
pub mod xmodem;

pub use samba::{SamBaSession, SessionConfig, SessionState};
pub use xmodem::{XmodemConfig, XmodemTransfer};
