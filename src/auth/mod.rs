//! Credential stores: session tokens and one-time codes.

pub mod otp;
pub mod sessions;
pub mod token;

pub use otp::OtpStore;
pub use sessions::{Session, SessionStore};
pub use token::{Claims, TokenKind};
