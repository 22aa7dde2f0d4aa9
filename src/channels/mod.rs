//! Social-platform channels.

pub mod twitter;

pub use twitter::TwitterChannel;
