/// Error types shared by every module of the client
pub mod error;
