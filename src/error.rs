use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not initialized")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("out of bounds: offset {offset} + len {len} > {limit}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    #[error("buffer overflow: {needed} bytes needed, {available} available")]
    Overflow { needed: usize, available: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("table full")]
    TableFull,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("port {0} is down")]
    PortDown(u16),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("header error: {0}")]
    HeaderError(String),

    #[error("checksum mismatch")]
    ChecksumError,

    #[error("TTL exceeded")]
    TtlExceeded,

    #[error("fragmentation needed but DF set")]
    FragmentationNeeded,

    #[error("fragment reassembly timed out")]
    ReassemblyTimeout,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
