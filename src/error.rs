use thiserror::Error;

/// Malformed wire data. Connections that hit this close silently, per
/// the server's error handling policy — no reply is sent back.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol error: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("invalid RDB header")]
    BadHeader,
    #[error("unexpected end of RDB file")]
    UnexpectedEof,
    #[error("unsupported RDB encoding byte 0x{0:02x}")]
    UnsupportedType(u8),
    #[error("io error reading RDB file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to a client as a RESP error reply. The `Display`
/// impl already includes whatever prefix real clients expect
/// (`ERR`, `WRONGTYPE`, ...) so callers can hand the rendered string
/// straight to `Reply::Error`.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    #[error("ERR Unsupported command: {0}")]
    Unsupported(String),
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR {0}")]
    Stream(String),
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("handshake with master failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
