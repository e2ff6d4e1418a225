use std::io;

/// Error taxonomy for the TWK format and its readers/writers.
///
/// Library crates return this type throughout; `twk-cli` converts it to an
/// `anyhow::Error` at the command boundary the way `ancf_cli` wraps
/// `anyhow::Result` around `twk-core`/`twk-import`/`twk-sort` calls today.
#[derive(thiserror::Error, Debug)]
pub enum TwkError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("corrupt TGZF block: {0}")]
    CorruptBlock(String),

    #[error("misaligned stream: payload of {payload_len} bytes is not a multiple of record size {record_size}")]
    MisalignedStream { payload_len: usize, record_size: usize },

    #[error("format error: {0}")]
    FormatError(String),

    #[error("unknown contig: {0}")]
    UnknownContig(String),

    #[error("contigs are not sorted: {prev} came before {current}")]
    ContigNotSorted { prev: String, current: String },

    #[error("positions are not sorted on {contig}: {position} < {previous}")]
    PositionNotSorted { contig: String, position: u32, previous: u32 },

    #[error("invalid state: {0}")]
    StateError(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, TwkError>;
