//! Shared protocol constants for the remcomp framed transport

// Maximum command line the client may send (bytes, no terminator)
pub const MAX_COMMAND_LEN: usize = 200;

// Upper bound for any text frame; guards allocation on garbage headers
pub const MAX_TEXT_FRAME: usize = 64 * 1024;

// Archive/file sizes travel as u32 on the wire
pub const MAX_TRANSFER_SIZE: u64 = u32::MAX as u64;

pub const DEFAULT_ARCHIVE_NAME: &str = "archive";
pub const DEFAULT_CODEC_INDEX: usize = 0;
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_POOL_ROOT: &str = "PoolFolders";
pub const WORKER_DIR_PREFIX: &str = "T";

// Command identifiers (numeric values are part of the wire contract)
pub mod command {
    pub const UNRECOGNIZED: u32 = 0;
    pub const HELP: u32 = 1;
    pub const CONFIGURE_COMPRESSOR: u32 = 2;
    pub const CONFIGURE_NAME: u32 = 3;
    pub const SHOW_CONFIGURATION: u32 = 4;
    pub const SEND: u32 = 5;
    pub const COMPRESS: u32 = 6;
    pub const SHOW_LIST: u32 = 7;
    pub const EMPTY_LIST: u32 = 8;
    pub const QUIT: u32 = 9;
}

/// A compression algorithm supported through tar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    pub name: &'static str,
    /// Extension appended after ".tar." (no leading dot)
    pub extension: &'static str,
    /// Single-letter tar option selecting the compressor
    pub tool_flag: &'static str,
}

/// Ordered codec table. Sessions store an index into it.
pub const CODECS: [Codec; 4] = [
    Codec { name: "gzip", extension: "gz", tool_flag: "z" },
    Codec { name: "bzip2", extension: "bz2", tool_flag: "j" },
    Codec { name: "xz", extension: "xz", tool_flag: "J" },
    Codec { name: "compress", extension: "Z", tool_flag: "Z" },
];

/// Find a codec index by exact (case-sensitive) name.
pub fn codec_index(name: &str) -> Option<usize> {
    CODECS.iter().position(|c| c.name == name)
}

pub fn codec(index: usize) -> &'static Codec {
    CODECS.get(index).unwrap_or(&CODECS[DEFAULT_CODEC_INDEX])
}

/// `<base>.tar.<ext>`
pub fn archive_file_name(base: &str, codec: &Codec) -> String {
    format!("{}.tar.{}", base, codec.extension)
}
