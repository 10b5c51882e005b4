//! Acquisition daemon wire protocol constants.
//!
//! Every packet on the daemon link starts with a one-byte type from one
//! of these tables. Integers are little-endian throughout; see the crate
//! docs for per-packet payload layouts.

/// Client→daemon packet types.
pub mod to_daemon {
    pub const HELLO: u8 = 0;
    pub const PING: u8 = 1;
    /// Ask for a fresh announcement/value pass over every realtime stream.
    pub const RESEND_REALTIME: u8 = 2;
    pub const START_ARCHIVE_READ: u8 = 3;
    pub const ABORT_ARCHIVE_READ: u8 = 4;
    pub const MESSAGE_LOG: u8 = 5;
    pub const COMMAND: u8 = 6;
    pub const SYSTEM_FLUSH: u8 = 7;
    pub const SET_AVERAGING_TIME: u8 = 8;
    pub const DATA_FLUSH: u8 = 9;
    pub const BYPASS_FLAG_SET: u8 = 10;
    pub const BYPASS_FLAG_CLEAR: u8 = 11;
    pub const BYPASS_FLAGS_CLEAR_ALL: u8 = 12;
    pub const SYSTEM_FLAG_SET: u8 = 13;
    pub const SYSTEM_FLAG_CLEAR: u8 = 14;
    pub const SYSTEM_FLAGS_CLEAR_ALL: u8 = 15;
    pub const RESTART_REQUEST: u8 = 16;
}

/// Daemon→client packet types.
pub mod from_daemon {
    pub const HELLO: u8 = 0;
    pub const PONG: u8 = 1;
    pub const EVENT: u8 = 2;
    pub const AUTOPROBE_STATE: u8 = 3;
    pub const INTERFACE_INFORMATION: u8 = 4;
    pub const INTERFACE_STATE: u8 = 5;
    pub const REALTIME_NAME: u8 = 6;
    pub const REALTIME_VALUE: u8 = 7;
    /// Archive read chunk; a zero-length chunk ends the read.
    pub const ARCHIVE_DATA: u8 = 8;
}
