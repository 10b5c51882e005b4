//! Message types on the collector websocket.
//!
//! Every binary websocket message starts with a one-byte type. Uplink
//! types are in [`to_collector`], downlink control types in
//! [`from_collector`]. Integers are little-endian throughout.

/// Message types the relay sends to the collector.
pub mod to_collector {
    /// Batched realtime values; body is a sequence of typed sub-blocks.
    pub const DATA_BLOCK_BEGIN: u8 = 0;
    /// Name announcements for indices referenced by later blocks.
    pub const DEFINE_NAMES: u8 = 1;
    /// One event log record.
    pub const EVENT: u8 = 2;
    /// Autoprobe subsystem state.
    pub const AUTOPROBE_STATE: u8 = 3;
    /// Static description of one acquisition interface.
    pub const INTERFACE_INFORMATION: u8 = 4;
    /// Dynamic state of one acquisition interface.
    pub const INTERFACE_STATE: u8 = 5;
}

/// Sub-block types inside a DATA_BLOCK_BEGIN message.
pub mod block {
    /// Values compressible to a single `f32`.
    pub const FLOATS: u8 = 0;
    /// Arrays whose elements are all reals, as `f32`s.
    pub const FLOAT_ARRAYS: u8 = 1;
    /// Everything else, in full wire encoding.
    pub const VARIANTS: u8 = 2;
    /// Terminates the block.
    pub const FINAL: u8 = 3;
}

/// Control messages the collector sends back down.
pub mod from_collector {
    pub const MESSAGE_LOG: u8 = 0;
    pub const COMMAND: u8 = 1;
    pub const BYPASS_FLAG_SET: u8 = 2;
    pub const BYPASS_FLAG_CLEAR: u8 = 3;
    pub const BYPASS_FLAGS_CLEAR_ALL: u8 = 4;
    pub const SYSTEM_FLAG_SET: u8 = 5;
    pub const SYSTEM_FLAG_CLEAR: u8 = 6;
    pub const SYSTEM_FLAGS_CLEAR_ALL: u8 = 7;
    pub const SYSTEM_FLUSH: u8 = 8;
    pub const RESTART_ACQUISITION: u8 = 9;
}
