//! Opcode tables.
//!
//! The transport encodes messages; the opcodes are kept here so logs and the
//! simulated devices agree on what a message is called on the air.

/// Configuration model opcodes.
pub mod config {
    pub const APPKEY_ADD: u32 = 0x00;
    pub const APPKEY_UPDATE: u32 = 0x01;
    pub const COMPOSITION_DATA_STATUS: u32 = 0x02;
    pub const MODEL_PUBLICATION_SET: u32 = 0x03;
    pub const APPKEY_STATUS: u32 = 0x8003;
    pub const COMPOSITION_DATA_GET: u32 = 0x8008;
    pub const BEACON_SET: u32 = 0x800A;
    pub const BEACON_STATUS: u32 = 0x800B;
    pub const DEFAULT_TTL_SET: u32 = 0x800D;
    pub const DEFAULT_TTL_STATUS: u32 = 0x800E;
    pub const FRIEND_SET: u32 = 0x8010;
    pub const FRIEND_STATUS: u32 = 0x8011;
    pub const GATT_PROXY_SET: u32 = 0x8013;
    pub const GATT_PROXY_STATUS: u32 = 0x8014;
    pub const KEY_REFRESH_PHASE_SET: u32 = 0x8016;
    pub const KEY_REFRESH_PHASE_STATUS: u32 = 0x8017;
    pub const MODEL_PUBLICATION_STATUS: u32 = 0x8019;
    pub const MODEL_SUBSCRIPTION_ADD: u32 = 0x801B;
    pub const MODEL_SUBSCRIPTION_DELETE: u32 = 0x801C;
    pub const MODEL_SUBSCRIPTION_DELETE_ALL: u32 = 0x801D;
    pub const MODEL_SUBSCRIPTION_STATUS: u32 = 0x801F;
    pub const NETWORK_TRANSMIT_SET: u32 = 0x8024;
    pub const NETWORK_TRANSMIT_STATUS: u32 = 0x8025;
    pub const RELAY_SET: u32 = 0x8027;
    pub const RELAY_STATUS: u32 = 0x8028;
    pub const MODEL_APP_BIND: u32 = 0x803D;
    pub const MODEL_APP_STATUS: u32 = 0x803E;
    pub const NETKEY_ADD: u32 = 0x8040;
    pub const NETKEY_STATUS: u32 = 0x8044;
    pub const NETKEY_UPDATE: u32 = 0x8045;
    pub const NODE_RESET: u32 = 0x8049;
    pub const NODE_RESET_STATUS: u32 = 0x804A;
}

/// Proxy configuration opcodes.
pub mod proxy {
    pub const SET_FILTER_TYPE: u8 = 0x00;
    pub const ADD_ADDRESSES: u8 = 0x01;
    pub const REMOVE_ADDRESSES: u8 = 0x02;
    pub const FILTER_STATUS: u8 = 0x03;
}

/// Foundation and application model opcodes.
pub mod model {
    pub const HEALTH_ATTENTION_SET: u32 = 0x8005;
    pub const HEALTH_ATTENTION_STATUS: u32 = 0x8007;

    pub const GENERIC_ONOFF_GET: u32 = 0x8201;
    pub const GENERIC_ONOFF_SET: u32 = 0x8202;
    pub const GENERIC_ONOFF_STATUS: u32 = 0x8204;
    pub const GENERIC_LEVEL_GET: u32 = 0x8205;
    pub const GENERIC_LEVEL_SET: u32 = 0x8206;
    pub const GENERIC_LEVEL_STATUS: u32 = 0x8208;

    pub const SENSOR_DESCRIPTOR_GET: u32 = 0x8230;
    pub const SENSOR_DESCRIPTOR_STATUS: u32 = 0x51;
    pub const SENSOR_GET: u32 = 0x8231;
    pub const SENSOR_STATUS: u32 = 0x52;
    pub const SENSOR_CADENCE_GET: u32 = 0x8234;
    pub const SENSOR_CADENCE_STATUS: u32 = 0x57;
    pub const SENSOR_SETTINGS_GET: u32 = 0x8235;
    pub const SENSOR_SETTINGS_STATUS: u32 = 0x58;

    pub const LIGHT_LIGHTNESS_GET: u32 = 0x824B;
    pub const LIGHT_LIGHTNESS_SET: u32 = 0x824C;
    pub const LIGHT_LIGHTNESS_STATUS: u32 = 0x824E;
    pub const LIGHT_CTL_GET: u32 = 0x825D;
    pub const LIGHT_CTL_SET: u32 = 0x825E;
    pub const LIGHT_CTL_STATUS: u32 = 0x8260;
    pub const LIGHT_HSL_GET: u32 = 0x826D;
    pub const LIGHT_HSL_SET: u32 = 0x8276;
    pub const LIGHT_HSL_STATUS: u32 = 0x8278;
}

/// BLOB transfer (large object / firmware image) opcodes and limits.
///
/// Only the constants are defined; the transfer procedure is handled outside
/// this client.
pub mod blob {
    pub const TRANSFER_GET: u32 = 0x8300;
    pub const TRANSFER_START: u32 = 0x8301;
    pub const TRANSFER_CANCEL: u32 = 0x8302;
    pub const TRANSFER_STATUS: u32 = 0x8303;
    pub const BLOCK_START: u32 = 0x8305;
    pub const BLOCK_GET: u32 = 0x8307;
    pub const BLOCK_STATUS: u32 = 0x7E;
    pub const CHUNK_TRANSFER: u32 = 0x7D;
    pub const PARTIAL_BLOCK_REPORT: u32 = 0x7C;
    pub const INFORMATION_GET: u32 = 0x830A;
    pub const INFORMATION_STATUS: u32 = 0x830B;

    /// BLOB Transfer Server model id.
    pub const TRANSFER_SERVER_MODEL: u16 = 0x1400;
    /// BLOB Transfer Client model id.
    pub const TRANSFER_CLIENT_MODEL: u16 = 0x1401;

    /// Smallest block size, as log2 of bytes.
    pub const BLOCK_SIZE_LOG_MIN: u8 = 0x06;
    /// Largest block size, as log2 of bytes.
    pub const BLOCK_SIZE_LOG_MAX: u8 = 0x20;
    /// Largest number of chunks in a block.
    pub const MAX_CHUNKS: u16 = 0x0040;
    /// Largest chunk payload in bytes.
    pub const MAX_CHUNK_SIZE: u16 = 241;

    /// Push transfer mode.
    pub const MODE_PUSH: u8 = 0x01;
    /// Pull transfer mode.
    pub const MODE_PULL: u8 = 0x02;
}
