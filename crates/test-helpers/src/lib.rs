//! Test helpers shared by the client and simulation crates.
//!
//! - [`composition`]: composition data of typical devices
//! - [`replies`]: what a well-behaved Configuration Server answers

pub mod composition;
pub mod replies;

pub use composition::{
    lamp_composition, provisioner_composition, relay_lamp_composition, sensor_composition,
    switch_composition, vendor_composition,
};
pub use meshctl_types::test_utils::{test_db, test_key, test_node, test_uuid, TEST_PROVISIONER};
pub use replies::{success_reply, composition_reply};
