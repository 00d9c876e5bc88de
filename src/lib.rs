//! MQTT bridge for Heliotherm heat pumps.
//!
//! This bridge polls a serial-connected Heliotherm heat-pump controller once
//! per minute, normalizes the raw register snapshot into a canonical value
//! map, and publishes it to an MQTT broker alongside Home Assistant
//! auto-discovery metadata.
//!
//! # Topics
//!
//! With `N` being the configured topic root:
//!
//! ```text
//! N/state                                      retained "online"/"offline" liveness
//! N/values                                     JSON value map, published each cycle
//! <prefix>/<component>/<node>/<channel>/config retained discovery config per channel
//! ```
//!
//! Where `<component>` is `sensor` or `binary_sensor` and `<channel>` is the
//! stable lowercase slug derived from the channel's display name.

pub mod bridge;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod csv;
pub mod device;
pub mod logging;
pub mod mqtt;
pub mod normalize;
pub mod serial;
pub mod session;
pub mod value;
