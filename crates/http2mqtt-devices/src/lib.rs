//! Device families supported by the `http2mqtt` bridge.
//!
//! - [`mystrom::MyStromSwitchClient`] drives myStrom WiFi Switches.
//! - [`shelly::ShellySwitchClient`] drives Shelly 1 and Shelly 1PM relays.
//! - [`edimax::EdimaxPlugClient`] drives Edimax smart plugs.
//! - [`buttons::ButtonReceiver`] receives the actions of myStrom WiFi
//!   Buttons and republishes them.
//!
//! Switch clients implement [`http2mqtt::device::SwitchClient`], so they are
//! driven by a [`http2mqtt::driver::SwitchDriver`]. Every transport, status
//! or decoding error of a device request is reported as a device error.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod http;

pub mod buttons;
/// Edimax smart plug client.
pub mod edimax;
/// myStrom WiFi Switch client.
pub mod mystrom;
/// Shelly relay client.
pub mod shelly;

pub use http::Credentials;
