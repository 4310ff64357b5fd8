//! The core of a bridge republishing the state of HTTP switches on a
//! message bus.
//!
//! This crate provides APIs to:
//!
//! - Describe a family of switches through the [`device::SwitchClient`]
//!   contract. A client lists the switches, fetches their details and
//!   sensor reports, and changes their relay state.
//! - Publish and receive messages through the [`bus::MessageBus`]
//!   contract.
//! - Drive a family of switches with a [`driver::SwitchDriver`]. The driver
//!   announces new switches, polls their sensors, tracks availability and
//!   relay transitions, averages numeric samples between two publications,
//!   and forwards relay commands to the switches.
//! - Build Home Assistant discovery descriptors.
//!
//! Numeric samples are buffered by a [`aggregator::SensorAggregator`],
//! switch states are kept in a [`states::SwitchStates`] table, and every
//! driver loop is paced by a [`rate_limit::RateLimiter`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Numeric sensor buffers.
pub mod aggregator;
/// Message bus contract.
pub mod bus;
/// Switch client contract.
pub mod device;
/// Switch driver.
pub mod driver;
/// Error handling.
pub mod error;
/// Home Assistant discovery descriptors.
pub mod homeassistant;
/// Rate limiter.
pub mod rate_limit;
/// Sensor model.
pub mod sensor;
/// Switch state table.
pub mod states;

#[cfg(test)]
mod tests;
