//! Joystick subsystem turning raw samples into direction events
//!
//! One polling loop drives the whole pipeline:
//!
//! 1. [`sensor`] - Raw samples from the I2C unit or a gamepad
//! 2. [`direction`] - Classification into a discrete direction
//! 3. [`stabilizer`] - Debouncing, activity edges and report suppression
//! 4. [`poll_loop`] - The per-tick state machine publishing the results
//! 5. [`controller_handle`] - Device bring-up and lifecycle
//!
//! # Architecture
//!
//! ```text
//! Sensor ──► Classify ──► Stabilize ──► Indicator LED (edges)
//!                                  └──► DirectionReport channel
//! ```
//!
//! The loop runs every 20ms by default and is the only owner of the
//! stabilizer state.

pub mod controller_handle;
pub mod direction;
pub mod poll_loop;
pub mod sensor;
pub mod stabilizer;
