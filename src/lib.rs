//! OpenFlow 1.0 controller logic: a MAC-learning switch paired with a per-switch firewall.
//!
//! The runtime that owns switch connections drives a [`controller::Controller`] through the
//! [`ofp_controller::OfpController`] trait. Each connecting switch gets a
//! [`learning_switch::LearningSwitch`] and a [`firewall::Firewall`]; every firewall is
//! appended to a shared [`firewall::FirewallRegistry`] so rules can be fanned out to all
//! switches. Operators drive the firewalls through [`console`].

#[macro_use]
extern crate log;

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod firewall;
pub mod learning_switch;
pub mod ofp_controller;
pub mod openflow0x01;
pub mod packet;

pub use error::{Error, Result};
