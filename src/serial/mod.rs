//! Serial command correlation for the pulsed-laser link.
//!
//! The device speaks a fixed-opcode binary protocol with no framing markers
//! and no correlation ids: a request is one opcode byte plus up to two
//! argument bytes, a response is up to two bytes whose meaning is inferred
//! purely from opcode and arrival order. This module owns the opcode table,
//! the transport that moves raw bytes, and the correlation engine that turns
//! the byte stream back into request/response pairs.

pub mod command;
pub mod engine;
pub mod mock;
pub mod transport;
