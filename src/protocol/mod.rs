//! Protocol module for constructing controller messages.

pub mod packets;

pub use packets::ButtonPacket;
