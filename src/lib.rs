//! Make Controller field toolkit.
//!
//! Two engines live here: the OSC message codec used to talk to a running
//! board (over USB-CDC, serial or UDP), and the SAM-BA flash upload engine
//! that programs a new firmware image through the chip's monitor mode.

pub mod batch;
pub mod chip;
pub mod clock;
pub mod loader;
pub mod operation;
pub mod osc;
pub mod samba;
pub mod session;
pub mod targets;
pub mod transport;
pub mod upload;
