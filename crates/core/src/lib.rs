//! Core interpreter primitives for 32-bit x86 guest programs.
//!
//! [`cpu_i386`] holds the register file, addressing, operand access,
//! dispatch engine and the `int 0x80` bridge. [`logging`] is the
//! category/level switchboard every component reports through.

pub mod cpu_i386;
pub mod logging;
