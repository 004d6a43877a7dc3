//! A just-in-time compiler plugin for the AMX scripting virtual machine.
//!
//! Translates AMX bytecode into 32-bit x86 on first call, so publics run
//! as native code instead of going through the host's interpreter. The
//! crate builds as a host plug-in (`cdylib`); the library surface exists
//! for embedding and for the test suite.

pub mod amx;
pub mod config;
pub mod hook;
pub mod jit;
pub mod plugin;

pub use amx::{Amx, AmxError, AmxHeader, AmxImage, Cell, Ucell};
pub use config::{JitOptions, ServerConfig};
pub use jit::{Jit, JitError};
