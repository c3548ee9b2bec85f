//! Terminal emulator identity and OS-level activation

pub mod activate;
pub mod profile;

pub use activate::activate_terminal;
pub use profile::{resolve_terminal_profile, ResolveInput, TerminalProfile, TerminalSource};
