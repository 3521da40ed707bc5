//! Centralized logging configuration for the interpreter.
//!
//! Every component logs through [`log()`] with a [`LogCategory`] and a
//! [`LogLevel`]. Whether a message is produced is decided by the global
//! [`LogConfig`], which holds one level per category and a global fallback.
//! Messages that pass the filter are handed to the `log` crate facade with the
//! target `x86emu::<category>`, so any `log` backend (the CLI installs
//! `env_logger`) decides where they end up.
//!
//! # Usage
//!
//! ```rust
//! use x86emu_core::logging::{log, LogCategory, LogLevel};
//!
//! // The closure only runs when the category is enabled at Debug or above.
//! log(LogCategory::Cpu, LogLevel::Debug, || {
//!     format!("HLT at EIP={:08X}", 0x1234)
//! });
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }

    /// The matching `log` crate level, `None` for `Off`
    pub fn to_facade(self) -> Option<::log::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(::log::Level::Error),
            LogLevel::Warn => Some(::log::Level::Warn),
            LogLevel::Info => Some(::log::Level::Info),
            LogLevel::Debug => Some(::log::Level::Debug),
            LogLevel::Trace => Some(::log::Level::Trace),
        }
    }

    /// The matching `log` crate filter, used by frontends to configure their backend
    pub fn to_filter(self) -> ::log::LevelFilter {
        match self.to_facade() {
            Some(level) => level.to_level_filter(),
            None => ::log::LevelFilter::Off,
        }
    }
}

/// Log category for the interpreter's components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction fetch, decode and execution
    Cpu,
    /// Memory store accesses and faults
    Memory,
    /// `int 0x80` system calls
    Syscall,
    /// Binary image loading
    Loader,
    /// Unimplemented opcodes, interrupts and syscalls
    Stubs,
}

impl LogCategory {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            LogCategory::Cpu => 0,
            LogCategory::Memory => 1,
            LogCategory::Syscall => 2,
            LogCategory::Loader => 3,
            LogCategory::Stubs => 4,
        }
    }

    /// Target string used when forwarding to the `log` facade
    pub fn target(self) -> &'static str {
        match self {
            LogCategory::Cpu => "x86emu::cpu",
            LogCategory::Memory => "x86emu::memory",
            LogCategory::Syscall => "x86emu::syscall",
            LogCategory::Loader => "x86emu::loader",
            LogCategory::Stubs => "x86emu::stubs",
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    /// Global log level (applies to all categories unless overridden)
    global_level: AtomicU8,
    /// Per-category overrides, `Off` meaning "use the global level"
    category_levels: [AtomicU8; LogCategory::COUNT],
}

impl LogConfig {
    /// Create a new LogConfig with all logging disabled
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: [
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
                AtomicU8::new(LogLevel::Off as u8),
            ],
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Set log level for a specific category
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    /// Get log level for a specific category
    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// Check if a message should be logged for the given category and level
    ///
    /// A category with its own level uses it; otherwise the global level applies.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for slot in &self.category_levels {
            slot.store(LogLevel::Off as u8, Ordering::Relaxed);
        }
    }

    /// The most verbose level any category can currently produce
    pub fn max_level(&self) -> LogLevel {
        self.category_levels
            .iter()
            .map(|slot| LogLevel::from_u8(slot.load(Ordering::Relaxed)))
            .fold(self.get_global_level(), Ord::max)
    }
}

/// Log a message with the specified category and level
///
/// The message is lazily evaluated via a closure, so formatting only happens
/// when logging is enabled for the given category and level.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    if !LogConfig::global().should_log(category, level) {
        return;
    }
    if let Some(facade_level) = level.to_facade() {
        ::log::log!(target: category.target(), facade_level, "{}", message_fn());
    }
}
