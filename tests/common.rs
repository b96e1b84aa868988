//! Common utilities for tests
#![allow(unused)]

use std::sync::Arc;

use nanofs::{FileSystem, RamDisk};

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// Provides a macro for logging messages during tests.
/// e.g. log!("placeholder") -> println!("[test] placeholder");
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// A freshly formatted filesystem on a RAM disk.
pub fn fresh_fs() -> FileSystem<RamDisk> {
    FileSystem::format(Arc::new(RamDisk::new()), "test").unwrap()
}

/// Deterministic, non-repeating-per-block test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 64) as u8).collect()
}
