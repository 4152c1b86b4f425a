//! CLI 명령 구현.

pub mod config;
pub mod simulate;
