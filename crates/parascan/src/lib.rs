#![doc = include_str!("../README.md")]

mod config;
mod coordinator;
mod error;
mod pool;
mod series;
mod source;
mod stats;
mod sync;
mod task;

pub use crate::config::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::pool::*;
pub use crate::series::*;
pub use crate::source::*;
pub use crate::stats::MergeStats;
pub use crate::sync::*;
