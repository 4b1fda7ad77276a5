//! Trade execution and risk guard library.
//!
//! - [`execution`]: smart order placement over a [`exchanges::BaseExecutor`]
//! - [`risk`]: consecutive-loss pause, position throttle and risk manager agent
//! - [`storage`]: key-value stores backing the risk state

pub mod config;
pub mod domain;
pub mod exchanges;
pub mod execution;
pub mod risk;
pub mod storage;
