//! Monte Carlo return simulation, Sharpe-ratio scoring and portfolio weight
//! allocation, with whole-share quantization of the result.

pub mod allocation;
pub mod benchmark;
pub mod config;
pub mod data;
pub mod error;
pub mod quantize;
pub mod report;
pub mod scoring;
pub mod simulation;
