//! Common functionality for the ratesim tariff engine.
#![warn(missing_docs)]
pub mod aggregate;
pub mod alignment;
pub mod billing;
pub mod calibration;
pub mod cli;
pub mod customer;
pub mod diagnostics;
pub mod id;
pub mod input;
pub mod load;
pub mod log;
pub mod marginal_cost;
pub mod model;
pub mod output;
pub mod residual;
pub mod scenario;
pub mod schedule;
pub mod settings;
pub mod tariff;
pub mod timeline;
pub mod units;

#[cfg(test)]
mod fixture;
