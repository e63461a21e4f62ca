#![forbid(unsafe_code)]

pub mod aggregator;
pub mod bootstrap;
pub mod broker;
pub mod collector;
pub mod config;
pub mod datamodel;
pub mod error;
pub mod exporters;
pub mod parsing;
pub mod publisher;
pub mod retry;
pub mod scheduler;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
