//! Disposable backing services and a shared behavioral suite for
//! exercising link store backends in tests.

pub mod contract;
pub mod dynamodb;
pub mod error;
pub mod redis;

pub use error::{Result, TestInfraError};
