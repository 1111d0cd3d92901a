//! 仓储实现
//!
//! 目前提供内存实现，供单进程部署和测试使用。

pub mod memory;
