//! 配置管理
//!
//! 配置按 默认值 -> TOML文件 -> `SCHEDULER_` 环境变量 的顺序叠加，
//! 每个配置段都提供 `validate()`，加载完成后统一校验。

pub mod models;


pub use models::*;
