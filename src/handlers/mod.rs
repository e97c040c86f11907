//! HTTP 处理器模块

pub mod extension;
pub mod health;
pub mod permit;
