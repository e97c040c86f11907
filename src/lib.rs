//! 作业许可证审批引擎
//! 角色解析、逐角色审批记录、聚合状态推导与延期审批

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
