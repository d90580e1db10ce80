//! 非营利组织资料中心
//! 审计日志、基于角色的访问控制、资料分析与表单自动保存

pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
