//! 数据模型模块

pub mod analytics;
pub mod audit;
pub mod form;
pub mod role;
