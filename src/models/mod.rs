//! 数据模型模块
//! 许可证、审批记录、延期申请与站点角色分配

pub mod approval;
pub mod extension;
pub mod permit;
pub mod site;
