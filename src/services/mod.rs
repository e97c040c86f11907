//! Business logic services layer

pub mod extension_service;
pub mod ledger;
pub mod permit_service;
pub mod role_resolver;
pub mod status;

pub use extension_service::ExtensionService;
pub use permit_service::{ConsistencyReport, PermitService};
pub use role_resolver::RoleResolver;
