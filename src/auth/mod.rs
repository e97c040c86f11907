//! Actor identity
//! 身份认证由上游网关完成，这里只读取网关注入的用户标识

pub mod middleware;

pub use middleware::{actor_middleware, extract_actor_id, ActorContext, ACTOR_HEADER};
