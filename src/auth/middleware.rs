//! 操作人中间件

use crate::error::AppError;
use axum::{
    extract::{FromRequestParts, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// 网关注入的用户标识请求头
pub const ACTOR_HEADER: &str = "x-user-id";

/// 操作人上下文（附加到请求扩展）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorContext {
    pub user_id: Uuid,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 ActorContext
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        if let Some(actor) = parts.extensions.get::<ActorContext>() {
            return Ok(*actor);
        }

        // 未经过中间件的路由直接读取请求头
        extract_actor_id(&parts.headers).map(|user_id| ActorContext { user_id })
    }
}

/// 从请求头提取操作人 ID
pub fn extract_actor_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or(AppError::Unauthorized)
}

/// 操作人中间件 - 必须携带有效的用户标识
pub async fn actor_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user_id = extract_actor_id(req.headers())?;

    tracing::Span::current().record("user_id", tracing::field::display(user_id));
    req.extensions_mut().insert(ActorContext { user_id });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_actor_valid() {
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, user_id.to_string().parse().unwrap());

        assert_eq!(extract_actor_id(&headers).unwrap(), user_id);
    }

    #[test]
    fn test_extract_actor_missing() {
        let headers = HeaderMap::new();
        assert!(matches!(extract_actor_id(&headers), Err(AppError::Unauthorized)));
    }

    #[test]
    fn test_extract_actor_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, "not-a-uuid".parse().unwrap());

        assert!(extract_actor_id(&headers).is_err());
    }
}
