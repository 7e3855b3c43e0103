//! Caller identity taken from gateway-set headers.
//!
//! Authentication happens upstream. The gateway forwards the user id in
//! `x-user-id` and the role in `x-user-role`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn from_parts(parts: &Parts) -> Result<Self, ApiError> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))?;

        let role = match parts.headers.get(USER_ROLE_HEADER).map(|v| v.to_str()) {
            Some(Ok(role)) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        };
        Ok(Self { user_id, role })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_parts(parts)
    }
}

/// A caller with the admin role. Anyone else gets 403.
#[derive(Debug, Clone, Copy)]
pub struct Admin(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_parts(parts)?;
        if !caller.is_admin() {
            tracing::warn!(user_id = %caller.user_id, path = %parts.uri.path(), "admin route refused");
            return Err(ApiError::Forbidden("admin role required".into()));
        }
        Ok(Admin(caller))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/orders");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_user_and_role() {
        let user_id = UserId::new();
        let caller = Caller::from_parts(&parts(&[
            (USER_ID_HEADER, &user_id.to_string()),
            (USER_ROLE_HEADER, "ADMIN"),
        ]))
        .unwrap();
        assert_eq!(caller.user_id, user_id);
        assert!(caller.is_admin());
    }

    #[test]
    fn role_defaults_to_customer() {
        let caller =
            Caller::from_parts(&parts(&[(USER_ID_HEADER, &UserId::new().to_string())])).unwrap();
        assert_eq!(caller.role, Role::Customer);
    }

    #[test]
    fn missing_or_malformed_id_is_rejected() {
        assert!(matches!(
            Caller::from_parts(&parts(&[])),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            Caller::from_parts(&parts(&[(USER_ID_HEADER, "not-a-uuid")])),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn admin_extractor_refuses_customers() {
        let mut customer = parts(&[(USER_ID_HEADER, &UserId::new().to_string())]);
        let result = Admin::from_request_parts(&mut customer, &()).await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }
}
