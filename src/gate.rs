/// Route-level auth gate.
///
/// Mirrors the backend's inbound middleware: everything under `/api` needs a
/// bearer token except the login and registration endpoints. The HTTP gateway
/// runs the same check before sending, so an unauthenticated call to a
/// protected path fails locally instead of round-tripping to a 401.
use crate::error::{ErrorKind, GatewayError};

const PUBLIC_API_PATHS: &[&str] = &["/api/users/login", "/api/users/register"];

pub fn requires_token(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.starts_with("/api") && !PUBLIC_API_PATHS.contains(&path)
}

pub fn check(path: &str, token: Option<&str>) -> Result<(), GatewayError> {
    let has_token = token.is_some_and(|t| !t.trim().is_empty());
    if requires_token(path) && !has_token {
        return Err(GatewayError::new(ErrorKind::Unauthorized, "Authentication required"));
    }
    Ok(())
}
