/// Login, registration and the wire types they use.
///
/// Both flows end the same way: the access token is written to the credential
/// store and read back before anything is declared successful, then the
/// identity behind the token is fetched so the caller gets a ready-to-use
/// `AuthContext`.
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::credentials::{CredentialStore, store_verified};
use crate::error::{AuthError, ErrorKind, GatewayError};
use crate::session::{AuthContext, Identity, IdentityProvider};

pub const MIN_PASSWORD_LEN: usize = 6;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub user_name: String,
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    /// The identifier may be an email or a username. For an email the
    /// username is taken from the local part; for a username the email is
    /// left empty and the server looks the user up by name.
    pub fn from_identifier(identifier: &str, password: &str) -> Self {
        let identifier = identifier.trim();
        if looks_like_email(identifier) {
            let local = identifier.split('@').next().unwrap_or(identifier);
            Self {
                user_name: local.to_string(),
                email: identifier.to_string(),
                password: password.to_string(),
            }
        } else {
            Self {
                user_name: identifier.to_string(),
                email: String::new(),
                password: password.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequest {
    pub user_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredUser {
    #[serde(deserialize_with = "crate::task::id_from_string_or_number")]
    pub id: String,
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Unauthenticated auth endpoints.
pub trait AuthApi: Send + Sync + 'static {
    fn login(
        &self,
        req: &LoginRequest,
    ) -> impl Future<Output = Result<TokenResponse, GatewayError>> + Send;

    fn register(
        &self,
        req: &RegisterRequest,
    ) -> impl Future<Output = Result<RegisteredUser, GatewayError>> + Send;
}

/// Outcome of a successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub identity: Identity,
    pub auth: AuthContext,
}

// ── Flows ─────────────────────────────────────────────────────────────────────

pub async fn login<A>(
    api: &A,
    store: &dyn CredentialStore,
    identifier: &str,
    password: &str,
) -> Result<SignedIn, AuthError>
where
    A: AuthApi + IdentityProvider,
{
    let req = LoginRequest::from_identifier(identifier, password);
    let token = api.login(&req).await.map_err(|e| AuthError::Rejected {
        message: login_message(&e),
        source: e,
    })?;
    finish_sign_in(api, store, token).await
}

pub async fn register<A>(
    api: &A,
    store: &dyn CredentialStore,
    user_name: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<SignedIn, AuthError>
where
    A: AuthApi + IdentityProvider,
{
    if password != confirm_password {
        return Err(AuthError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }

    let req = RegisterRequest {
        user_name: user_name.trim().to_string(),
        email: email.trim().to_string(),
        password: password.to_string(),
    };
    let user = api.register(&req).await.map_err(|e| AuthError::Rejected {
        message: register_message(&e),
        source: e,
    })?;
    info!(user = %user.id, "registered");

    let login = LoginRequest {
        user_name: req.user_name,
        email: req.email,
        password: req.password,
    };
    let token = api.login(&login).await.map_err(AuthError::LoginAfterRegister)?;
    finish_sign_in(api, store, token).await
}

async fn finish_sign_in<A>(
    api: &A,
    store: &dyn CredentialStore,
    token: TokenResponse,
) -> Result<SignedIn, AuthError>
where
    A: IdentityProvider,
{
    let token = token.access_token;
    if token.trim().is_empty() {
        return Err(AuthError::EmptyToken);
    }
    store_verified(store, &token).map_err(|e| {
        warn!(error = %e, "credential not durable after login");
        AuthError::NotDurable(e)
    })?;

    let identity = api.identify(&token).await.map_err(|e| AuthError::Rejected {
        message: e.user_message(),
        source: e,
    })?;
    info!(user = %identity.id, "signed in");
    Ok(SignedIn {
        auth: AuthContext {
            user_id: identity.id.clone(),
            token,
        },
        identity,
    })
}

// ── Messages ──────────────────────────────────────────────────────────────────

pub fn login_message(e: &GatewayError) -> String {
    match e.kind {
        ErrorKind::Unauthorized => "Invalid email or password".to_string(),
        _ => e.user_message(),
    }
}

pub fn register_message(e: &GatewayError) -> String {
    match e.kind {
        ErrorKind::Conflict => "A user with this email already exists".to_string(),
        ErrorKind::Validation => "Invalid input data. Please check your information.".to_string(),
        _ => e.user_message(),
    }
}

/// `local@domain.tld` with no whitespace anywhere.
pub fn looks_like_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::error::CredentialError;
    use std::sync::Mutex;

    struct FakeAuth {
        login: Result<TokenResponse, GatewayError>,
        register: Result<RegisteredUser, GatewayError>,
        logins: Mutex<Vec<LoginRequest>>,
    }

    impl FakeAuth {
        fn accepting(token: &str) -> Self {
            Self {
                login: Ok(TokenResponse {
                    access_token: token.to_string(),
                    token_type: "bearer".into(),
                }),
                register: Ok(RegisteredUser {
                    id: "u1".into(),
                    user_name: "alice".into(),
                    email: "alice@example.com".into(),
                    created_at: None,
                }),
                logins: Mutex::new(Vec::new()),
            }
        }
    }

    impl AuthApi for FakeAuth {
        async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, GatewayError> {
            self.logins.lock().unwrap().push(req.clone());
            self.login.clone()
        }

        async fn register(&self, _req: &RegisterRequest) -> Result<RegisteredUser, GatewayError> {
            self.register.clone()
        }
    }

    impl IdentityProvider for FakeAuth {
        async fn identify(&self, _token: &str) -> Result<Identity, GatewayError> {
            Ok(Identity {
                id: "u1".into(),
                user_name: "alice".into(),
                email: "alice@example.com".into(),
            })
        }
    }

    struct ForgetfulStore;

    impl CredentialStore for ForgetfulStore {
        fn get(&self) -> Result<Option<String>, CredentialError> {
            Ok(None)
        }
        fn set(&self, _token: &str) -> Result<(), CredentialError> {
            Ok(())
        }
        fn clear(&self) -> Result<(), CredentialError> {
            Ok(())
        }
    }

    #[test]
    fn test_email_detection() {
        assert!(looks_like_email("alice@example.com"));
        assert!(!looks_like_email("alice"));
        assert!(!looks_like_email("alice@example"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a b@example.com"));
        assert!(!looks_like_email("a@b@example.com"));
    }

    #[test]
    fn test_login_request_from_email() {
        let req = LoginRequest::from_identifier("alice@example.com", "pw");
        assert_eq!(req.user_name, "alice");
        assert_eq!(req.email, "alice@example.com");
    }

    #[test]
    fn test_login_request_from_username() {
        let req = LoginRequest::from_identifier("alice", "pw");
        assert_eq!(req.user_name, "alice");
        assert_eq!(req.email, "");
    }

    #[test]
    fn test_messages_by_kind() {
        let unauthorized = GatewayError::from_status(401, "");
        assert_eq!(login_message(&unauthorized), "Invalid email or password");

        let conflict = GatewayError::from_status(409, "");
        assert_eq!(register_message(&conflict), "A user with this email already exists");

        let invalid = GatewayError::from_status(422, "");
        assert_eq!(
            register_message(&invalid),
            "Invalid input data. Please check your information."
        );

        let detailed = GatewayError::from_status(400, r#"{"detail":"Username taken"}"#);
        assert_eq!(login_message(&detailed), "Username taken");
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let api = FakeAuth::accepting("tok");
        let store = MemoryCredentialStore::default();
        let signed_in = login(&api, &store, "alice@example.com", "secret").await.unwrap();
        assert_eq!(signed_in.auth.user_id, "u1");
        assert_eq!(signed_in.auth.token, "tok");
        assert_eq!(store.get().unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_login_fails_when_credential_not_durable() {
        let api = FakeAuth::accepting("tok");
        let err = login(&api, &ForgetfulStore, "alice", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::NotDurable(_)));
    }

    #[tokio::test]
    async fn test_login_rejects_empty_token() {
        let api = FakeAuth::accepting("");
        let store = MemoryCredentialStore::default();
        let err = login(&api, &store, "alice", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyToken));
        assert_eq!(store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_bad_password_message() {
        let mut api = FakeAuth::accepting("tok");
        api.login = Err(GatewayError::from_status(401, ""));
        let store = MemoryCredentialStore::default();
        let err = login(&api, &store, "alice", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn test_register_local_checks_skip_network() {
        let api = FakeAuth::accepting("tok");
        let store = MemoryCredentialStore::default();

        let err = register(&api, &store, "alice", "a@b.co", "secret", "secreT")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));

        let err = register(&api, &store, "alice", "a@b.co", "abc", "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordTooShort));
        assert!(api.logins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let api = FakeAuth::accepting("tok");
        let store = MemoryCredentialStore::default();
        let signed_in = register(&api, &store, "alice", "alice@example.com", "secret", "secret")
            .await
            .unwrap();
        assert_eq!(signed_in.identity.user_name, "alice");
        assert_eq!(store.get().unwrap().as_deref(), Some("tok"));

        let logins = api.logins.lock().unwrap();
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].user_name, "alice");
        assert_eq!(logins[0].email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_register_conflict_message() {
        let mut api = FakeAuth::accepting("tok");
        api.register = Err(GatewayError::from_status(409, ""));
        let store = MemoryCredentialStore::default();
        let err = register(&api, &store, "alice", "alice@example.com", "secret", "secret")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "A user with this email already exists");
    }
}
