use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AuthApi, LoginRequest, RegisterRequest, RegisteredUser, TokenResponse};
use crate::error::{ErrorKind, GatewayError};
use crate::gate;
use crate::session::{AuthContext, Identity, IdentityProvider};
use crate::task::{Task, TaskDraft, TaskPatch, is_placeholder_id};

// ── Gateway contract ──────────────────────────────────────────────────────────

/// Remote task operations, scoped by user id and authorised by token.
///
/// None of these retry. `delete` swallows its failure into `false` so the
/// caller decides what a failed delete means for the optimistic overlay.
pub trait TaskGateway: Send + Sync + 'static {
    fn list(
        &self,
        auth: &AuthContext,
    ) -> impl Future<Output = Result<Vec<Task>, GatewayError>> + Send;

    fn create(
        &self,
        auth: &AuthContext,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<Task, GatewayError>> + Send;

    fn update(
        &self,
        auth: &AuthContext,
        id: &str,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, GatewayError>> + Send;

    fn delete(&self, auth: &AuthContext, id: &str) -> impl Future<Output = bool> + Send;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct HttpGateway {
    http: reqwest::Client,
    pub endpoint: String,
}

impl HttpGateway {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("todosync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    /// Send a request and return the raw response if the status is 2xx.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<reqwest::Response, GatewayError> {
        gate::check(path, token)?;

        let url = self.url(path);
        debug!(%method, %url, "gateway request");

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = GatewayError::from_status(status.as_u16(), &text);
            warn!(%method, %url, kind = %err.kind, "gateway request failed");
            return Err(err);
        }
        Ok(resp)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let resp = self.execute(method, path, token, body).await?;
        Ok(resp.json::<T>().await?)
    }
}

fn tasks_path(auth: &AuthContext) -> String {
    format!("/api/{}/tasks", auth.user_id)
}

fn task_path(auth: &AuthContext, id: &str) -> String {
    format!("/api/{}/tasks/{}", auth.user_id, id)
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::new(ErrorKind::Protocol, format!("could not encode body: {e}")))
}

/// Server ids must never collide with the local placeholder namespace.
fn ensure_server_id(task: Task) -> Result<Task, GatewayError> {
    if task.id.is_empty() || is_placeholder_id(&task.id) {
        return Err(GatewayError::new(
            ErrorKind::Protocol,
            format!("server returned reserved or empty task id {:?}", task.id),
        ));
    }
    Ok(task)
}

impl TaskGateway for HttpGateway {
    async fn list(&self, auth: &AuthContext) -> Result<Vec<Task>, GatewayError> {
        let tasks: Vec<Task> = self
            .request(Method::GET, &tasks_path(auth), Some(&auth.token), None)
            .await?;
        tasks.into_iter().map(ensure_server_id).collect()
    }

    async fn create(&self, auth: &AuthContext, draft: &TaskDraft) -> Result<Task, GatewayError> {
        let body = to_body(draft)?;
        let task = self
            .request(Method::POST, &tasks_path(auth), Some(&auth.token), Some(body))
            .await?;
        ensure_server_id(task)
    }

    async fn update(
        &self,
        auth: &AuthContext,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, GatewayError> {
        let body = to_body(patch)?;
        let task = self
            .request(Method::PUT, &task_path(auth, id), Some(&auth.token), Some(body))
            .await?;
        ensure_server_id(task)
    }

    async fn delete(&self, auth: &AuthContext, id: &str) -> bool {
        match self
            .execute(Method::DELETE, &task_path(auth, id), Some(&auth.token), None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(task = %id, error = %e, "delete failed");
                false
            }
        }
    }
}

impl AuthApi for HttpGateway {
    async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, GatewayError> {
        let body = to_body(req)?;
        self.request(Method::POST, "/api/users/login", None, Some(body)).await
    }

    async fn register(&self, req: &RegisterRequest) -> Result<RegisteredUser, GatewayError> {
        let body = to_body(req)?;
        self.request(Method::POST, "/api/users/register", None, Some(body)).await
    }
}

impl IdentityProvider for HttpGateway {
    async fn identify(&self, token: &str) -> Result<Identity, GatewayError> {
        self.request(Method::GET, "/api/users/me", Some(token), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn auth() -> AuthContext {
        AuthContext {
            user_id: "u1".into(),
            token: "tok".into(),
        }
    }

    /// Serve exactly one canned HTTP answer and hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = String::new();
            // Read until the end of the headers plus whatever body came with them
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
                if let Some(head_end) = request.find("\r\n\r\n") {
                    let content_length = request[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (endpoint, handle)
    }

    fn gateway(endpoint: String) -> HttpGateway {
        HttpGateway::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_paths() {
        assert_eq!(tasks_path(&auth()), "/api/u1/tasks");
        assert_eq!(task_path(&auth(), "7"), "/api/u1/tasks/7");
        let gw = gateway("http://localhost:8000/".into());
        assert_eq!(gw.url("/api/u1/tasks"), "http://localhost:8000/api/u1/tasks");
    }

    #[test]
    fn test_ensure_server_id_rejects_placeholder_namespace() {
        let task = Task {
            id: "optimistic-1-1".into(),
            title: "x".into(),
            description: None,
            completed: false,
        };
        let err = ensure_server_id(task).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_list_sends_bearer_token() {
        let (endpoint, server) =
            serve_once("200 OK", r#"[{"id":"1","title":"a","completed":false}]"#).await;
        let tasks = gateway(endpoint).list(&auth()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "1");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/u1/tasks HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn test_create_posts_draft() {
        let (endpoint, server) =
            serve_once("201 Created", r#"{"id":"42","title":"Buy milk","completed":false}"#).await;
        let task = gateway(endpoint)
            .create(&auth(), &TaskDraft::new("Buy milk", None))
            .await
            .unwrap();
        assert_eq!(task.id, "42");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/u1/tasks HTTP/1.1"));
        assert!(request.contains(r#""title":"Buy milk""#));
    }

    #[tokio::test]
    async fn test_update_sends_cleared_description_as_null() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"id":"7","title":"Call","completed":false}"#).await;
        let edited = Task {
            id: "7".into(),
            title: "Call".into(),
            description: None,
            completed: false,
        };
        gateway(endpoint)
            .update(&auth(), "7", &TaskPatch::from_task(&edited))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/u1/tasks/7 HTTP/1.1"));
        assert!(request.contains(r#""description":null"#));
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let (endpoint, _server) = serve_once("401 Unauthorized", r#"{"detail":"bad token"}"#).await;
        let err = gateway(endpoint).list(&auth()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.detail.as_deref(), Some("bad token"));
    }

    #[tokio::test]
    async fn test_delete_failure_becomes_false() {
        let (endpoint, _server) = serve_once("500 Internal Server Error", "").await;
        assert!(!gateway(endpoint).delete(&auth(), "9").await);
    }

    #[tokio::test]
    async fn test_delete_success() {
        let (endpoint, server) = serve_once("204 No Content", "").await;
        assert!(gateway(endpoint).delete(&auth(), "9").await);
        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /api/u1/tasks/9 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_network_failure_kind() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let err = gateway(endpoint).list(&auth()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_network() {
        // Unroutable endpoint: the gate must reject before any connection attempt
        let gw = gateway("http://127.0.0.1:9".into());
        let no_token = AuthContext {
            user_id: "u1".into(),
            token: String::new(),
        };
        let err = gw.list(&no_token).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.message, "Authentication required");
    }
}
