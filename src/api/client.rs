use log::warn;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::api::models::{AuthSession, NewUser, User};
use crate::app::AppState;
use crate::error::{ClientError, Result};

const ERROR_BODY_LIMIT: usize = 512;

/// Per-call credentials. Passed explicitly instead of living in client defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    token: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn require_auth(&self) -> Result<()> {
        if self.is_authenticated() { Ok(()) } else { Err(ClientError::NotAuthenticated) }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(15))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&crate::utils::normalize_url(base_url))?;
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn from_state(state: &AppState) -> Result<Self> {
        let base = state.api_url()?;
        let http = HttpClient::builder().timeout(state.request_timeout()).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve `path` below the base URL, keeping any base path prefix.
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", prefix, path.trim_start_matches('/')));
        url
    }

    fn with_auth(mut req: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        if let Some(t) = ctx.token() {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    fn request(&self, ctx: &RequestContext, method: Method, path: &str) -> RequestBuilder {
        Self::with_auth(self.http.request(method, self.endpoint(path)), ctx)
    }

    async fn read_json(resp: Response) -> Result<Value> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("{} answered 401; token missing or expired", resp.url().path());
            return Err(ClientError::Unauthorized);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ClientError::Status { status: status.as_u16(), body });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub(crate) async fn get_value(&self, ctx: &RequestContext, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self.request(ctx, Method::GET, path).query(query).send().await?;
        Self::read_json(resp).await
    }

    pub(crate) async fn get_one<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        envelope: &str,
    ) -> Result<T> {
        let json = self.get_value(ctx, path, &[]).await?;
        Ok(serde_json::from_value(unwrap_envelope(json, envelope))?)
    }

    pub(crate) async fn get_list<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
        envelope: &str,
    ) -> Result<Vec<T>> {
        let json = self.get_value(ctx, path, query).await?;
        Ok(decode_items(json, envelope))
    }

    pub(crate) async fn send<B, T>(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<&B>,
        envelope: &str,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self.request(ctx, method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let json = Self::read_json(req.send().await?).await?;
        Ok(serde_json::from_value(unwrap_envelope(json, envelope))?)
    }

    /// Like `send` but for endpoints whose response body is irrelevant.
    pub(crate) async fn send_unit<B>(&self, ctx: &RequestContext, method: Method, path: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let mut req = self.request(ctx, method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::read_json(req.send().await?).await.map(|_| ())
    }

    /// Reachability check; returns the HTTP status of the API root.
    pub async fn ping(&self) -> Result<u16> {
        let resp = self.http.get(self.base.clone()).send().await?;
        Ok(resp.status().as_u16())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let body = serde_json::json!({ "email": email.trim(), "password": password });
        self.send(&RequestContext::anonymous(), Method::POST, "auth/login", Some(&body), "")
            .await
    }

    pub async fn register(&self, user: &NewUser) -> Result<AuthSession> {
        self.send(&RequestContext::anonymous(), Method::POST, "auth/register", Some(user), "")
            .await
    }

    pub async fn me(&self, ctx: &RequestContext) -> Result<User> {
        ctx.require_auth()?;
        self.get_one(ctx, "auth/me", "user").await
    }
}

/// Strip a `{"<key>": ...}` or `{"data": ...}` wrapper when present.
pub(crate) fn unwrap_envelope(json: Value, key: &str) -> Value {
    match json {
        Value::Object(mut map) => {
            if !key.is_empty() {
                if let Some(inner) = map.remove(key) {
                    return inner;
                }
            }
            if let Some(inner) = map.remove("data") {
                return unwrap_envelope(inner, key);
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Decode a list response, skipping entries that do not match `T`.
pub(crate) fn decode_items<T: DeserializeOwned>(json: Value, key: &str) -> Vec<T> {
    let items = match unwrap_envelope(json, key) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            warn!("Expected a list under {key:?}, got {}", kind_of(&other));
            Vec::new()
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item) {
            Ok(v) => out.push(v),
            Err(e) => warn!("Skipping malformed {key} entry: {e}"),
        }
    }
    out
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Professional;
    use serde_json::json;

    #[test]
    fn endpoint_keeps_base_path() {
        let client = ApiClient::new("http://localhost:3000/v1/").unwrap();
        assert_eq!(client.endpoint("/professionals").as_str(), "http://localhost:3000/v1/professionals");
        let client = ApiClient::new("api.example.com").unwrap();
        assert_eq!(client.endpoint("api/budgets/request").as_str(), "https://api.example.com/api/budgets/request");
    }

    #[test]
    fn bearer_header_only_with_token() {
        let client = ApiClient::new("http://localhost").unwrap();
        let req = client
            .request(&RequestContext::bearer("abc"), Method::GET, "bookings")
            .build()
            .unwrap();
        assert_eq!(req.headers()["Authorization"], "Bearer abc");
        let req = client
            .request(&RequestContext::anonymous(), Method::GET, "bookings")
            .build()
            .unwrap();
        assert!(req.headers().get("Authorization").is_none());
    }

    #[test]
    fn envelope_variants() {
        assert_eq!(unwrap_envelope(json!({"data": {"budget": {"id": 1}}}), "budget"), json!({"id": 1}));
        assert_eq!(unwrap_envelope(json!({"id": 1}), "budget"), json!({"id": 1}));
        assert_eq!(unwrap_envelope(json!([1, 2]), "items"), json!([1, 2]));
    }

    #[test]
    fn decode_items_skips_malformed() {
        let json = json!({"professionals": [
            {"id": "p1", "name": "Ana"},
            {"name": "missing id"},
            {"id": "p2", "name": "Bia", "rating": 4.5}
        ]});
        let pros: Vec<Professional> = decode_items(json, "professionals");
        assert_eq!(pros.len(), 2);
        assert_eq!(pros[1].rating, Some(4.5));
        let none: Vec<Professional> = decode_items(json!({"message": "ok"}), "professionals");
        assert!(none.is_empty());
    }

    #[test]
    fn me_requires_token() {
        let client = ApiClient::new("http://localhost").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(client.me(&RequestContext::anonymous())).unwrap_err();
        assert!(matches!(err, ClientError::NotAuthenticated));
    }
}
