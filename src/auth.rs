//! Tenancy and caller identity / 租户与调用者身份
//!
//! Single-tenant servers attribute every index to fixed owner and project
//! identifiers. Multi-tenant servers resolve `Authorization: Bearer` tokens
//! through the identity provider and check project membership against the
//! console backend.

use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TenancyConfig;
use crate::error::{Error, Result};
use crate::state::AppState;

pub const SINGLE_TENANT_AUTHZ_ID: &str = "SINGLE_TENANT_AUTHZ_ID";
pub const SINGLE_TENANT_PROJECT_UUID: &str = "SINGLE_TENANT_PROJECT_UUID";

/// Authenticated caller / 已认证的调用者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub authz_id: String,
    /// Forwarded to the console backend / 转发给项目后端
    pub bearer: Option<String>,
}

impl Auth {
    pub fn single_tenant() -> Self {
        Self {
            authz_id: SINGLE_TENANT_AUTHZ_ID.to_string(),
            bearer: None,
        }
    }
}

/// `https://` unless the domain already names a scheme
fn base_url(domain: &str) -> String {
    let domain = domain.trim_end_matches('/');
    if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

struct CachedToken {
    authz_id: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: Option<String>,
}

/// Identity provider client / 身份提供方客户端
pub struct Auth0 {
    base_url: String,
    client: Client,
    ttl: Duration,
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl Auth0 {
    pub fn new(domain: &str, ttl: Duration) -> Self {
        Self {
            base_url: base_url(domain),
            client: Client::new(),
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a bearer token to its subject / 将令牌解析为用户标识
    pub async fn validate_token(&self, token: &str) -> Result<Auth> {
        if let Some(cached) = self.tokens.read().get(token) {
            if cached.expires_at > Instant::now() {
                return Ok(Auth {
                    authz_id: cached.authz_id.clone(),
                    bearer: Some(token.to_string()),
                });
            }
        }

        let response = self
            .client
            .get(format!("{}/userinfo", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::Forbidden("token rejected by identity provider".to_string()));
        }

        let info: UserInfo = response.error_for_status()?.json().await?;
        let authz_id = info
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| Error::Forbidden("token carries no subject".to_string()))?;

        let now = Instant::now();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, cached| cached.expires_at > now);
        tokens.insert(
            token.to_string(),
            CachedToken {
                authz_id: authz_id.clone(),
                expires_at: now + self.ttl,
            },
        );

        tracing::debug!("Token validated for {}", authz_id);
        Ok(Auth {
            authz_id,
            bearer: Some(token.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendProject {
    #[serde(alias = "id")]
    pub uuid: String,
}

/// Console backend client / 项目后端客户端
pub struct Backend {
    base_url: String,
    client: Client,
}

impl Backend {
    pub fn new(domain: &str) -> Self {
        Self {
            base_url: base_url(domain),
            client: Client::new(),
        }
    }

    /// Projects visible to the caller / 调用者可见的项目
    pub async fn get_projects(&self, auth: &Auth) -> Result<Vec<BackendProject>> {
        let bearer = auth.bearer.as_deref().ok_or(Error::MissingBearer)?;
        let projects = self
            .client
            .get(format!("{}/projects", self.base_url))
            .bearer_auth(bearer)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(projects)
    }

    pub async fn ensure_project(&self, auth: &Auth, project_uuid: &str) -> Result<()> {
        let projects = self.get_projects(auth).await?;
        if projects.iter().any(|project| project.uuid == project_uuid) {
            Ok(())
        } else {
            Err(Error::UnknownProject(project_uuid.to_string()))
        }
    }
}

/// Multi-tenant collaborators / 多租户依赖
pub struct Tenancy {
    pub identity: Auth0,
    pub backend: Backend,
}

impl Tenancy {
    /// `None` in single-tenant mode / 单租户模式返回 None
    pub fn from_config(config: &TenancyConfig) -> Result<Option<Self>> {
        if !config.multitenant {
            return Ok(None);
        }

        let auth0_domain = config.auth0_domain.as_deref().ok_or_else(|| {
            Error::Config("multi-tenant mode needs `AUTH0_DOMAIN` (e.g. \"tenant.eu.auth0.com\")".to_string())
        })?;
        let backend_domain = config.backend_domain.as_deref().ok_or_else(|| {
            Error::Config("multi-tenant mode needs `BACKEND_DOMAIN` (e.g. \"backend.example.com\")".to_string())
        })?;

        Ok(Some(Self {
            identity: Auth0::new(auth0_domain, Duration::from_secs(config.token_cache_seconds)),
            backend: Backend::new(backend_domain),
        }))
    }
}

/// Project a management request works on / 解析请求所属项目
pub async fn resolve_project(
    tenancy: Option<&Tenancy>,
    auth: &Auth,
    requested: Option<&str>,
) -> Result<String> {
    let Some(tenancy) = tenancy else {
        return Ok(SINGLE_TENANT_PROJECT_UUID.to_string());
    };

    let project_uuid = requested
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| Error::BadRequest("project_uuid is required".to_string()))?;
    tenancy.backend.ensure_project(auth, project_uuid).await?;
    Ok(project_uuid.to_string())
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::MissingBearer)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(Error::MissingBearer)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(Error::MissingBearer);
    }
    Ok(token)
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        match &state.tenancy {
            None => Ok(Auth::single_tenant()),
            Some(tenancy) => {
                let token = bearer_token(&parts.headers)?;
                tenancy.identity.validate_token(token).await
            }
        }
    }
}
