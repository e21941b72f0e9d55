//! Outbound auth header assembly.
//!
//! On every HTTP-family request the builder produces the full header map:
//! request attribution (`x-request-id`, `x-caller-id`, forwardable
//! headers), the downstream bearer (a cached OAuth access token, refreshed
//! proactively, else the connection's static token), and the short-lived
//! mesh-issued JWT in `x-mesh-token`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use meshmcp_core::context::RequestContext;
use meshmcp_core::model::{Connection, DownstreamToken};
use meshmcp_core::storage::DownstreamTokenStore;
use meshmcp_core::{Error, MeshConfig, Result};
use meshmcp_transport::core::{TransportError, TransportResult};
use meshmcp_transport::headers::{
    AUTHORIZATION, FORWARDABLE_HEADERS, HeaderSnapshot, X_CALLER_ID, X_MESH_TOKEN, X_REQUEST_ID,
};
use meshmcp_transport::middleware::HeaderSource;

/// Lifetime of mesh-issued JWTs
const MESH_TOKEN_TTL_MINUTES: i64 = 5;

/// Claims carried by the mesh-issued JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct MeshTokenClaims {
    /// Subject: the authenticated principal, or the connection itself
    pub sub: String,
    /// End user behind the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// The connection's opaque configuration state
    #[serde(rename = "configurationState", skip_serializing_if = "Option::is_none")]
    pub configuration_state: Option<Map<String, Value>>,
    /// Public URL of the issuing mesh
    #[serde(rename = "meshUrl", skip_serializing_if = "Option::is_none")]
    pub mesh_url: Option<String>,
    /// Connection the token was minted for
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    /// Organization the connection belongs to
    #[serde(rename = "organizationId")]
    pub organization_id: String,
    /// Derived connection permissions: referenced connection id → scopes
    pub permissions: HashMap<String, Vec<String>>,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Builds the outbound header snapshot for one connection under one request.
pub struct HeaderBuilder {
    connection: Connection,
    ctx: RequestContext,
    config: MeshConfig,
    tokens: Arc<dyn DownstreamTokenStore>,
    http: reqwest::Client,
}

impl std::fmt::Debug for HeaderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderBuilder")
            .field("connection_id", &self.connection.id)
            .field("request_id", &self.ctx.request_id)
            .finish()
    }
}

impl HeaderBuilder {
    /// Create a builder for `connection` under `ctx`
    pub fn new(
        connection: Connection,
        ctx: RequestContext,
        config: MeshConfig,
        tokens: Arc<dyn DownstreamTokenStore>,
    ) -> Self {
        Self {
            connection,
            ctx,
            config,
            tokens,
            http: reqwest::Client::new(),
        }
    }

    /// Assemble the current header snapshot.
    pub async fn build(&self) -> Result<HeaderSnapshot> {
        let mut snapshot = HeaderSnapshot::new();

        if let Some(extra) = &self.connection.connection_headers {
            for (name, value) in extra {
                snapshot.set(name, value.clone());
            }
        }

        snapshot.set(X_REQUEST_ID, self.ctx.request_id.clone());
        if let Some(caller) = &self.ctx.caller_connection_id {
            snapshot.set(X_CALLER_ID, caller.clone());
        }
        for name in FORWARDABLE_HEADERS {
            if let Some(value) = self.ctx.metadata(name).and_then(Value::as_str) {
                snapshot.set(*name, value.to_string());
            }
        }

        if let Some(bearer) = self.resolve_bearer().await {
            snapshot.set(AUTHORIZATION, format!("Bearer {bearer}"));
        }

        match self.mint_mesh_token() {
            Ok(Some(token)) => snapshot.set(X_MESH_TOKEN, token),
            Ok(None) => {}
            Err(e) => warn!("Failed to mint mesh token: {e}"),
        }

        Ok(snapshot)
    }

    /// Pick the downstream bearer: a valid cached OAuth access token
    /// (refreshed when stale), else the connection's static token, else
    /// nothing.
    async fn resolve_bearer(&self) -> Option<String> {
        let cached = match self
            .tokens
            .get(&self.connection.id, self.ctx.user_id())
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Token lookup failed: {e}");
                None
            }
        };
        let Some(token) = cached else {
            return self.connection.connection_token.clone();
        };

        let now = Utc::now();
        if !token.is_expired(now) {
            return Some(token.access_token);
        }

        if token.is_refreshable() {
            match self.refresh_token(&token).await {
                Ok(refreshed) => {
                    let access_token = refreshed.access_token.clone();
                    if let Err(e) = self.tokens.upsert(refreshed).await {
                        warn!("Failed to store refreshed token: {e}");
                    }
                    return Some(access_token);
                }
                Err(e) => {
                    warn!(
                        connection_id = %self.connection.id,
                        "Token refresh failed, deleting cached token: {e}"
                    );
                }
            }
        }

        // Expired without a refresh path, or refresh failed: the cached
        // token is useless from here on.
        if let Err(e) = self
            .tokens
            .delete(&self.connection.id, self.ctx.user_id())
            .await
        {
            warn!("Failed to delete expired token: {e}");
        }
        self.connection.connection_token.clone()
    }

    async fn refresh_token(&self, token: &DownstreamToken) -> Result<DownstreamToken> {
        let endpoint = token
            .token_endpoint
            .as_deref()
            .ok_or_else(|| Error::configuration("token has no endpoint"))?;
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::configuration("token has no refresh token"))?;

        debug!(connection_id = %self.connection.id, "Refreshing downstream token");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(client_id) = &token.client_id {
            form.push(("client_id", client_id));
        }
        if let Some(client_secret) = &token.client_secret {
            form.push(("client_secret", client_secret));
        }

        let response = self
            .http
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::transport(format!("token endpoint unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::unauthorized(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(format!("bad token response: {e}")))?;

        let now = Utc::now();
        Ok(DownstreamToken {
            connection_id: token.connection_id.clone(),
            user_id: token.user_id.clone(),
            access_token: body.access_token,
            // Some providers rotate the refresh token on every grant.
            refresh_token: body.refresh_token.or_else(|| token.refresh_token.clone()),
            token_endpoint: token.token_endpoint.clone(),
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            scope: body.scope.or_else(|| token.scope.clone()),
            expires_at: body
                .expires_in
                .map(|seconds| now + Duration::seconds(seconds as i64)),
            updated_at: now,
        })
    }

    fn mint_mesh_token(&self) -> Result<Option<String>> {
        if self.config.jwt_secret.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let claims = MeshTokenClaims {
            sub: self
                .ctx
                .auth
                .subject
                .clone()
                .unwrap_or_else(|| self.connection.id.clone()),
            user: self.ctx.user_id().map(String::from),
            configuration_state: self.connection.configuration_state.clone(),
            mesh_url: self.config.mesh_url.clone(),
            connection_id: self.connection.id.clone(),
            organization_id: self.connection.organization_id.clone(),
            permissions: self.connection.connection_permissions(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(MESH_TOKEN_TTL_MINUTES)).timestamp(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| Error::internal(format!("jwt encode failed: {e}")))?;
        Ok(Some(token))
    }
}

#[async_trait]
impl HeaderSource for HeaderBuilder {
    async fn build_headers(&self) -> TransportResult<HeaderSnapshot> {
        self.build()
            .await
            .map_err(|e| TransportError::Internal(e.to_string()))
    }
}
