use crate::credentials::{CredentialStore, StoredCredential};
use crate::errors::{AppError, AppResult};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::env;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Validates, refreshes, and persists the OAuth credential. Every remote call
/// in the pipeline obtains its access token through [`TokenManager::ensure_valid`].
pub struct TokenManager {
    store: CredentialStore,
    client_id: String,
    client_secret: String,
    /// Single-flight guard: at most one refresh exchange per stored credential
    /// at a time. Two concurrent refreshes against the same refresh token can
    /// be rejected by the provider or persist divergent tokens.
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: CredentialStore) -> AppResult<Self> {
        let client_id = env::var("GOOGLE_CLIENT_ID")
            .map_err(|_| AppError::Config("GOOGLE_CLIENT_ID missing".into()))?;
        let client_secret = env::var("GOOGLE_CLIENT_SECRET")
            .map_err(|_| AppError::Config("GOOGLE_CLIENT_SECRET missing".into()))?;
        Ok(Self {
            store,
            client_id,
            client_secret,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return a credential that is valid right now.
    ///
    /// A fresh stored credential is returned unchanged without any network
    /// call. An expired one with a refresh token is refreshed, merged over the
    /// old record, persisted, and returned. Everything else — no credential,
    /// expired without a refresh token, failed refresh exchange — surfaces as
    /// [`AppError::AuthRequired`] so the caller can prompt for interactive
    /// re-authentication instead of treating it as a fatal fault.
    pub async fn ensure_valid(&self) -> AppResult<StoredCredential> {
        match self.store.load() {
            Some(cred) if cred.is_fresh() => return Ok(cred),
            Some(_) => {}
            None => return Err(AppError::AuthRequired),
        }

        let _guard = self.refresh_lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed and
        // persisted while we were waiting.
        let cred = self.store.load().ok_or(AppError::AuthRequired)?;
        if cred.is_fresh() {
            return Ok(cred);
        }
        let refresh_token = match cred.refresh_token.clone() {
            Some(token) => token,
            None => return Err(AppError::AuthRequired),
        };

        match self.exchange_refresh(&refresh_token).await {
            Ok(fresh) => {
                let merged = cred.merged_with(fresh);
                self.store.save(&merged)?;
                info!("OAuth credential refreshed and persisted");
                Ok(merged)
            }
            Err(e) => {
                warn!(error = %e, "Refresh exchange failed; re-authentication required");
                Err(AppError::AuthRequired)
            }
        }
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> AppResult<StoredCredential> {
        let client = self.build_client(None)?;
        let token_res = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| AppError::Network(format!("refresh exchange failed: {e}")))?;
        Ok(credential_from_response(&token_res))
    }

    /// Interactive consent flow: open the provider's consent page, catch the
    /// redirect on an ephemeral loopback port, exchange the code, and persist
    /// the resulting credential.
    pub async fn login(&self) -> AppResult<StoredCredential> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AppError::Unexpected(format!("failed to bind loopback port: {e}")))?;
        let local_port = listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|e| AppError::Unexpected(format!("failed to read local addr: {e}")))?;

        let redirect = format!("http://127.0.0.1:{local_port}");
        let client = self.build_client(Some(&redirect))?;

        let (auth_url, verifier, csrf) = build_auth_url(&client);
        info!(redirect = %redirect, "Opening browser for OAuth consent");
        open_in_browser(&auth_url);

        let code = listen_for_code(listener).await?;
        if code.state != *csrf.secret() {
            return Err(AppError::AuthRequired);
        }

        let token_res = client
            .exchange_code(AuthorizationCode::new(code.code))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| AppError::Network(format!("token exchange failed: {e}")))?;

        let cred = credential_from_response(&token_res);
        self.store.save(&cred)?;
        info!("OAuth credential stored");
        Ok(cred)
    }

    /// Discover who the credential belongs to via the provider's userinfo
    /// endpoint.
    pub async fn fetch_user_profile(&self, access_token: &str) -> AppResult<UserProfile> {
        let client = reqwest::Client::new();
        let res = client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("userinfo request failed: {e}")))?;
        if !res.status().is_success() {
            return Err(AppError::Network(format!(
                "userinfo failed with status {}",
                res.status()
            )));
        }
        res.json()
            .await
            .map_err(|e| AppError::Unexpected(format!("parse userinfo: {e}")))
    }

    fn build_client(&self, redirect: Option<&str>) -> AppResult<BasicClient> {
        let auth_url = AuthUrl::new(AUTH_URL.to_string())
            .map_err(|e| AppError::Config(format!("invalid auth url: {e}")))?;
        let token_url = TokenUrl::new(TOKEN_URL.to_string())
            .map_err(|e| AppError::Config(format!("invalid token url: {e}")))?;

        let mut client = BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(oauth2::AuthType::RequestBody);

        if let Some(redirect) = redirect {
            client = client.set_redirect_uri(
                RedirectUrl::new(redirect.to_string())
                    .map_err(|e| AppError::Config(format!("invalid redirect uri {redirect}: {e}")))?,
            );
        }
        Ok(client)
    }
}

fn credential_from_response(
    token_res: &oauth2::basic::BasicTokenResponse,
) -> StoredCredential {
    let expiry_date = token_res.expires_in().map(|d| {
        let expires_in_ms = d.as_millis().min(i64::MAX as u128) as i64;
        Utc::now().timestamp_millis() + expires_in_ms
    });
    let scope = token_res.scopes().map(|scopes| {
        scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    });
    StoredCredential {
        access_token: token_res.access_token().secret().to_string(),
        refresh_token: token_res.refresh_token().map(|r| r.secret().to_string()),
        expiry_date,
        scope,
        token_type: Some("Bearer".to_string()),
    }
}

fn build_auth_url(client: &BasicClient) -> (String, PkceCodeVerifier, CsrfToken) {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let mut req = client
        .authorize_url(CsrfToken::new_random)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge);
    for scope in SCOPES {
        req = req.add_scope(Scope::new((*scope).to_string()));
    }
    let (url, csrf) = req.url();
    (url.to_string(), verifier, csrf)
}

struct CodeResponse {
    code: String,
    state: String,
}

async fn listen_for_code(listener: TcpListener) -> AppResult<CodeResponse> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| AppError::Unexpected(format!("redirect accept failed: {e}")))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| AppError::Unexpected(format!("reading auth callback failed: {e}")))?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first_line = req.lines().next().unwrap_or("");
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AppError::Unexpected("invalid HTTP request".into()))?;
    let full_url = format!("http://localhost{path}");
    let parsed = url::Url::parse(&full_url)
        .map_err(|e| AppError::Unexpected(format!("failed to parse callback url: {e}")))?;

    let code = parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| AppError::Unexpected("callback missing code parameter".into()))?;
    let state = parsed
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .unwrap_or_default();

    let response =
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nAuth complete. You can close this tab.";
    let _ = stream.write_all(response.as_bytes()).await;
    Ok(CodeResponse { code, state })
}

fn open_in_browser(url: &str) {
    let attempt = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).status()
    } else if cfg!(target_os = "windows") {
        std::process::Command::new("rundll32.exe")
            .args(["url.dll,FileProtocolHandler", url])
            .status()
    } else {
        std::process::Command::new("xdg-open").arg(url).status()
    };
    if let Err(e) = attempt {
        warn!("Could not auto-open browser: {e}. Open this URL manually:\n{url}");
    } else {
        println!("If your browser did not open, navigate to:\n{url}");
    }
}
