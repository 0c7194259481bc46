use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "gmail-rules";

/// Reading mail and changing labels both need the modify scope.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

pub type GmailAuthenticator =
    oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// OAuth token storage in the OS keyring, one entry per account.
pub struct RingStorage {
    account: String,
}

impl RingStorage {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(APP_NAME, &format!("token:{}", self.account))
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
    }

    async fn get_all(&self) -> Result<TokenData> {
        match self.entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    /// Forget the stored token so the next run goes through the browser flow again.
    pub fn clear_token(&self) -> Result<bool> {
        match self.entry()?.delete_password() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        self.entry()?
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.get_all().await {
            Ok(data) => data.tokens.into_iter().next(),
            Err(e) => {
                warn!(account = %self.account, error = %e, "Could not read stored token");
                None
            }
        }
    }
}

/// Opens the consent page in the default browser.
struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> BoxFuture<'a, std::result::Result<String, String>> {
        Box::pin(async move {
            info!("Opening browser for Google sign-in");
            if let Err(e) = open::that(url) {
                warn!(error = %e, "Could not open browser");
            }
            println!("If the browser did not open, visit:\n\n  {}\n", url);
            Ok(String::new())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        let path = path.as_ref();
        read_application_secret(path)
            .await
            .with_context(|| format!("Failed to read application secret from {}", path.display()))
    }

    pub async fn authenticate(secret: ApplicationSecret, account: &str) -> Result<GmailAuthenticator> {
        let auth = InstalledFlowAuthenticator::builder(
            secret,
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .with_storage(Box::new(RingStorage::new(account)))
        .flow_delegate(Box::new(BrowserDelegate))
        .build()
        .await
        .context("Failed to build authenticator")?;

        // Fetch a token up front so the browser flow happens before any API call.
        auth.token(SCOPES)
            .await
            .context("Failed to obtain an access token")?;

        Ok(auth)
    }
}
