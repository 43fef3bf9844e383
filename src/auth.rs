use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const TOKEN_KEY: &str = "gmail_token";

/// Where OAuth tokens are kept between runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStore {
    File(PathBuf),
    Keyring { service: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Token storage in the OS keyring, one entry per application
pub struct RingStorage {
    service: String,
}

impl RingStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
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
        self.get_all()
            .await
            .ok()
            .and_then(|data| data.tokens.first().cloned())
    }
}

/// Opens the consent page in the user's browser
pub struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            info!("Opening browser for Gmail authorization");
            if let Err(e) = open::that(url) {
                warn!(
                    error = %e,
                    "Could not open a browser; visit this URL to authorize: {}", url
                );
            }
            if need_code {
                return Err(
                    "interactive code entry is not supported, use the redirect flow".to_string(),
                );
            }
            Ok(String::new())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path.as_ref())
            .await
            .with_context(|| {
                format!(
                    "Failed to read application secret from {}",
                    path.as_ref().display()
                )
            })
    }

    pub async fn authenticate(
        secret: ApplicationSecret,
        store: &TokenStore,
    ) -> Result<
        oauth2::authenticator::Authenticator<
            hyper_rustls::HttpsConnector<hyper::client::HttpConnector>,
        >,
    > {
        let builder =
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .flow_delegate(Box::new(BrowserDelegate));

        let builder = match store {
            TokenStore::File(path) => builder.persist_tokens_to_disk(path),
            TokenStore::Keyring { service } => {
                builder.with_storage(Box::new(RingStorage::new(service.clone())))
            }
        };

        builder.build().await.context("Failed to build authenticator")
    }
}
