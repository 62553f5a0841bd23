use crate::config::Config;
use crate::snapshot::StatusView;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Identity, StatusCode, Url};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("request to status endpoint failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("status endpoint returned {0}")]
    Status(StatusCode),
    #[error("could not decode status view: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid auth header {0:?}")]
    InvalidHeader(String),
    #[error("could not read {path:?}: {source}")]
    ReadPem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid certificate or key in {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        source: reqwest::Error,
    },
}

/// Fetches the status view from the gateway. One GET per call, no retries.
pub struct StatusClient {
    client: reqwest::Client,
    url: Url,
}

impl StatusClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let url = Url::parse(&config.url)?;
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if let Some(auth) = &config.auth_header {
            let name = HeaderName::from_bytes(auth.name.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(auth.name.clone()))?;
            let mut value = HeaderValue::from_str(&auth.value)
                .map_err(|_| ClientError::InvalidHeader(auth.name.clone()))?;
            value.set_sensitive(true);
            builder = builder.default_headers(HeaderMap::from_iter([(name, value)]));
        }

        if !config.verify_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(path) = &config.ca_bundle {
            let pem = read_pem(path)?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|source| {
                ClientError::Certificate {
                    path: path.clone(),
                    source,
                }
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(cert_path) = &config.client_cert {
            // The key may sit in the certificate file or beside it.
            let mut pem = read_pem(cert_path)?;
            if let Some(key_path) = &config.client_cert_key {
                pem.push(b'\n');
                pem.extend(read_pem(key_path)?);
            }
            let identity = Identity::from_pem(&pem).map_err(|source| {
                ClientError::Certificate {
                    path: cert_path.clone(),
                    source,
                }
            })?;
            builder = builder.identity(identity);
        }

        Ok(StatusClient {
            client: builder.build()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn fetch(&self) -> Result<StatusView, ClientError> {
        let response = self.client.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|source| ClientError::ReadPem {
        path: path.to_path_buf(),
        source,
    })
}
