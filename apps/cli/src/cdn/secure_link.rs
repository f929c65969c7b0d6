//! Secure-link minting boundary.
//!
//! Content downloads go through signed URLs. The auth subsystem itself is
//! out of scope; all the mirror needs is something that, given a content
//! path, a product and a generation, yields either a plain base URL or a
//! list of endpoint records whose `url_format` is materialized by token
//! substitution after the path is inserted into `parameters`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::cdn::CdnError;
use crate::paths::Generation;

/// One endpoint record as returned by the secure-link service.
#[derive(Clone, Debug, Deserialize)]
pub struct SecureLinkEndpoint {
    pub url_format: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl SecureLinkEndpoint {
    /// Substitute `{name}` tokens in `url_format` with parameter values.
    pub fn materialize(&self) -> String {
        let mut url = self.url_format.clone();
        for (key, value) in &self.parameters {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            url = url.replace(&format!("{{{key}}}"), &text);
        }
        url
    }
}

/// A minted link: either a plain base URL or signed endpoint records.
#[derive(Clone, Debug)]
pub enum SecureLink {
    Plain(String),
    Endpoints(Vec<SecureLinkEndpoint>),
}

impl SecureLink {
    /// Full URL for a content path below this link. For endpoint records the
    /// path lands in `parameters.path` of the first endpoint before token
    /// substitution.
    pub fn url_for(&self, path: &str) -> Result<String, CdnError> {
        match self {
            SecureLink::Plain(base) => {
                Ok(format!("{}{}", base.trim_end_matches('/'), path))
            }
            SecureLink::Endpoints(endpoints) => {
                let endpoint = endpoints.first().ok_or_else(|| {
                    CdnError::Config("secure link response contained no endpoints".to_string())
                })?;
                let mut endpoint = endpoint.clone();
                endpoint
                    .parameters
                    .insert("path".to_string(), serde_json::Value::String(path.to_string()));
                Ok(endpoint.materialize())
            }
        }
    }
}

/// Mints secure links for content downloads. Implementations attach whatever
/// authentication the CDN requires; the mirror never sees tokens directly.
pub trait LinkMinter {
    fn secure_link(
        &self,
        path: &str,
        product_id: &str,
        generation: Generation,
    ) -> Result<SecureLink, CdnError>;
}

/// Minter for CDNs that need no signing: every link is the same base URL.
pub struct PlainBaseMinter {
    base: String,
}

impl PlainBaseMinter {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl LinkMinter for PlainBaseMinter {
    fn secure_link(
        &self,
        _path: &str,
        _product_id: &str,
        _generation: Generation,
    ) -> Result<SecureLink, CdnError> {
        Ok(SecureLink::Plain(self.base.clone()))
    }
}

/// On-disk secure-link configuration, written by the auth tooling.
#[derive(Debug, Deserialize)]
struct LinkConfig {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    endpoints: Vec<SecureLinkEndpoint>,
}

/// Minter backed by a JSON config file holding either a `base_url` or
/// pre-minted endpoint records.
pub struct FileLinkMinter {
    config: LinkConfig,
}

impl FileLinkMinter {
    pub fn load(path: &Path) -> Result<Self, CdnError> {
        let raw = fs::read(path).map_err(|e| {
            CdnError::Config(format!("cannot read secure-link config {}: {e}", path.display()))
        })?;
        let config: LinkConfig = serde_json::from_slice(&raw).map_err(|e| {
            CdnError::Config(format!("invalid secure-link config {}: {e}", path.display()))
        })?;
        if config.base_url.is_none() && config.endpoints.is_empty() {
            return Err(CdnError::Config(format!(
                "secure-link config {} has neither base_url nor endpoints",
                path.display()
            )));
        }
        Ok(Self { config })
    }
}

impl LinkMinter for FileLinkMinter {
    fn secure_link(
        &self,
        _path: &str,
        _product_id: &str,
        _generation: Generation,
    ) -> Result<SecureLink, CdnError> {
        if let Some(base) = &self.config.base_url {
            return Ok(SecureLink::Plain(base.clone()));
        }
        Ok(SecureLink::Endpoints(self.config.endpoints.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_link_joins_path() {
        let link = SecureLink::Plain("https://cdn.example.com/signed/abc/".to_string());
        assert_eq!(
            link.url_for("/windows/37794096/main.bin").unwrap(),
            "https://cdn.example.com/signed/abc/windows/37794096/main.bin"
        );
    }

    #[test]
    fn test_endpoint_token_substitution() {
        let endpoint = SecureLinkEndpoint {
            url_format: "https://{base_url}{path}?token={token}".to_string(),
            parameters: BTreeMap::from([
                (
                    "base_url".to_string(),
                    serde_json::Value::String("cdn.example.com".to_string()),
                ),
                (
                    "token".to_string(),
                    serde_json::Value::String("t0k3n".to_string()),
                ),
            ]),
        };
        let link = SecureLink::Endpoints(vec![endpoint]);
        assert_eq!(
            link.url_for("/content-system/v2/store/1/f7/32/f732").unwrap(),
            "https://cdn.example.com/content-system/v2/store/1/f7/32/f732?token=t0k3n"
        );
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let link = SecureLink::Endpoints(vec![]);
        assert!(matches!(link.url_for("/x"), Err(CdnError::Config(_))));
    }

    #[test]
    fn test_file_minter_requires_some_source() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("links.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            FileLinkMinter::load(&path),
            Err(CdnError::Config(_))
        ));

        std::fs::write(&path, r#"{"base_url": "https://cdn.example.com/s/"}"#).unwrap();
        let minter = FileLinkMinter::load(&path).unwrap();
        let link = minter
            .secure_link("/", "1207658930", Generation::V2)
            .unwrap();
        assert!(matches!(link, SecureLink::Plain(_)));
    }
}
