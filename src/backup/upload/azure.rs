//! Azure Blob Storage through `object_store`.
//!
//! The storage connection string is mapped onto the builder: an
//! `AccountKey` signs requests, a `SharedAccessSignature` is sent as a SAS
//! token, `UseDevelopmentStorage=true` targets the local emulator.

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::upload::{put_file, CloudUploader, PART_SIZE};
use async_trait::async_trait;
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::ObjectStore;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

static DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";
static DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[derive(Clone, PartialEq, Eq, Debug)]
enum Credential {
    AccessKey(RedactedString),
    Sas(RedactedString),
    Emulator,
}

/// The parts of a storage connection string the builder needs.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    account: String,
    blob_endpoint: String,
    /// Set when the endpoint is not the account's default public one
    custom_endpoint: bool,
    credential: Credential,
}

impl Debug for ConnectionSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("account", &self.account)
            .field("blob_endpoint", &self.blob_endpoint)
            .finish_non_exhaustive()
    }
}

impl ConnectionSettings {
    pub fn parse(conn_str: &RedactedString) -> Result<Self> {
        let pairs: HashMap<String, String> = conn_str
            .inner()
            .split(';')
            .filter_map(|part| part.split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| pairs.get(key).cloned();

        if get("usedevelopmentstorage").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Ok(Self {
                account: "devstoreaccount1".to_string(),
                blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
                custom_endpoint: true,
                credential: Credential::Emulator,
            });
        }

        let explicit_endpoint = get("blobendpoint").map(|e| e.trim_end_matches('/').to_string());
        let account = match (get("accountname"), &explicit_endpoint) {
            (Some(account), _) => account,
            (None, Some(endpoint)) => account_from_endpoint(endpoint)?,
            (None, None) => {
                return Err(Error::invalid_argument(
                    "azure_conn_str needs AccountName or BlobEndpoint",
                ))
            }
        };
        let protocol = get("defaultendpointsprotocol").unwrap_or_else(|| "https".to_string());
        let suffix = get("endpointsuffix").unwrap_or_else(|| DEFAULT_ENDPOINT_SUFFIX.to_string());
        let custom_endpoint =
            explicit_endpoint.is_some() || protocol != "https" || suffix != DEFAULT_ENDPOINT_SUFFIX;
        let blob_endpoint = explicit_endpoint
            .unwrap_or_else(|| format!("{protocol}://{account}.blob.{suffix}"));

        let credential = match (get("sharedaccesssignature"), get("accountkey")) {
            (Some(sas), _) => Credential::Sas(sas.trim_start_matches('?').into()),
            (None, Some(key)) => Credential::AccessKey(key.into()),
            (None, None) => {
                return Err(Error::invalid_argument(
                    "azure_conn_str needs AccountKey or SharedAccessSignature",
                ))
            }
        };

        Ok(Self {
            account,
            blob_endpoint,
            custom_endpoint,
            credential,
        })
    }

    pub fn blob_endpoint(&self) -> &str {
        &self.blob_endpoint
    }

    fn builder(&self, container: &str) -> MicrosoftAzureBuilder {
        let builder = MicrosoftAzureBuilder::new().with_container_name(container);
        let builder = match &self.credential {
            Credential::Emulator => return builder.with_use_emulator(true),
            Credential::AccessKey(key) => builder
                .with_account(&self.account)
                .with_access_key(key.inner().as_str()),
            Credential::Sas(sas) => builder
                .with_account(&self.account)
                .with_config(AzureConfigKey::SasKey, sas.inner().as_str()),
        };
        if self.custom_endpoint {
            builder
                .with_config(AzureConfigKey::Endpoint, self.blob_endpoint.as_str())
                .with_allow_http(self.blob_endpoint.starts_with("http://"))
        } else {
            builder
        }
    }
}

/// First DNS label of the endpoint host, `acct` for `https://acct.blob...`.
fn account_from_endpoint(endpoint: &str) -> Result<String> {
    reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .and_then(|host| host.split('.').next().map(str::to_string))
        .filter(|account| !account.is_empty())
        .ok_or_else(|| Error::invalid_argument(format!("invalid BlobEndpoint {endpoint:?}")))
}

pub struct AzureUploader {
    store: Arc<dyn ObjectStore>,
    container_url: String,
}

impl AzureUploader {
    /// Builds the client; no request is sent until an upload.
    pub fn new(conn_str: &RedactedString, container: &str) -> Result<Self> {
        let settings = ConnectionSettings::parse(conn_str)?;
        let store = settings
            .builder(container)
            .build()
            .map_err(|e| Error::invalid_argument(format!("unusable azure_conn_str: {e}")))?;
        Ok(Self {
            store: Arc::new(store),
            container_url: format!("{}/{}", settings.blob_endpoint(), container),
        })
    }
}

#[async_trait]
impl CloudUploader for AzureUploader {
    async fn upload(&self, file: &Path, object_name: &str) -> Result<String> {
        put_file(self.store.clone(), file, object_name, PART_SIZE).await?;
        Ok(format!("{}/{}", self.container_url, object_name))
    }

    fn name(&self) -> &'static str {
        "azure"
    }
}
