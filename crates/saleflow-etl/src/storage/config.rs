use saleflow_common::env;
use serde::Serialize;

use crate::error::EtlResult;

#[derive(Clone, Serialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when either is absent the default AWS provider
    /// chain is used instead
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("static_credentials", &self.has_static_credentials())
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl StorageConfig {
    pub fn from_env() -> EtlResult<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT"),
            region: env::var_or("S3_REGION", "us-east-1"),
            bucket: env::var("S3_BUCKET").unwrap_or_default(),
            access_key: env::var_any(&["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]),
            secret_key: env::var_any(&["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"]),
            path_style: env::flag("S3_PATH_STYLE", false)?,
        })
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}
