/// Environment variable holding the object storage endpoint.
pub const ENDPOINT_VAR: &str = "DECOLORIZE_STORAGE_URL";
/// Environment variable holding the object storage access key.
pub const ACCESS_KEY_VAR: &str = "DECOLORIZE_STORAGE_KEY";

/// Settings the uploader needs before it can talk to object storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadConfig {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
}

impl UploadConfig {
    pub fn new(endpoint: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
        }
    }

    /// Read both settings from the environment. Empty values count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: read(ENDPOINT_VAR),
            access_key: read(ACCESS_KEY_VAR),
        }
    }

    /// Name of the first missing setting, if any.
    pub fn missing(&self) -> Option<&'static str> {
        if self.endpoint.is_none() {
            Some(ENDPOINT_VAR)
        } else if self.access_key.is_none() {
            Some(ACCESS_KEY_VAR)
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reports_endpoint_first() {
        assert_eq!(UploadConfig::default().missing(), Some(ENDPOINT_VAR));
        let partial = UploadConfig {
            endpoint: Some("https://objects.example".into()),
            access_key: None,
        };
        assert_eq!(partial.missing(), Some(ACCESS_KEY_VAR));
        assert!(UploadConfig::new("https://objects.example", "key").is_complete());
    }
}
