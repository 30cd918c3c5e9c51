//! Application list loading.

use crate::types::ApplicationDescriptor;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Application list error types
#[derive(Debug, Error)]
pub enum AppListError {
    #[error("No application list configured (use --app-file or apps.file)")]
    NotConfigured,

    #[error("Failed to load app list from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid app list from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid application #{index} in {}: {reason}", path.display())]
    Invalid {
        path: PathBuf,
        index: usize,
        reason: String,
    },
}

impl From<AppListError> for common::Error {
    fn from(err: AppListError) -> Self {
        common::Error::app_list(err)
    }
}

/// Read and validate the application list at `path`.
pub fn load_applications(path: Option<&Path>) -> Result<Vec<ApplicationDescriptor>, AppListError> {
    let path = path.ok_or(AppListError::NotConfigured)?;

    let contents = std::fs::read_to_string(path).map_err(|source| AppListError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_applications(&contents, path)
}

/// Parse and validate an application list. `origin` is only used in errors.
pub fn parse_applications(
    contents: &str,
    origin: &Path,
) -> Result<Vec<ApplicationDescriptor>, AppListError> {
    let mut descriptors: Vec<ApplicationDescriptor> =
        serde_json::from_str(contents).map_err(|source| AppListError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

    let mut seen = HashSet::new();
    for (index, descriptor) in descriptors.iter_mut().enumerate() {
        let invalid = |reason: String| AppListError::Invalid {
            path: origin.to_path_buf(),
            index,
            reason,
        };

        descriptor.name = descriptor.name.trim().to_string();
        if descriptor.name.is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if !seen.insert(descriptor.name.clone()) {
            return Err(invalid(format!("duplicate name {:?}", descriptor.name)));
        }

        descriptor.service_url = descriptor.service_url.trim().to_string();
        match reqwest::Url::parse(&descriptor.service_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(invalid(format!(
                    "unsupported url scheme {:?} for {}",
                    url.scheme(),
                    descriptor.name
                )));
            }
            Err(e) => {
                return Err(invalid(format!(
                    "invalid url {:?} for {}: {}",
                    descriptor.service_url, descriptor.name, e
                )));
            }
        }

        let path = descriptor.health_check_path.trim();
        if !path.is_empty() && !path.starts_with('/') {
            return Err(invalid(format!(
                "healthcheckURL {:?} for {} must start with '/'",
                path, descriptor.name
            )));
        }
    }

    Ok(descriptors)
}
