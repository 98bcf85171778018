//! Typed view of the remote primer-scheme registry document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("no primer scheme name provided")]
    NoSchemeName,

    #[error("requested scheme version must be >= 0")]
    NoSchemeVersion,

    #[error("can't find scheme in manifest for {scheme}, version {version}")]
    NotFound { scheme: String, version: i64 },

    #[error("scheme {scheme} has no {kind} URL for version {version}")]
    MissingUrl {
        scheme: String,
        kind: &'static str,
        version: i64,
    },

    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Registry metadata for one primer scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemeMetadata {
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub latest_version: i64,
    #[serde(default)]
    pub primer_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub reference_urls: BTreeMap<String, String>,
}

impl SchemeMetadata {
    pub fn primer_url(&self, version: i64) -> Option<&str> {
        self.primer_urls.get(&version.to_string()).map(String::as_str)
    }

    pub fn reference_url(&self, version: i64) -> Option<&str> {
        self.reference_urls
            .get(&version.to_string())
            .map(String::as_str)
    }
}

/// The registry document: canonical scheme name to metadata.
/// Read-only once fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub schemes: BTreeMap<String, SchemeMetadata>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Manifest, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Resolves a scheme name or alias at a requested version to the
    /// canonical scheme entry. The first scheme whose alias list contains
    /// the name and whose latest version covers the request wins; scheme
    /// names iterate in sorted order so the choice is stable.
    pub fn resolve(
        &self,
        scheme: &str,
        version: i64,
    ) -> Result<(&str, &SchemeMetadata), ManifestError> {
        if scheme.is_empty() {
            return Err(ManifestError::NoSchemeName);
        }
        if version < 0 {
            return Err(ManifestError::NoSchemeVersion);
        }
        for (name, metadata) in &self.schemes {
            if metadata.aliases.iter().any(|alias| alias == scheme)
                && version <= metadata.latest_version
            {
                return Ok((name, metadata));
            }
        }
        Err(ManifestError::NotFound {
            scheme: scheme.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Manifest {
        let doc = r#"{
            "schemes": {
                "sars-cov-2": {
                    "aliases": ["sars-cov-2", "scov2", "ncov-2019"],
                    "latest_version": 4,
                    "primer_urls": {"3": "https://example.org/v3/primer.bed"},
                    "reference_urls": {"3": "https://example.org/v3/reference.fasta"}
                },
                "ebola": {
                    "aliases": ["ebola", "zaire"],
                    "latest_version": 1,
                    "primer_urls": {},
                    "reference_urls": {}
                }
            }
        }"#;
        Manifest::parse(doc.as_bytes()).unwrap()
    }

    #[test]
    fn alias_resolves_to_canonical_name() {
        let manifest = registry();
        let (name, metadata) = manifest.resolve("scov2", 3).unwrap();
        assert_eq!(name, "sars-cov-2");
        assert_eq!(metadata.primer_url(3), Some("https://example.org/v3/primer.bed"));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(
            registry().resolve("", 1),
            Err(ManifestError::NoSchemeName)
        ));
    }

    #[test]
    fn negative_version_is_rejected() {
        assert!(matches!(
            registry().resolve("scov2", -1),
            Err(ManifestError::NoSchemeVersion)
        ));
    }

    #[test]
    fn unknown_scheme_is_not_found() {
        assert!(matches!(
            registry().resolve("none", 1),
            Err(ManifestError::NotFound { .. })
        ));
    }

    #[test]
    fn version_beyond_latest_is_not_found() {
        assert!(matches!(
            registry().resolve("zaire", 2),
            Err(ManifestError::NotFound { .. })
        ));
    }
}
