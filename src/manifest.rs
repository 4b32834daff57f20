//! Resource manifest and deployment bundle produced by the web build.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Key of the entry document (the site root).
pub const ROOT_KEY: &str = "/";

/// Normalize a resource key: the empty path is the site root.
pub fn normalize_key(key: &str) -> &str {
  if key.is_empty() {
    ROOT_KEY
  } else {
    key
  }
}

/// Mapping from resource key to content checksum.
///
/// Checksums are opaque version tokens and are only ever compared for exact
/// equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
  from = "BTreeMap<String, String>",
  into = "BTreeMap<String, String>"
)]
pub struct ResourceManifest {
  resources: BTreeMap<String, String>,
}

impl From<BTreeMap<String, String>> for ResourceManifest {
  fn from(raw: BTreeMap<String, String>) -> Self {
    raw.into_iter().collect()
  }
}

impl From<ResourceManifest> for BTreeMap<String, String> {
  fn from(manifest: ResourceManifest) -> Self {
    manifest.resources
  }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResourceManifest {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let resources = iter
      .into_iter()
      .map(|(k, v)| (normalize_key(k.as_ref()).to_string(), v.into()))
      .collect();
    Self { resources }
  }
}

impl ResourceManifest {
  /// Checksum recorded for a key, if the key is part of the manifest.
  pub fn checksum(&self, key: &str) -> Option<&str> {
    self.resources.get(normalize_key(key)).map(String::as_str)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.resources.contains_key(normalize_key(key))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.resources.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  /// Serialize to the JSON object form stored in the manifest record.
  pub fn to_json(&self) -> Result<Vec<u8>> {
    serde_json::to_vec(&self.resources).map_err(|e| eyre!("Failed to serialize manifest: {}", e))
  }

  pub fn from_json(data: &[u8]) -> Result<Self> {
    serde_json::from_slice(data).map_err(|e| eyre!("Failed to parse manifest: {}", e))
  }

  /// SHA256 over the canonical (key-sorted) JSON form.
  pub fn digest(&self) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(self.to_json()?);
    Ok(hex::encode(hasher.finalize()))
  }
}

/// A deployed build: the manifest plus the core files needed to boot the
/// application shell.
#[derive(Debug, Clone)]
pub struct Deployment {
  pub resources: ResourceManifest,
  pub core: Vec<String>,
}

#[derive(Deserialize)]
struct RawDeployment {
  resources: ResourceManifest,
  #[serde(default)]
  core: Vec<String>,
}

impl Deployment {
  /// Build a deployment, checking that every core file is a manifest entry.
  pub fn new(resources: ResourceManifest, core: Vec<String>) -> Result<Self> {
    let core: Vec<String> = core
      .iter()
      .map(|k| normalize_key(k).to_string())
      .collect();

    if let Some(missing) = core.iter().find(|k| !resources.contains(k)) {
      return Err(eyre!("Core file '{}' is not listed in the manifest", missing));
    }

    Ok(Self { resources, core })
  }

  pub fn from_json(data: &[u8]) -> Result<Self> {
    let raw: RawDeployment = serde_json::from_slice(data)
      .map_err(|e| eyre!("Failed to parse deployment manifest: {}", e))?;
    Self::new(raw.resources, raw.core)
  }

  /// Load a deployment bundle from disk.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read(path)
      .map_err(|e| eyre!("Failed to read manifest {}: {}", path.display(), e))?;
    Self::from_json(&contents).map_err(|e| eyre!("{}: {}", path.display(), e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_key_is_root() {
    let manifest: ResourceManifest = [("", "abc"), ("main.js", "def")].into_iter().collect();
    assert_eq!(manifest.checksum("/"), Some("abc"));
    assert_eq!(manifest.checksum(""), Some("abc"));
    assert!(manifest.contains("main.js"));
    assert!(!manifest.contains("other.js"));
  }

  #[test]
  fn test_json_roundtrip_normalizes_root() {
    let manifest = ResourceManifest::from_json(br#"{"": "h0", "a.js": "h1"}"#).unwrap();
    assert_eq!(manifest.keys().collect::<Vec<_>>(), vec!["/", "a.js"]);

    let json = String::from_utf8(manifest.to_json().unwrap()).unwrap();
    assert_eq!(json, r#"{"/":"h0","a.js":"h1"}"#);
  }

  #[test]
  fn test_digest_tracks_checksums() {
    let a: ResourceManifest = [("a.js", "hash1")].into_iter().collect();
    let b: ResourceManifest = [("a.js", "hash1")].into_iter().collect();
    let c: ResourceManifest = [("a.js", "hash2")].into_iter().collect();

    assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    assert_eq!(a.digest().unwrap().len(), 64);
  }

  #[test]
  fn test_deployment_parses_bundle() {
    let deployment = Deployment::from_json(
      br#"{
        "resources": {"index.html": "x", "/": "x", "main.dart.js": "y"},
        "core": ["main.dart.js", "index.html"]
      }"#,
    )
    .unwrap();

    assert_eq!(deployment.resources.len(), 3);
    assert_eq!(deployment.core, vec!["main.dart.js", "index.html"]);
  }

  #[test]
  fn test_deployment_rejects_unknown_core_file() {
    let resources: ResourceManifest = [("a.js", "1")].into_iter().collect();
    let err = Deployment::new(resources, vec!["b.js".to_string()]).unwrap_err();
    assert!(err.to_string().contains("b.js"));
  }
}
