// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carrier plugin discovery.
//!
//! A descriptor names a carrier and the factory kind that builds it. The
//! registry consults discovery only on a miss, so descriptors are cheap to
//! list and nothing is instantiated until a connection asks for it.
//!
//! # Example YAML
//!
//! ```yaml
//! # carriers/telnet.yaml
//! name: telnet
//! kind: text
//! signature: "TELNET  "
//! options:
//!   ack: "true"
//! ```

use std::collections::BTreeMap;
#[cfg(feature = "plugin-descriptors")]
use std::path::{Path, PathBuf};

/// Metadata of a carrier that can be installed on demand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "plugin-descriptors", derive(serde::Deserialize))]
pub struct CarrierDescriptor {
    /// Carrier name as used in `tcp+...`-style strings.
    pub name: String,
    /// Factory kind (`tcp`, `text`, `udp`, `mcast`, `local`, `priority`, ...).
    pub kind: String,
    /// Protocol specifier prefix; empty for carriers never sniffed by header.
    #[cfg_attr(feature = "plugin-descriptors", serde(default))]
    pub signature: String,
    /// Kind-specific settings.
    #[cfg_attr(feature = "plugin-descriptors", serde(default))]
    pub options: BTreeMap<String, String>,
}

impl CarrierDescriptor {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: kind.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_owned();
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Boolean option: `true`, `1`, `yes` or `on`.
    pub fn flag(&self, key: &str) -> bool {
        self.options.get(key).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }

    /// Whether this descriptor claims the given header bytes.
    pub fn matches_header(&self, header: &[u8]) -> bool {
        !self.signature.is_empty() && header.starts_with(self.signature.as_bytes())
    }
}

/// Source of carrier descriptors.
pub trait PluginDiscovery: Send + Sync {
    /// Every descriptor currently known.
    fn descriptors(&self) -> Vec<CarrierDescriptor>;

    fn find_by_name(&self, name: &str) -> Option<CarrierDescriptor> {
        self.descriptors().into_iter().find(|d| d.name == name)
    }

    fn find_by_header(&self, header: &[u8]) -> Vec<CarrierDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.matches_header(header))
            .collect()
    }
}

/// Fixed in-memory descriptor list.
#[derive(Clone, Debug, Default)]
pub struct StaticDiscovery {
    descriptors: Vec<CarrierDescriptor>,
}

impl StaticDiscovery {
    pub fn new(descriptors: Vec<CarrierDescriptor>) -> Self {
        Self { descriptors }
    }
}

impl PluginDiscovery for StaticDiscovery {
    fn descriptors(&self) -> Vec<CarrierDescriptor> {
        self.descriptors.clone()
    }
}

/// Descriptors read from `*.yaml` / `*.yml` files in one directory.
///
/// The directory is rescanned on every lookup; invalid files are logged
/// and skipped.
#[cfg(feature = "plugin-descriptors")]
#[derive(Clone, Debug)]
pub struct DirectoryDiscovery {
    dir: PathBuf,
}

#[cfg(feature = "plugin-descriptors")]
impl DirectoryDiscovery {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse a single descriptor document.
    pub fn parse_yaml(content: &str) -> crate::Result<CarrierDescriptor> {
        let descriptor: CarrierDescriptor = serde_yaml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse descriptor: {}", e)))?;
        if descriptor.name.is_empty() || descriptor.kind.is_empty() {
            return Err(crate::Error::Config(
                "descriptor needs a name and a kind".to_owned(),
            ));
        }
        Ok(descriptor)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> crate::Result<CarrierDescriptor> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }
}

#[cfg(feature = "plugin-descriptors")]
impl PluginDiscovery for DirectoryDiscovery {
    fn descriptors(&self) -> Vec<CarrierDescriptor> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("[Plugin] cannot scan {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|path| match Self::load_file(&path) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    log::warn!("[Plugin] skipping {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        let discovery = StaticDiscovery::new(vec![
            CarrierDescriptor::new("telnet", "text").with_signature("TELNET  "),
            CarrierDescriptor::new("fifo", "local"),
        ]);
        assert_eq!(discovery.find_by_name("fifo").unwrap().kind, "local");
        assert!(discovery.find_by_name("shmem").is_none());

        let hits = discovery.find_by_header(b"TELNET  ");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "telnet");
        // An empty signature never claims a header.
        assert!(discovery.find_by_header(b"").iter().all(|d| d.name != "fifo"));
    }

    #[test]
    fn test_descriptor_flags() {
        let d = CarrierDescriptor::new("x", "tcp")
            .with_option("ack", "Yes")
            .with_option("quiet", "0");
        assert!(d.flag("ack"));
        assert!(!d.flag("quiet"));
        assert!(!d.flag("missing"));
    }

    #[cfg(feature = "plugin-descriptors")]
    #[test]
    fn test_parse_yaml_descriptor() {
        let yaml = r#"
name: telnet
kind: text
signature: "TELNET  "
options:
  ack: "true"
"#;
        let d = DirectoryDiscovery::parse_yaml(yaml).expect("valid descriptor");
        assert_eq!(d.name, "telnet");
        assert_eq!(d.signature, "TELNET  ");
        assert!(d.flag("ack"));

        assert!(DirectoryDiscovery::parse_yaml("kind: text").is_err());
        assert!(DirectoryDiscovery::parse_yaml("name: [").is_err());
    }

    #[cfg(feature = "plugin-descriptors")]
    #[test]
    fn test_directory_skips_invalid_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.yaml"), "name: alpha\nkind: tcp\n").expect("write");
        std::fs::write(dir.path().join("b.yml"), "name: beta\nkind: udp\n").expect("write");
        std::fs::write(dir.path().join("broken.yaml"), "name: [").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "name: gamma\nkind: tcp\n").expect("write");

        let discovery = DirectoryDiscovery::new(dir.path());
        let names: Vec<String> = discovery.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[cfg(feature = "plugin-descriptors")]
    #[test]
    fn test_missing_directory_is_empty() {
        let discovery = DirectoryDiscovery::new("/nonexistent/portwire/plugins");
        assert!(discovery.descriptors().is_empty());
    }
}
