//! HTTP registry client: fetches a package's metadata document, decodes it,
//! and derives the descending, latest-filtered version list.
//!
//! This module owns the wire format (§6 of the design notes) and the raw
//! HTTP round-trip; request coalescing lives one layer up, in [`crate::cache`].

use std::sync::Arc;

use compact_str::{CompactString, ToCompactString};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{ResolveError, Result};
use crate::range::RequirementSet;
use crate::version::Version;

const CLIENT_POOL_LIMIT: usize = 100;

pub static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(CLIENT_POOL_LIMIT)
        .user_agent(concat!("treeline/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("reqwest client builds from static configuration")
});

#[derive(Debug, Clone, Deserialize)]
pub struct Dist {
    pub tarball: CompactString,
    pub shasum: CompactString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionRecord {
    pub name: CompactString,
    pub version: Version,
    #[serde(default)]
    pub dependencies: IndexMap<CompactString, CompactString>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: IndexMap<CompactString, CompactString>,
    #[serde(default, rename = "optionalDependencies")]
    pub optional_dependencies: IndexMap<CompactString, CompactString>,
    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: IndexMap<CompactString, CompactString>,
    pub dist: Dist,
}

impl VersionRecord {
    /// Parses a raw `name -> range` dependency map into `RequirementSet`s,
    /// lazily and fallibly: real registry data routinely has dependency
    /// values outside the node-semver grammar (git URLs, `workspace:*`,
    /// dist-tags), and the core never consumes these fields, so a single
    /// bad entry must not fail decoding of the whole package.
    pub fn parse_dependencies(
        map: &IndexMap<CompactString, CompactString>,
    ) -> (
        IndexMap<CompactString, RequirementSet>,
        Vec<(CompactString, ResolveError)>,
    ) {
        let mut parsed = IndexMap::new();
        let mut failures = Vec::new();
        for (name, range) in map {
            match range.parse::<RequirementSet>() {
                Ok(set) => {
                    parsed.insert(name.clone(), set);
                }
                Err(e) => failures.push((name.clone(), e)),
            }
        }
        (parsed, failures)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawPackageRecord {
    #[serde(rename = "dist-tags", default)]
    dist_tags: IndexMap<CompactString, CompactString>,
    #[serde(default)]
    versions: IndexMap<CompactString, VersionRecord>,
}

/// Immutable registry metadata for one package, as published by the fetch
/// loop. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub name: CompactString,
    pub dist_tags: IndexMap<CompactString, CompactString>,
    pub versions: IndexMap<Version, VersionRecord>,
    pub sorted_versions: Vec<Version>,
}

impl PackageRecord {
    fn from_raw(name: &str, raw: RawPackageRecord) -> Result<Self> {
        let mut versions = IndexMap::with_capacity(raw.versions.len());
        for (key, record) in raw.versions {
            let version: Version = key.parse()?;
            versions.insert(version, record);
        }

        let latest = raw
            .dist_tags
            .get("latest")
            .and_then(|s| s.parse::<Version>().ok());

        let mut sorted_versions: Vec<Version> = versions.keys().cloned().collect();
        sorted_versions.sort_by(|a, b| b.cmp(a));
        if let Some(latest) = &latest {
            sorted_versions.retain(|v| v <= latest);
        }

        Ok(Self {
            name: name.to_compact_string(),
            dist_tags: raw.dist_tags,
            versions,
            sorted_versions,
        })
    }
}

/// The raw HTTP fetch procedure (component D): `GET {base_url}{name}`,
/// decode the JSON body, derive `sorted_versions`. Holds no state of its
/// own beyond the base URL — coalescing and caching are the fetch loop's
/// job, not this type's.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: CompactString,
}

impl RegistryClient {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let mut base: CompactString = base_url.as_ref().to_compact_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self { base_url: base }
    }

    #[tracing::instrument(skip(self), fields(name = %name))]
    pub async fn fetch_package_record(&self, name: &str) -> Result<PackageRecord> {
        let url = format!("{}{name}", self.base_url);
        tracing::debug!(%url, "fetching package record");

        let response = CLIENT.get(&url).send().await.map_err(|e| ResolveError::Network {
            name: name.to_compact_string(),
            message: e.to_compact_string(),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ResolveError::Response {
                name: name.to_compact_string(),
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_compact_string(),
            });
        }

        let body = response.text().await.map_err(|e| ResolveError::Network {
            name: name.to_compact_string(),
            message: e.to_compact_string(),
        })?;

        let raw: RawPackageRecord = {
            let de = &mut serde_json::Deserializer::from_str(&body);
            serde_path_to_error::deserialize(de).map_err(|e| ResolveError::Decode {
                name: name.to_compact_string(),
                message: e.to_compact_string(),
            })?
        };

        PackageRecord::from_raw(name, raw)
    }
}

/// The registry-facing operations of §4.4, layered on top of the
/// coalescing cache: every operation that needs a `PackageRecord` asks
/// the cache for it (fetching on first demand), never the network
/// directly.
pub struct Registry {
    cache: crate::cache::Cache,
}

impl Registry {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let client: Arc<dyn crate::cache::Fetch> = Arc::new(RegistryClient::new(base_url));
        Self {
            cache: crate::cache::Cache::spawn(client),
        }
    }

    pub async fn package_versions(&self, name: &str) -> Result<Vec<Version>> {
        let record = self.cache.package_data(name).await?;
        Ok(record.sorted_versions.clone())
    }

    pub async fn compatible_package_versions(
        &self,
        name: &str,
        req: &RequirementSet,
    ) -> Result<Vec<Version>> {
        let versions = self.package_versions(name).await?;
        Ok(versions.into_iter().filter(|v| req.satisfied_by(v)).collect())
    }

    pub async fn latest_package_version(&self, name: &str) -> Result<Version> {
        self.package_versions(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoVersions(name.to_compact_string()))
    }

    pub async fn latest_compatible_package_version(
        &self,
        name: &str,
        req: &RequirementSet,
    ) -> Result<Version> {
        self.compatible_package_versions(name, req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoCompatibleVersion {
                name: name.to_compact_string(),
                range: req.to_compact_string(),
            })
    }

    pub async fn package_by_version(&self, name: &str, version: &Version) -> Result<VersionRecord> {
        let record = self.cache.package_data(name).await?;
        record
            .versions
            .get(version)
            .cloned()
            .ok_or_else(|| ResolveError::NoSuchVersion {
                name: name.to_compact_string(),
                version: version.to_compact_string(),
            })
    }

    pub async fn cache_all<I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = CompactString>,
    {
        self.cache.cache_all(names).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_raw(body: &str) -> RawPackageRecord {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn sorted_versions_are_descending_and_filtered_by_latest() {
        let raw = decode_raw(
            r#"{
                "dist-tags": {"latest": "1.2.0"},
                "versions": {
                    "1.0.0": {"name":"pkg","version":"1.0.0","dist":{"tarball":"t","shasum":"s"}},
                    "1.2.0": {"name":"pkg","version":"1.2.0","dist":{"tarball":"t","shasum":"s"}},
                    "1.3.0-next": {"name":"pkg","version":"1.3.0-next","dist":{"tarball":"t","shasum":"s"}}
                }
            }"#,
        );
        let record = PackageRecord::from_raw("pkg", raw).unwrap();
        assert_eq!(
            record.sorted_versions,
            vec![Version::new(1, 2, 0), Version::new(1, 0, 0)]
        );
    }

    #[test]
    fn unparseable_latest_disables_filtering() {
        let raw = decode_raw(
            r#"{
                "dist-tags": {"latest": "not-a-version"},
                "versions": {
                    "1.0.0": {"name":"pkg","version":"1.0.0","dist":{"tarball":"t","shasum":"s"}},
                    "2.0.0": {"name":"pkg","version":"2.0.0","dist":{"tarball":"t","shasum":"s"}}
                }
            }"#,
        );
        let record = PackageRecord::from_raw("pkg", raw).unwrap();
        assert_eq!(
            record.sorted_versions,
            vec![Version::new(2, 0, 0), Version::new(1, 0, 0)]
        );
    }

    #[test]
    fn unparseable_version_key_is_fatal() {
        let raw = decode_raw(
            r#"{
                "dist-tags": {},
                "versions": {
                    "not-a-version": {"name":"pkg","version":"1.0.0","dist":{"tarball":"t","shasum":"s"}}
                }
            }"#,
        );
        assert!(PackageRecord::from_raw("pkg", raw).is_err());
    }

    #[test]
    fn base_url_is_normalized_with_trailing_slash() {
        let client = RegistryClient::new("https://registry.npmjs.org");
        assert_eq!(client.base_url.as_str(), "https://registry.npmjs.org/");
        let client = RegistryClient::new("https://registry.npmjs.org/");
        assert_eq!(client.base_url.as_str(), "https://registry.npmjs.org/");
    }

    #[test]
    fn dependency_parsing_is_lazy_and_tolerant_of_bad_entries() {
        let mut map = IndexMap::new();
        map.insert(CompactString::from("left-pad"), CompactString::from("^1.3.0"));
        map.insert(
            CompactString::from("some-fork"),
            CompactString::from("git+https://example.com/fork.git"),
        );
        let (parsed, failures) = VersionRecord::parse_dependencies(&map);
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("left-pad"));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "some-fork");
    }
}
