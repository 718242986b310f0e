//! Registry base URL configuration. Single registry, no auth or scopes —
//! those are out of scope for the resolution engine.

use std::env;

use compact_str::CompactString;
use once_cell::sync::Lazy;

const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
const REGISTRY_ENV_VAR: &str = "TREELINE_REGISTRY";

/// The registry base URL, read once from `TREELINE_REGISTRY` and cached
/// for the process lifetime, falling back to the public npm registry.
pub static REGISTRY_BASE_URL: Lazy<CompactString> = Lazy::new(|| {
    env::var(REGISTRY_ENV_VAR)
        .map(CompactString::from)
        .unwrap_or_else(|_| CompactString::from(DEFAULT_REGISTRY))
});

pub fn registry_base_url() -> &'static str {
    &REGISTRY_BASE_URL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_npmjs() {
        if env::var(REGISTRY_ENV_VAR).is_err() {
            assert_eq!(registry_base_url(), DEFAULT_REGISTRY);
        }
    }
}
