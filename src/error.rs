use compact_str::CompactString;

/// The error taxonomy for the resolution engine (semver parsing, registry
/// fetches, and tree building). Every public operation in this crate
/// returns one of these variants rather than an opaque boxed error, so
/// callers can match on what went wrong.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid semantic version: {0:?}")]
    InvalidVersion(CompactString),

    #[error("invalid range expression {0:?}: {1}")]
    InvalidRange(CompactString, CompactString),

    #[error("no version of `{name}` satisfies `{range}`")]
    NoCompatibleVersion {
        name: CompactString,
        range: CompactString,
    },

    #[error("no such version: {name}@{version}")]
    NoSuchVersion {
        name: CompactString,
        version: CompactString,
    },

    #[error("no versions available for `{0}`")]
    NoVersions(CompactString),

    #[error("registry responded with {status} {reason} for `{name}`")]
    Response {
        name: CompactString,
        status: u16,
        reason: CompactString,
    },

    #[error("network error while fetching `{name}`: {message}")]
    Network {
        name: CompactString,
        message: CompactString,
    },

    #[error("failed to decode response for `{name}`: {message}")]
    Decode {
        name: CompactString,
        message: CompactString,
    },
}

pub type Result<T> = std::result::Result<T, ResolveError>;
