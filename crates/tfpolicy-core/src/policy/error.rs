//! Error types for template reading, substitution, building and tree construction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while turning policy templates into resolved documents.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The file is not well-formed XML (or not UTF-8).
    #[error("malformed policy XML in {path}: {detail}")]
    MalformedXml { path: PathBuf, detail: String },

    /// The root element carries no usable `PolicyId` attribute.
    #[error("policy in {path} has no PolicyId")]
    MissingPolicyId { path: PathBuf },

    /// The identifier cannot name a file inside the output directory.
    #[error("invalid policy id {policy_id:?}: {reason}")]
    InvalidPolicyId {
        policy_id: String,
        reason: &'static str,
    },

    /// A `BasePolicy/PolicyId` element exists but is empty.
    #[error("policy {policy_id} declares an empty base policy")]
    EmptyParentId { policy_id: String },

    /// A `${Name}` token has no entry in the settings mapping.
    #[error("unresolved placeholder ${{{token}}} in policy {policy_id}")]
    UnresolvedPlaceholder { policy_id: String, token: String },

    /// Two documents resolve to the same identifier.
    #[error("duplicate policy id {policy_id}: {first} and {second}")]
    DuplicatePolicyId {
        policy_id: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A declared parent does not exist in the same resolved set.
    #[error("policy {policy_id} references missing base policy {parent_id}")]
    DanglingParent { policy_id: String, parent_id: String },

    /// Following parent references revisits a document.
    #[error("inheritance cycle detected involving policies: {policies:?}")]
    InheritanceCycle { policies: Vec<String> },

    /// `write` was called before `process`.
    #[error("no processed policies to write; call process first")]
    NotProcessed,

    /// Source or target directory problems.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PolicyError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result alias.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
