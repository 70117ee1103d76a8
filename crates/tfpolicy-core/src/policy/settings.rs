//! Textual `${Name}` substitution of environment settings into templates.
//!
//! Substitution is single-pass: inserted values are never re-scanned, and
//! text that does not match the placeholder grammar is copied through
//! unchanged. Output depends only on the template bytes and the mapping.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::policy::document::{validate_policy_id, PolicyDocument};
use crate::policy::error::{PolicyError, PolicyResult};

/// Flat setting-name to value mapping for one environment.
pub type Settings = BTreeMap<String, String>;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.:\-]*)\}").expect("placeholder pattern is valid")
    })
}

/// Applies a [`Settings`] mapping to templates.
#[derive(Debug, Clone, Copy)]
pub struct SettingsSubstitution<'a> {
    settings: &'a Settings,
}

impl<'a> SettingsSubstitution<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Replace every placeholder in `template`.
    ///
    /// `policy_id` only labels the error when a token has no setting.
    pub fn substitute(&self, policy_id: &str, template: &[u8]) -> PolicyResult<Vec<u8>> {
        let mut out = Vec::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder_pattern().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // The grammar is ASCII-only.
            let token = String::from_utf8_lossy(name.as_bytes());
            let value =
                self.settings
                    .get(token.as_ref())
                    .ok_or_else(|| PolicyError::UnresolvedPlaceholder {
                        policy_id: policy_id.to_string(),
                        token: token.to_string(),
                    })?;

            out.extend_from_slice(&template[last..whole.start()]);
            out.extend_from_slice(value.as_bytes());
            last = whole.end();
        }

        out.extend_from_slice(&template[last..]);
        Ok(out)
    }

    /// Substitute into a string such as a policy identifier.
    pub fn substitute_str(&self, policy_id: &str, text: &str) -> PolicyResult<String> {
        let bytes = self.substitute(policy_id, text.as_bytes())?;
        // Inputs and values are both UTF-8, so the splice is too.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Produce the resolved form of `template`.
    ///
    /// The identifier and parent reference go through the same substitution
    /// as the content, so the resolved header is known without re-parsing.
    /// A resolved identifier that cannot name a file in the output directory
    /// is rejected.
    pub fn apply(&self, template: &PolicyDocument) -> PolicyResult<PolicyDocument> {
        let raw_id = template.id();
        let id = self.substitute_str(raw_id, raw_id)?;
        validate_policy_id(&id)?;
        let parent_id = template
            .parent_id()
            .map(|parent| self.substitute_str(raw_id, parent))
            .transpose()?;
        let content = self.substitute(raw_id, template.content())?;

        Ok(PolicyDocument::with_parts(
            id,
            parent_id,
            template.source().to_path_buf(),
            content,
        ))
    }
}
