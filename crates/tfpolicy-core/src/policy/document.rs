//! A single trust-framework policy file and its inheritance header.
//!
//! The identifier is the `PolicyId` attribute of the root element. The parent
//! reference is the text of `BasePolicy/PolicyId` directly below the root.
//! Element and attribute names are matched on their local name, so namespace
//! prefixes do not matter.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::policy::error::{PolicyError, PolicyResult};

const POLICY_ID: &str = "PolicyId";
const BASE_POLICY: &str = "BasePolicy";

/// One policy document, either a raw template or a resolved file.
///
/// Documents are immutable; settings substitution produces a new document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    id: String,
    parent_id: Option<String>,
    source: PathBuf,
    content: Vec<u8>,
}

impl PolicyDocument {
    /// Read and parse the policy at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let content = fs::read(path).map_err(|e| PolicyError::io(path, e))?;
        Self::from_bytes(path, content)
    }

    /// Parse `content`, attributing errors to `source`.
    pub fn from_bytes(source: impl Into<PathBuf>, content: Vec<u8>) -> PolicyResult<Self> {
        let source = source.into();
        let header = parse_header(&source, &content)?;
        validate_policy_id(&header.policy_id)?;
        Ok(Self {
            id: header.policy_id,
            parent_id: header.base_policy_id,
            source,
            content,
        })
    }

    /// Build a document whose header is already known (used for substitution output).
    pub(crate) fn with_parts(
        id: String,
        parent_id: Option<String>,
        source: PathBuf,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id,
            parent_id,
            source,
            content,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// `true` when the document declares a base policy.
    pub fn has_parent(&self) -> bool {
        self.parent_id.is_some()
    }

    /// The file the document was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// File name used for the resolved output: `<id>.xml`.
    pub fn file_name(&self) -> String {
        format!("{}.xml", self.id)
    }
}

/// Check that `id` can be used as the stem of `<id>.xml` inside one directory.
///
/// Rejects empty ids, path separators, `.`/`..` and control characters.
pub(crate) fn validate_policy_id(id: &str) -> PolicyResult<()> {
    let reason = if id.trim().is_empty() {
        Some("is empty")
    } else if id.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if id == "." || id == ".." {
        Some("is a relative directory name")
    } else if id.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PolicyError::InvalidPolicyId {
            policy_id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

struct PolicyHeader {
    policy_id: String,
    base_policy_id: Option<String>,
}

fn parse_header(path: &Path, content: &[u8]) -> PolicyResult<PolicyHeader> {
    let malformed = |detail: String| PolicyError::MalformedXml {
        path: path.to_path_buf(),
        detail,
    };

    let text =
        std::str::from_utf8(content).map_err(|e| malformed(format!("invalid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut policy_id: Option<String> = None;
    let mut base_policy_id: Option<String> = None;
    let mut base_policy_count = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {e}", reader.buffer_position())))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = local_name(e);
                if stack.is_empty() {
                    if seen_root {
                        return Err(malformed("multiple root elements".to_string()));
                    }
                    seen_root = true;
                    policy_id = policy_id_attribute(e).map_err(&malformed)?;
                } else if stack.len() == 1 && name == BASE_POLICY {
                    base_policy_count += 1;
                    if base_policy_count > 1 {
                        return Err(malformed("more than one BasePolicy element".to_string()));
                    }
                } else if in_base_policy(&stack) && name == POLICY_ID {
                    base_policy_id.get_or_insert_with(String::new);
                }

                if matches!(event, Event::Start(_)) {
                    stack.push(name);
                }
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(|e| malformed(e.to_string()))?;
                if stack.is_empty() {
                    return Err(malformed(format!(
                        "unexpected text outside the root element: {}",
                        truncate(&value, 32)
                    )));
                }
                if in_base_policy_id(&stack) {
                    base_policy_id
                        .get_or_insert_with(String::new)
                        .push_str(&value);
                }
            }
            Event::CData(c) => {
                if in_base_policy_id(&stack) {
                    let raw = c.into_inner();
                    let value = std::str::from_utf8(&raw).map_err(|e| malformed(e.to_string()))?;
                    base_policy_id.get_or_insert_with(String::new).push_str(value);
                }
            }
            Event::End(_) => {
                if stack.pop().is_none() {
                    return Err(malformed("unmatched closing tag".to_string()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!(
            "unexpected end of document, <{open}> is not closed"
        )));
    }
    if !seen_root {
        return Err(malformed("document has no root element".to_string()));
    }

    let policy_id = policy_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PolicyError::MissingPolicyId {
            path: path.to_path_buf(),
        })?;

    let base_policy_id = match base_policy_id.map(|p| p.trim().to_string()) {
        Some(parent) if parent.is_empty() => {
            return Err(PolicyError::EmptyParentId { policy_id });
        }
        other => other,
    };

    Ok(PolicyHeader {
        policy_id,
        base_policy_id,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn policy_id_attribute(e: &BytesStart<'_>) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == POLICY_ID.as_bytes() {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn in_base_policy(stack: &[String]) -> bool {
    stack.len() == 2 && stack[1] == BASE_POLICY
}

fn in_base_policy_id(stack: &[String]) -> bool {
    stack.len() == 3 && stack[1] == BASE_POLICY && stack[2] == POLICY_ID
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TrustFrameworkPolicy xmlns="http://schemas.microsoft.com/online/cpim/schemas/2013/06"
    TenantId="${Tenant}" PolicyId="B2C_1A_TrustFrameworkBase">
  <BuildingBlocks />
</TrustFrameworkPolicy>"#;

    const CHILD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<TrustFrameworkPolicy TenantId="${Tenant}" PolicyId="B2C_1A_TrustFrameworkExtensions">
  <BasePolicy>
    <TenantId>${Tenant}</TenantId>
    <PolicyId>B2C_1A_TrustFrameworkBase</PolicyId>
  </BasePolicy>
</TrustFrameworkPolicy>"#;

    fn parse(xml: &str) -> PolicyResult<PolicyDocument> {
        PolicyDocument::from_bytes("test.xml", xml.as_bytes().to_vec())
    }

    #[test]
    fn root_policy_has_no_parent() {
        let doc = parse(ROOT).unwrap();
        assert_eq!(doc.id(), "B2C_1A_TrustFrameworkBase");
        assert!(!doc.has_parent());
        assert_eq!(doc.parent_id(), None);
    }

    #[test]
    fn child_policy_reports_parent() {
        let doc = parse(CHILD).unwrap();
        assert_eq!(doc.id(), "B2C_1A_TrustFrameworkExtensions");
        assert!(doc.has_parent());
        assert_eq!(doc.parent_id(), Some("B2C_1A_TrustFrameworkBase"));
    }

    #[test]
    fn placeholders_in_identifiers_are_kept_verbatim() {
        let xml = r#"<TrustFrameworkPolicy PolicyId="B2C_1A_${Prefix}RP">
  <BasePolicy><PolicyId>B2C_1A_${Prefix}Ext</PolicyId></BasePolicy>
</TrustFrameworkPolicy>"#;
        let doc = parse(xml).unwrap();
        assert_eq!(doc.id(), "B2C_1A_${Prefix}RP");
        assert_eq!(doc.parent_id(), Some("B2C_1A_${Prefix}Ext"));
    }

    #[test]
    fn namespace_prefixes_are_ignored() {
        let xml = r#"<tf:TrustFrameworkPolicy xmlns:tf="urn:tf" tf:PolicyId="P1">
  <tf:BasePolicy><tf:PolicyId>P0</tf:PolicyId></tf:BasePolicy>
</tf:TrustFrameworkPolicy>"#;
        let doc = parse(xml).unwrap();
        assert_eq!(doc.id(), "P1");
        assert_eq!(doc.parent_id(), Some("P0"));
    }

    #[test]
    fn nested_policy_id_elements_are_not_parents() {
        let xml = r#"<TrustFrameworkPolicy PolicyId="P1">
  <RelyingParty><DefaultUserJourney ReferenceId="SignUp" />
    <PolicyId>not-a-parent</PolicyId>
  </RelyingParty>
</TrustFrameworkPolicy>"#;
        let doc = parse(xml).unwrap();
        assert!(!doc.has_parent());
    }

    #[test]
    fn missing_policy_id_is_rejected() {
        let err = parse("<TrustFrameworkPolicy><BuildingBlocks/></TrustFrameworkPolicy>")
            .unwrap_err();
        assert!(matches!(err, PolicyError::MissingPolicyId { .. }));
    }

    #[test]
    fn empty_base_policy_id_is_rejected() {
        let xml = r#"<TrustFrameworkPolicy PolicyId="P1">
  <BasePolicy><PolicyId>  </PolicyId></BasePolicy>
</TrustFrameworkPolicy>"#;
        let err = parse(xml).unwrap_err();
        assert!(matches!(err, PolicyError::EmptyParentId { .. }));
    }

    #[test]
    fn unclosed_root_is_malformed() {
        let err = parse(r#"<TrustFrameworkPolicy PolicyId="P1"><BasePolicy>"#).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedXml { .. }));
    }

    #[test]
    fn mismatched_tags_are_malformed() {
        let err = parse(r#"<TrustFrameworkPolicy PolicyId="P1"><A></B></TrustFrameworkPolicy>"#)
            .unwrap_err();
        assert!(matches!(err, PolicyError::MalformedXml { .. }));
    }

    #[test]
    fn plain_text_is_malformed() {
        let err = parse("this is not xml").unwrap_err();
        assert!(matches!(err, PolicyError::MalformedXml { .. }));
    }

    #[test]
    fn non_utf8_content_is_malformed() {
        let err = PolicyDocument::from_bytes("bad.xml", vec![0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedXml { .. }));
    }

    #[test]
    fn byte_order_mark_is_accepted() {
        let mut content = vec![0xef, 0xbb, 0xbf];
        content.extend_from_slice(ROOT.as_bytes());
        let doc = PolicyDocument::from_bytes("bom.xml", content).unwrap();
        assert_eq!(doc.id(), "B2C_1A_TrustFrameworkBase");
    }

    #[test]
    fn file_name_uses_policy_id() {
        let doc = parse(CHILD).unwrap();
        assert_eq!(doc.file_name(), "B2C_1A_TrustFrameworkExtensions.xml");
    }

    fn invalid_id_reason(id: &str) -> &'static str {
        match validate_policy_id(id).unwrap_err() {
            PolicyError::InvalidPolicyId { policy_id, reason } => {
                assert_eq!(policy_id, id);
                reason
            }
            other => panic!("expected InvalidPolicyId, got {other:?}"),
        }
    }

    #[test]
    fn empty_id_is_invalid() {
        assert_eq!(invalid_id_reason(""), "is empty");
        assert_eq!(invalid_id_reason("  "), "is empty");
    }

    #[test]
    fn forward_slash_in_id_is_invalid() {
        assert_eq!(invalid_id_reason("../../Base"), "contains a path separator");
        assert_eq!(invalid_id_reason("sub/Base"), "contains a path separator");
    }

    #[test]
    fn backslash_in_id_is_invalid() {
        assert_eq!(invalid_id_reason("..\\Base"), "contains a path separator");
    }

    #[test]
    fn dot_ids_are_invalid() {
        assert_eq!(invalid_id_reason("."), "is a relative directory name");
        assert_eq!(invalid_id_reason(".."), "is a relative directory name");
    }

    #[test]
    fn control_characters_in_id_are_invalid() {
        assert_eq!(invalid_id_reason("Base\u{0}"), "contains a control character");
        assert_eq!(invalid_id_reason("Ba\tse"), "contains a control character");
    }

    #[test]
    fn ordinary_ids_are_valid() {
        validate_policy_id("B2C_1A_TrustFrameworkBase").unwrap();
        validate_policy_id("B2C_1A_${Prefix}RP").unwrap();
        validate_policy_id("..Base").unwrap();
    }

    #[test]
    fn template_with_separator_in_id_is_rejected() {
        let err = parse(r#"<TrustFrameworkPolicy PolicyId="a/b" />"#).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicyId { .. }));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PolicyDocument::from_file(dir.path().join("nope.xml")).unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }
}
