use std::collections::BTreeSet;

/// How many leading bytes are inspected for frontmatter detection.
/// Only this prefix is ever buffered per file.
pub const FRONTMATTER_PROBE_BYTES: usize = 512;

/// Parsed result of a frontmatter probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontmatterProbe {
    pub present: bool,
    /// Top-level field names between the fences, when the closing fence
    /// falls inside the probed prefix
    pub fields: BTreeSet<String>,
}

/// Detect a leading `---` YAML frontmatter block in the first bytes of a
/// markdown file.
///
/// The block must start at byte zero with `---` on its own line; field names
/// are the unindented `name:` keys before the closing fence. A block whose
/// closing fence lies beyond the probed prefix still counts as present, but
/// only the fields seen inside the prefix are reported.
pub fn probe(prefix: &[u8]) -> FrontmatterProbe {
    let text = String::from_utf8_lossy(prefix);
    let mut lines = text.lines();

    match lines.next() {
        Some(first) if first.trim_end_matches('\r') == "---" => {}
        _ => return FrontmatterProbe::default(),
    }

    let mut fields = BTreeSet::new();
    let mut closed = false;
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line == "---" {
            closed = true;
            break;
        }
        // Top-level keys only: no leading whitespace, `name:` shape
        if !line.starts_with(' ') && !line.starts_with('\t') {
            if let Some(colon) = line.find(':') {
                let name = &line[..colon];
                if !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    fields.insert(name.to_string());
                }
            }
        }
    }

    // An unterminated fence with no fields at all is just a horizontal rule
    if !closed && fields.is_empty() {
        return FrontmatterProbe::default();
    }

    FrontmatterProbe {
        present: true,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_valid_frontmatter() {
        let content = b"---\ntitle: My Doc\nstatus: draft\ntags:\n  - a\n---\n# Heading\n";
        let result = probe(content);
        assert!(result.present);
        assert_eq!(
            result.fields.iter().collect::<Vec<_>>(),
            vec!["status", "tags", "title"]
        );
    }

    #[test]
    fn test_no_frontmatter() {
        assert!(!probe(b"# Just a heading\n").present);
        assert!(!probe(b"").present);
        assert!(!probe(b"text\n---\nkey: value\n---\n").present);
    }

    #[test]
    fn test_bare_rule_is_not_frontmatter() {
        // A leading horizontal rule with no keys and no closing fence
        assert!(!probe(b"---\n\nsome prose follows\n").present);
    }

    #[test]
    fn test_unclosed_block_with_fields_counts_as_present() {
        // Closing fence beyond the probe window
        let content = b"---\ntitle: Long\nauthor: someone\nmore prose that never closes";
        let result = probe(content);
        assert!(result.present);
        assert!(result.fields.contains("title"));
        assert!(result.fields.contains("author"));
    }

    #[test]
    fn test_nested_keys_are_ignored() {
        let content = b"---\nmeta:\n  nested: true\n---\n";
        let result = probe(content);
        assert!(result.present);
        assert_eq!(result.fields.iter().collect::<Vec<_>>(), vec!["meta"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let content = b"---\r\ntitle: Windows\r\n---\r\nbody";
        let result = probe(content);
        assert!(result.present);
        assert!(result.fields.contains("title"));
    }
}
