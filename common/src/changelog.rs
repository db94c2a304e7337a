// CHANGELOG.md section extraction and insertion

/// Release body used when the changelog has no section for the version
pub const NO_CHANGELOG: &str = "No changelog provided";

/// Extract the `# {version}` section from changelog content.
///
/// The section runs from its heading up to (not including) the next `# `
/// heading; the newline separating the two sections is dropped. Returns
/// [`NO_CHANGELOG`] when the heading is absent.
pub fn parse_changelog(version: &str, content: &str) -> String {
    if content.is_empty() {
        return NO_CHANGELOG.to_string();
    }

    let heading = format!("# {}", version);
    let Some(start) = heading_offset(content, &heading) else {
        return NO_CHANGELOG.to_string();
    };

    let section = &content[start..];
    match section.find("\n# ") {
        Some(end) => section[..end].to_string(),
        None => section.to_string(),
    }
}

/// Prepend a `# {version}` section to changelog content.
///
/// Returns None when a section for the version already exists, leaving the
/// file untouched.
pub fn insert_in_changelog(content: &str, version: &str, log: &str) -> Option<String> {
    let heading = format!("# {}", version);
    if heading_offset(content, &heading).is_some() {
        return None;
    }

    if content.is_empty() {
        Some(format!("{}\n{}\n", heading, log))
    } else {
        Some(format!("{}\n{}\n\n{}", heading, log, content))
    }
}

/// Byte offset of the line that consists exactly of `heading`
fn heading_offset(content: &str, heading: &str) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == heading {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}
