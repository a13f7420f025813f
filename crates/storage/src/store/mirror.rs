#![forbid(unsafe_code)]

use super::error::StoreError;
use super::metadata::MetadataStore;
use crate::fsio;
use crate::layout::{ProjectLayout, SPEC_FILE};
use serde_yaml::Mapping;
use std::path::PathBuf;
use sw_core::Status;
use sw_core::ids::IncrementId;

const DELIMITER: &str = "---";

/// Parsed `---` header block at the top of a markdown document.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontMatter {
    pub fields: Mapping,
    /// Byte offset where the body (after the closing delimiter line) begins.
    pub body_offset: usize,
}

impl FrontMatter {
    pub fn parse(text: &str) -> Result<Self, String> {
        let span = header_span(text).ok_or_else(|| "missing front-matter header".to_string())?;
        let header = &text[span.start..span.close];
        let fields = if header.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str::<Mapping>(header)
                .map_err(|err| format!("malformed front-matter: {err}"))?
        };
        Ok(Self {
            fields,
            body_offset: span.body,
        })
    }

    pub fn status(&self) -> Result<Status, String> {
        let Some(value) = self.fields.get("status") else {
            return Err("front-matter has no status".to_string());
        };
        let Some(raw) = value.as_str() else {
            return Err("front-matter status is not a string".to_string());
        };
        Status::parse(raw).ok_or_else(|| format!("unknown status {raw:?}"))
    }
}

struct HeaderSpan {
    /// First byte after the opening delimiter line.
    start: usize,
    /// First byte of the closing delimiter line.
    close: usize,
    /// First byte after the closing delimiter line.
    body: usize,
}

fn header_span(text: &str) -> Option<HeaderSpan> {
    let first_end = text.find('\n')?;
    if text[..first_end].trim_end_matches('\r') != DELIMITER {
        return None;
    }
    let start = first_end + 1;
    let mut offset = start;
    for line in text[start..].split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            return Some(HeaderSpan {
                start,
                close: offset,
                body: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

const STATUS_KEYS: [&str; 3] = ["status", "\"status\"", "'status'"];

/// `Some((key, rest after the colon))` for a top-level `status` key line, bare or quoted.
fn status_line_value(line: &str) -> Option<(&str, &str)> {
    STATUS_KEYS.iter().find_map(|key| {
        let rest = line.strip_prefix(key)?;
        let value = rest.trim_start_matches([' ', '\t']).strip_prefix(':')?;
        Some((&line[..key.len()], value))
    })
}

fn render_status_line(
    key: &str,
    previous_value: Option<&str>,
    status: Status,
    ending: &str,
) -> String {
    let value = previous_value
        .map(|v| v.trim_end_matches(['\r', '\n']).trim())
        .unwrap_or("");
    let quote = match value.chars().next() {
        Some(q @ ('"' | '\'')) => Some(q),
        _ => None,
    };
    let comment = value.find(" #").map(|idx| &value[idx..]).unwrap_or("");
    match quote {
        Some(q) => format!("{key}: {q}{}{q}{comment}{ending}", status.as_str()),
        None => format!("{key}: {}{comment}{ending}", status.as_str()),
    }
}

/// Rewrites only the header's `status:` line. Every other byte of the document is kept.
pub(crate) fn rewrite_status(text: &str, status: Status) -> Result<String, String> {
    let parsed = FrontMatter::parse(text)?;
    let span = header_span(text).ok_or_else(|| "missing front-matter header".to_string())?;
    let opening_ending = line_ending(&text[..span.start]);

    let mut out = String::with_capacity(text.len() + 24);
    out.push_str(&text[..span.start]);
    let mut replaced = false;
    for line in text[span.start..span.close].split_inclusive('\n') {
        match status_line_value(line) {
            Some((key, value)) if !replaced => {
                out.push_str(&render_status_line(key, Some(value), status, line_ending(line)));
                replaced = true;
            }
            _ => out.push_str(line),
        }
    }
    if !replaced {
        // A status key the line scan cannot see (flow or complex-key syntax) must not be
        // duplicated.
        if parsed.fields.contains_key("status") {
            return Err("front-matter status key is not on its own line".to_string());
        }
        out.push_str(&render_status_line("status", None, status, opening_ending));
    }
    out.push_str(&text[span.close..]);
    Ok(out)
}

/// The human-edited `spec.md` whose header carries a copy of the increment status.
#[derive(Clone, Debug)]
pub struct DocumentMirror {
    layout: ProjectLayout,
}

impl DocumentMirror {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, id: &IncrementId) -> Result<PathBuf, StoreError> {
        self.layout
            .locate(id)
            .map(|(_, dir)| dir.join(SPEC_FILE))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn read_text(&self, id: &IncrementId) -> Result<String, StoreError> {
        let path = self.path(id)?;
        fsio::read_optional(&path)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn read_status(&self, id: &IncrementId) -> Result<Status, StoreError> {
        let path = self.path(id)?;
        let Some(text) = fsio::read_optional(&path)? else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        FrontMatter::parse(&text)
            .and_then(|fm| fm.status())
            .map_err(|message| StoreError::Parse { path, message })
    }

    pub fn update_status(&self, id: &IncrementId, status: Status) -> Result<(), StoreError> {
        let path = self.path(id)?;
        let Some(text) = fsio::read_optional(&path)? else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let updated = rewrite_status(&text, status).map_err(|message| StoreError::Parse {
            path: path.clone(),
            message,
        })?;
        if updated != text {
            fsio::write_atomic(&path, updated.as_bytes())?;
        }
        Ok(())
    }

    /// Forces the document to the metadata status. Metadata always wins.
    pub fn repair(&self, metadata: &MetadataStore, id: &IncrementId) -> Result<Status, StoreError> {
        let status = metadata.read(id)?.status;
        self.update_status(id, status)?;
        tracing::info!(increment = %id, status = %status, "spec.md status repaired from metadata");
        Ok(status)
    }
}
