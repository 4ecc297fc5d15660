//! Tool-block extraction.
//!
//! Scans normalized output for concatenated tool XML blocks, tolerating
//! arbitrary surrounding text. CDATA sections are skipped when searching
//! for closing tags, so payloads containing `</…>` text cannot truncate a
//! block.

use codeact_core::action::ActionType;

/// One extracted block, in source order.
#[derive(Clone, Debug)]
pub struct RawBlock {
    pub name: String,
    pub xml: String,
    pub start: usize,
    pub end: usize,
    pub error: Option<String>,
}

/// Extract all recognized tool blocks from `text`.
pub fn extract_blocks(text: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('<') {
        let lt = pos + rel;
        let after = &text[lt + 1..];

        if after.starts_with("![CDATA[") {
            // Stray top-level CDATA: skip it whole.
            pos = match text[lt..].find("]]>") {
                Some(i) => lt + i + 3,
                None => break,
            };
            continue;
        }

        let name_len = after
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || *c == '_')
            .count();
        if name_len == 0 || !after[name_len..].starts_with('>') {
            pos = lt + 1;
            continue;
        }
        let name = &after[..name_len];
        if ActionType::from_name(name).is_none() {
            pos = lt + 1;
            continue;
        }

        let body_start = lt + 1 + name_len + 1;
        match find_close(text, body_start, name) {
            Some(end) => {
                blocks.push(RawBlock {
                    name: name.to_owned(),
                    xml: text[lt..end].to_owned(),
                    start: lt,
                    end,
                    error: None,
                });
                pos = end;
            }
            None => {
                blocks.push(RawBlock {
                    name: name.to_owned(),
                    xml: text[lt..].to_owned(),
                    start: lt,
                    end: text.len(),
                    error: Some(format!("missing </{name}> closing tag")),
                });
                break;
            }
        }
    }

    blocks
}

/// Find the end (exclusive) of `</name>` at or after `from`, skipping CDATA
/// sections. `None` when the block never closes.
fn find_close(text: &str, from: usize, name: &str) -> Option<usize> {
    let close = format!("</{name}>");
    let mut pos = from;

    loop {
        let cdata_at = text[pos..].find("<![CDATA[").map(|i| pos + i);
        let close_at = text[pos..].find(&close).map(|i| pos + i);

        match (cdata_at, close_at) {
            (Some(cd), Some(cl)) if cd < cl => {
                pos = text[cd..].find("]]>").map(|i| cd + i + 3)?;
            }
            (_, Some(cl)) => return Some(cl + close.len()),
            (Some(cd), None) => {
                pos = text[cd..].find("]]>").map(|i| cd + i + 3)?;
            }
            (None, None) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_with_surrounding_text() {
        let text = "Let me read it.\n<read_file><path>a.py</path></read_file>\nDone.";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "read_file");
        assert!(blocks[0].xml.starts_with("<read_file>"));
        assert!(blocks[0].xml.ends_with("</read_file>"));
        assert!(blocks[0].error.is_none());
    }

    #[test]
    fn multiple_concatenated_blocks_ordered() {
        let text = "<read_file><path>a</path></read_file><terminal_run><command>ls</command></terminal_run>";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "read_file");
        assert_eq!(blocks[1].name, "terminal_run");
        assert!(blocks[0].end <= blocks[1].start);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let text = "<p>html-ish</p><made_up_tool><x>1</x></made_up_tool><read_file><path>a</path></read_file>";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "read_file");
    }

    #[test]
    fn cdata_with_closing_tag_text_does_not_truncate() {
        let text = "<write_code><path>a.html</path><content><![CDATA[</write_code> is how a block ends]]></content></write_code>";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].error.is_none());
        assert!(blocks[0].xml.contains("is how a block ends"));
        assert!(blocks[0].xml.ends_with("</write_code>"));
    }

    #[test]
    fn unterminated_block_reported() {
        let text = "<write_code><path>a</path><content>never closed";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].error.as_deref().unwrap().contains("closing tag"));
    }

    #[test]
    fn offsets_point_into_source() {
        let text = "xx<read_file><path>a</path></read_file>yy";
        let blocks = extract_blocks(text);
        assert_eq!(blocks[0].start, 2);
        assert_eq!(&text[blocks[0].start..blocks[0].end], blocks[0].xml);
    }

    #[test]
    fn no_blocks_in_plain_text() {
        assert!(extract_blocks("a < b, b > c, all prose").is_empty());
    }
}
