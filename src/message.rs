//! Minimal stand-in for the out-of-scope tree-serialization collaborator
//! (§6). Production embedders bring their own document type and
//! [`MessageCodec`] impl; [`DefaultCodec`] exists so this crate's own tests
//! and the §8 scenarios are self-contained without an XML dependency.

use std::collections::BTreeMap;

/// A minimal tag + attributes + children value, deep enough to exercise
/// send/receive end-to-end (§8) without pulling in a full document model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageTree {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<MessageTree>,
    pub text: Option<String>,
}

impl MessageTree {
    pub fn new(tag: impl Into<String>) -> Self {
        MessageTree {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: MessageTree) -> Self {
        self.children.push(child);
        self
    }
}

/// Serializes/parses a [`MessageTree`] to and from the NUL-terminated
/// payload bytes a frame carries (§6). Implementations own the wire format
/// of the attribute/child encoding; only the NUL terminator is mandated by
/// the frame layer itself.
pub trait MessageCodec {
    fn serialize(tree: &MessageTree) -> Vec<u8>;
    fn parse(bytes: &[u8]) -> Option<MessageTree>;
}

/// A line-oriented encoding good enough to round-trip every `MessageTree`
/// this crate's tests construct: one line per node, indentation-delimited,
/// `tag key=value key=value :text` per line. Not meant to be a serious wire
/// format for production embedders — see the module docs.
pub struct DefaultCodec;

impl MessageCodec for DefaultCodec {
    fn serialize(tree: &MessageTree) -> Vec<u8> {
        let mut out = String::new();
        write_node(tree, 0, &mut out);
        out.push('\0');
        out.into_bytes()
    }

    fn parse(bytes: &[u8]) -> Option<MessageTree> {
        let text = std::str::from_utf8(bytes).ok()?;
        let text = text.strip_suffix('\0').unwrap_or(text);
        let mut lines = text.lines().peekable();
        parse_node(&mut lines, 0)
    }
}

fn write_node(node: &MessageTree, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.tag);
    for (k, v) in &node.attrs {
        out.push(' ');
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    if let Some(text) = &node.text {
        out.push_str(" :");
        out.push_str(text);
    }
    out.push('\n');
    for child in &node.children {
        write_node(child, depth + 1, out);
    }
}

fn parse_node(
    lines: &mut std::iter::Peekable<std::str::Lines<'_>>,
    depth: usize,
) -> Option<MessageTree> {
    let line = lines.next()?;
    let indent = "  ".repeat(depth);
    let rest = line.strip_prefix(&indent)?;

    let (head, text) = match rest.split_once(" :") {
        Some((h, t)) => (h, Some(t.to_string())),
        None => (rest, None),
    };

    let mut parts = head.split(' ');
    let tag = parts.next()?.to_string();
    let mut attrs = BTreeMap::new();
    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            attrs.insert(k.to_string(), v.to_string());
        }
    }

    let mut children = Vec::new();
    let child_indent = "  ".repeat(depth + 1);
    while let Some(next) = lines.peek() {
        if !next.starts_with(&child_indent) {
            break;
        }
        children.push(parse_node(lines, depth + 1)?);
    }

    Some(MessageTree {
        tag,
        attrs,
        children,
        text,
    })
}
