//! Structured XML element used as the exchange format with the key authority.
//!
//! [`XmlElement`] is a small owned tree (name, ordered attributes, child
//! nodes). The repository never looks inside it beyond the key id attribute;
//! the structure is produced and consumed entirely by the key authority.
//!
//! Parsing is whitespace-insensitive: text is trimmed and whitespace-only text
//! between elements is dropped. Serialization is compact (no indentation), so
//! `parse(to_compact_string(e)) == e` for any element obtained from `parse`.
//!
//! Qualified names and namespace declarations are kept verbatim as plain
//! names and attributes; no namespace resolution is performed.
//!
//! # Example
//!
//! ```
//! use xmlkeys_storage::XmlElement;
//!
//! let key = XmlElement::parse(r#"<key id="k1" version="1"><expirationDate>2030-01-01T00:00:00Z</expirationDate></key>"#)?;
//! assert_eq!(key.attribute("id"), Some("k1"));
//! assert_eq!(key.child("expirationDate").map(|e| e.text()).as_deref(), Some("2030-01-01T00:00:00Z"));
//! # Ok::<(), xmlkeys_storage::StoreError>(())
//! ```

use std::str::FromStr;

use quick_xml::{
    Reader, Writer,
    events::{BytesCData, BytesEnd, BytesStart, BytesText, Event},
};

use crate::error::{StoreError, StoreResult};

/// A child node of an [`XmlElement`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    /// Nested element.
    Element(XmlElement),
    /// Character data (stored unescaped).
    Text(String),
    /// `<![CDATA[...]]>` section.
    CData(String),
    /// `<!-- ... -->` comment.
    Comment(String),
}

/// An owned XML element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Creates an element with no attributes and no children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new() }
    }

    /// Adds (or replaces) an attribute and returns the element.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Appends a child element and returns the element.
    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Appends a text node and returns the element.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Appends a CDATA section and returns the element.
    #[must_use]
    pub fn with_cdata(mut self, data: impl Into<String>) -> Self {
        self.children.push(XmlNode::CData(data.into()));
        self
    }

    /// Appends a comment node and returns the element.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.children.push(XmlNode::Comment(comment.into()));
        self
    }

    /// Sets an attribute, replacing the value in place if it already exists.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// The element's (possibly prefixed) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an attribute value by exact name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// All attributes in document order.
    #[must_use]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// All child nodes in document order.
    #[must_use]
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Iterates over the child elements, skipping text and comments.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Returns the first child element with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|element| element.name == name)
    }

    /// Concatenated text and CDATA content of the direct children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) | XmlNode::CData(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Parses a single-rooted XML document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedPayload`] if the input is not
    /// well-formed, has no root element, has more than one root element, or
    /// has character data outside the root.
    pub fn parse(input: &str) -> StoreResult<Self> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut open: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    return Err(StoreError::malformed_payload_with_source(
                        format!("invalid XML near byte {}", reader.buffer_position()),
                        e,
                    ));
                },
            };

            match event {
                Event::Start(start) => {
                    if open.is_empty() && root.is_some() {
                        return Err(StoreError::malformed_payload(
                            "payload has more than one root element",
                        ));
                    }
                    open.push(Self::from_start(&start)?);
                },
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    attach(&mut open, &mut root, element)?;
                },
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| StoreError::malformed_payload("unmatched closing tag"))?;
                    attach(&mut open, &mut root, element)?;
                },
                Event::Text(text) => {
                    let content = text.unescape().map_err(|e| {
                        StoreError::malformed_payload_with_source("invalid character data", e)
                    })?;
                    push_character_data(&mut open, XmlNode::Text(content.into_owned()))?;
                },
                Event::CData(data) => {
                    let content = utf8(&data)?.to_owned();
                    push_character_data(&mut open, XmlNode::CData(content))?;
                },
                Event::Comment(comment) => {
                    // Comments outside the root carry nothing worth keeping.
                    if let Some(parent) = open.last_mut() {
                        parent.children.push(XmlNode::Comment(utf8(&comment)?.to_owned()));
                    }
                },
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {},
                Event::Eof => break,
            }
        }

        if let Some(unclosed) = open.last() {
            return Err(StoreError::malformed_payload(format!(
                "unclosed element <{}>",
                unclosed.name
            )));
        }

        root.ok_or_else(|| StoreError::malformed_payload("payload has no root element"))
    }

    /// Serializes the element without indentation or inserted whitespace.
    ///
    /// Childless elements are written self-closing. The output always parses
    /// back with [`parse`](Self::parse).
    ///
    /// # Errors
    ///
    /// - [`StoreError::MalformedPayload`] if an element or attribute name is
    ///   not an XML name, a comment contains `--` or ends with `-`, or a CDATA
    ///   section contains `]]>`
    /// - [`StoreError::Internal`] if the writer itself fails
    pub fn to_compact_string(&self) -> StoreResult<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| StoreError::internal_with_source("serialized XML is not UTF-8", e))
    }

    fn from_start(start: &BytesStart<'_>) -> StoreResult<Self> {
        let mut element = Self::new(utf8(start.name().as_ref())?);
        for attribute in start.attributes() {
            let attribute = attribute
                .map_err(|e| StoreError::malformed_payload_with_source("invalid attribute", e))?;
            let key = utf8(attribute.key.as_ref())?.to_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| StoreError::malformed_payload_with_source("invalid attribute value", e))?
                .into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> StoreResult<()> {
        check_name(&self.name, "element")?;
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            check_name(key, "attribute")?;
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() {
            return writer.write_event(Event::Empty(start)).map_err(write_failed);
        }

        writer.write_event(Event::Start(start)).map_err(write_failed)?;
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_to(writer)?,
                XmlNode::Text(text) => {
                    writer.write_event(Event::Text(BytesText::new(text))).map_err(write_failed)?;
                },
                XmlNode::CData(data) => {
                    if data.contains("]]>") {
                        return Err(StoreError::malformed_payload(
                            "CDATA section must not contain `]]>`",
                        ));
                    }
                    writer
                        .write_event(Event::CData(BytesCData::new(data.as_str())))
                        .map_err(write_failed)?;
                },
                XmlNode::Comment(comment) => {
                    if comment.contains("--") || comment.ends_with('-') {
                        return Err(StoreError::malformed_payload(
                            "comment must not contain `--` or end with `-`",
                        ));
                    }
                    writer
                        .write_event(Event::Comment(BytesText::from_escaped(comment.as_str())))
                        .map_err(write_failed)?;
                },
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str()))).map_err(write_failed)
    }
}

impl FromStr for XmlElement {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hands a completed element to its parent, or makes it the root.
fn attach(
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> StoreResult<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(StoreError::malformed_payload("payload has more than one root element"));
        },
    }
    Ok(())
}

fn push_character_data(open: &mut [XmlElement], node: XmlNode) -> StoreResult<()> {
    match open.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        },
        None => Err(StoreError::malformed_payload("character data outside the root element")),
    }
}

/// Checks `name` against the XML `Name` production.
fn check_name(name: &str, kind: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char);
    if valid {
        Ok(())
    } else {
        Err(StoreError::malformed_payload(format!("invalid {kind} name {name:?}")))
    }
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

fn utf8(bytes: &[u8]) -> StoreResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| StoreError::malformed_payload_with_source("payload is not valid UTF-8", e))
}

fn write_failed<E>(error: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::internal_with_source("failed to serialize XML element", error)
}
