//! A small owned XML tree for credential documents.
//!
//! Parsing keeps every text node, whitespace included, and serialization is
//! deterministic: the same tree always produces the same bytes, and parsing
//! those bytes yields the same tree again. Signatures over serialized
//! elements stay valid across a parse and re-serialize.

use std::{collections::HashSet, io::Cursor};

use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::error::DocumentError;

/// Attribute carrying element identifiers.
pub const XML_ID: &str = "xml:id";

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element
    Element(Element),
    /// Character data, unescaped
    Text(String),
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// An empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`Element::set_attribute`].
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder form of [`Element::push`].
    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    /// Builder form of [`Element::push_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// An element holding only `text`.
    pub fn text_element(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    /// Qualified name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Attribute value by qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Set or replace an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Append a child element.
    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Append text, merging with a preceding text node.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(Node::Text(existing)) => existing.push_str(&text),
            _ => self.children.push(Node::Text(text)),
        }
    }

    /// All children, text included.
    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Child elements.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    fn children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Child elements with local name `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children()
            .filter(move |child| child.local_name() == local(name))
    }

    /// First child element with local name `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        let name = local(name);
        self.children().find(|child| child.local_name() == name)
    }

    /// First child element with local name `name`, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        let name = local(name);
        self.children_mut().find(|child| child.local_name() == name)
    }

    /// Text of the first child named `name`.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(Element::text)
    }

    /// The element's own text nodes, concatenated.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Replace all children with one text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.push_text(text);
    }

    /// Drop every child element with local name `name`.
    pub fn remove_children(&mut self, name: &str) {
        let name = local(name);
        self.children.retain(|node| match node {
            Node::Element(child) => child.local_name() != name,
            Node::Text(_) => true,
        });
    }

    /// Descendants with local name `name`, depth first, self excluded.
    pub fn descendants_named(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        for child in self.children() {
            if child.local_name() == local(name) {
                found.push(child);
            }
            found.extend(child.descendants_named(name));
        }
        found
    }

    /// The element, self included, whose `xml:id` is `id`.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attribute(XML_ID) == Some(id) {
            return Some(self);
        }
        self.children().find_map(|child| child.find_by_id(id))
    }

    /// The element, self included, whose `xml:id` is `id`, mutably.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.attribute(XML_ID) == Some(id) {
            return Some(self);
        }
        self.children_mut().find_map(|child| child.find_by_id_mut(id))
    }

    /// Serialize this element and its subtree.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] if the writer fails.
    pub fn to_xml(&self) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_element(&mut writer, self)?;
        into_string(writer)
    }
}

/// A parsed or constructed document with one root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    /// Wrap a root element.
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parse XML text. The declaration, comments and processing
    /// instructions are dropped. Every `xml:id` must be unique, so an
    /// identifier names exactly one element.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Parse`] for malformed XML
    /// - [`DocumentError::Invalid`] for a repeated `xml:id`
    /// - [`DocumentError::MissingElement`] when there is no root element
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        let mut ids = HashSet::new();
        loop {
            match reader.read_event().map_err(parse_error)? {
                Event::Start(start) => stack.push(element_from(&start, &mut ids)?),
                Event::Empty(start) => {
                    attach(&mut stack, &mut root, element_from(&start, &mut ids)?)?
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DocumentError::Parse("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(text.unescape().map_err(parse_error)?.into_owned());
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(
                            String::from_utf8(data.into_inner().into_owned())
                                .map_err(parse_error)?,
                        );
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(DocumentError::Parse("unclosed element".into()));
        }
        root.map(Self::new)
            .ok_or_else(|| DocumentError::MissingElement("document root".into()))
    }

    /// The root element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// The root element, mutably.
    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// Serialize with an XML declaration.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] if the writer fails.
    pub fn to_xml(&self) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(parse_error)?;
        writer
            .write_event(Event::Text(BytesText::new("\n")))
            .map_err(parse_error)?;
        write_element(&mut writer, &self.root)?;
        into_string(writer)
    }
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn parse_error(error: impl std::fmt::Display) -> DocumentError {
    DocumentError::Parse(error.to_string())
}

fn element_from(
    start: &BytesStart<'_>,
    ids: &mut HashSet<String>,
) -> Result<Element, DocumentError> {
    let name = String::from_utf8(start.name().as_ref().to_vec()).map_err(parse_error)?;
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(parse_error)?;
        let key = String::from_utf8(attribute.key.as_ref().to_vec()).map_err(parse_error)?;
        let value = attribute.unescape_value().map_err(parse_error)?.into_owned();
        if key == XML_ID && !ids.insert(value.clone()) {
            return Err(DocumentError::Invalid {
                element: element.name,
                reason: format!("duplicate xml:id {value}"),
            });
        }
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => parent.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(DocumentError::Parse("more than one root element".into())),
    }
    Ok(())
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &Element,
) -> Result<(), DocumentError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(start)).map_err(parse_error)?;
    for node in &element.children {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(parse_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(parse_error)
}

fn into_string(writer: Writer<Cursor<Vec<u8>>>) -> Result<String, DocumentError> {
    String::from_utf8(writer.into_inner().into_inner()).map_err(parse_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
  <item xml:id="ref0" note="a &amp; b">one &lt;two&gt;</item>
  <ds:Signature xml:id="Sig_ref0"><ds:SignatureValue/></ds:Signature>
  <!-- dropped -->
  <empty/>
</root>"#;

    #[test]
    fn it_parses_text_attributes_and_ids() -> TestResult {
        let document = Document::parse(SAMPLE)?;
        let item = document.root().find_by_id("ref0").ok_or("no ref0")?;
        assert_eq!(item.text(), "one <two>");
        assert_eq!(item.attribute("note"), Some("a & b"));

        let signature = document.root().child("Signature").ok_or("no signature")?;
        assert_eq!(signature.name(), "ds:Signature");
        assert_eq!(signature.attribute(XML_ID), Some("Sig_ref0"));
        assert_eq!(document.root().descendants_named("SignatureValue").len(), 1);
        Ok(())
    }

    #[test]
    fn it_serializes_stably() -> TestResult {
        let document = Document::parse(SAMPLE)?;
        let once = document.to_xml()?;
        let twice = Document::parse(&once)?.to_xml()?;
        assert_eq!(once, twice);
        assert!(once.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<root"));
        assert!(once.contains("<empty></empty>"));
        Ok(())
    }

    #[test]
    fn it_builds_elements() -> TestResult {
        let element = Element::new("privilege")
            .with_child(Element::text_element("name", "embed"))
            .with_child(Element::text_element("can_delegate", "true"));
        assert_eq!(
            element.to_xml()?,
            "<privilege><name>embed</name><can_delegate>true</can_delegate></privilege>"
        );
        assert_eq!(element.child_text("can_delegate").as_deref(), Some("true"));

        let wanted = String::from("name");
        let found = element.child(&wanted);
        drop(wanted);
        assert_eq!(found.map(Element::text).as_deref(), Some("embed"));
        Ok(())
    }

    #[test]
    fn it_rejects_broken_documents() {
        assert!(matches!(
            Document::parse("<a><b></a>"),
            Err(DocumentError::Parse(_))
        ));
        assert_eq!(
            Document::parse("  "),
            Err(DocumentError::MissingElement("document root".into()))
        );
        assert!(matches!(
            Document::parse("<a/><b/>"),
            Err(DocumentError::Parse(_))
        ));
    }

    #[test]
    fn it_rejects_repeated_ids() {
        assert_eq!(
            Document::parse(r#"<a><wrap><c xml:id="ref0"/></wrap><c xml:id="ref0"/></a>"#),
            Err(DocumentError::Invalid {
                element: "c".into(),
                reason: "duplicate xml:id ref0".into(),
            })
        );
    }
}
