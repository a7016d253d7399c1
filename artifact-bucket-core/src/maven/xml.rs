//! Small quick-xml helpers shared by the Maven documents.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::DocumentError;

/// Indented writer with the XML declaration already emitted.
pub(crate) struct XmlDocument<'k> {
    key: &'k str,
    writer: Writer<Cursor<Vec<u8>>>,
}

impl<'k> XmlDocument<'k> {
    pub(crate) fn new(key: &'k str) -> Result<Self, DocumentError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| DocumentError::xml(key, e))?;
        Ok(Self { key, writer })
    }

    pub(crate) fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), DocumentError> {
        let mut start = BytesStart::new(name);
        for attribute in attributes {
            start.push_attribute(*attribute);
        }
        self.writer
            .write_event(Event::Start(start))
            .map_err(|e| DocumentError::xml(self.key, e))
    }

    pub(crate) fn close(&mut self, name: &str) -> Result<(), DocumentError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| DocumentError::xml(self.key, e))
    }

    pub(crate) fn text_element(&mut self, name: &str, text: &str) -> Result<(), DocumentError> {
        self.open(name, &[])?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| DocumentError::xml(self.key, e))?;
        self.close(name)
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner().into_inner();
        bytes.push(b'\n');
        bytes
    }
}

/// One node reported while walking a document. `path` holds the local names
/// of the enclosing elements, outermost first; for `End` it still includes
/// the element being closed.
pub(crate) enum Node<'a> {
    Text { path: &'a [String], text: &'a str },
    End { path: &'a [String] },
}

/// Walk a document, reporting every non-blank text node and every closing tag.
pub(crate) fn visit<F>(key: &str, bytes: &[u8], mut on_node: F) -> Result<(), DocumentError>
where
    F: FnMut(Node<'_>),
{
    let content = std::str::from_utf8(bytes).map_err(|e| DocumentError::xml(key, e))?;
    let mut reader = Reader::from_str(content);
    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                saw_root = true;
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Empty(ref e)) => {
                saw_root = true;
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                on_node(Node::End { path: &path });
                path.pop();
            }
            Ok(Event::End(_)) => {
                on_node(Node::End { path: &path });
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|err| DocumentError::xml(key, err))?;
                let text = text.trim();
                if !text.is_empty() && !path.is_empty() {
                    on_node(Node::Text { path: &path, text });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DocumentError::xml(key, e)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(DocumentError::xml(key, "document has no root element"));
    }
    if !path.is_empty() {
        return Err(DocumentError::xml(key, format!("unclosed element <{}>", path.join("/"))));
    }
    Ok(())
}

/// Name of the root element, used to reject unrelated documents.
pub(crate) fn root_name(key: &str, bytes: &[u8]) -> Result<String, DocumentError> {
    let content = std::str::from_utf8(bytes).map_err(|e| DocumentError::xml(key, e))?;
    let mut reader = Reader::from_str(content);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
            }
            Ok(Event::Eof) => return Err(DocumentError::xml(key, "document has no root element")),
            Err(e) => return Err(DocumentError::xml(key, e)),
            _ => {}
        }
    }
}
