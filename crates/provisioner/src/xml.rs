//! Indented XML writer for libvirt documents

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::ProvisionError;

/// Streaming writer producing two-space indented XML
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

impl std::fmt::Debug for XmlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlWriter").finish_non_exhaustive()
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn element<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for attr in attrs {
        start.push_attribute(*attr);
    }
    start
}

impl XmlWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), ProvisionError> {
        self.writer
            .write_event(event)
            .map_err(|e| ProvisionError::Xml(e.to_string()))
    }

    /// Open `<name attrs...>`
    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ProvisionError> {
        self.write(Event::Start(element(name, attrs)))
    }

    /// Close `</name>`
    pub fn end_element(&mut self, name: &str) -> Result<(), ProvisionError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// Write `<name attrs.../>`
    pub fn write_empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ProvisionError> {
        self.write(Event::Empty(element(name, attrs)))
    }

    /// Write `<name>text</name>`
    pub fn write_text_element(&mut self, name: &str, text: &str) -> Result<(), ProvisionError> {
        self.write_text_element_with_attrs(name, text, &[])
    }

    /// Write `<name attrs...>text</name>`
    pub fn write_text_element_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attrs: &[(&str, &str)],
    ) -> Result<(), ProvisionError> {
        self.start_element(name, attrs)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end_element(name)
    }

    /// Finish and return the document
    pub fn into_string(self) -> Result<String, ProvisionError> {
        let mut xml = String::from_utf8(self.writer.into_inner()).map_err(|e| ProvisionError::Xml(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }
}
