//! XML utilities using quick-xml
//!
//! [`XmlWriter`] builds documents (the OVF environment); [`rewrite_element_text`]
//! edits the text of selected elements while streaming everything else
//! through unchanged (the `.vmxf` foundry file).

use std::fmt;
use std::io::Cursor;

use color_eyre::{eyre::eyre, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

/// A builder for creating XML documents with quick-xml
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl fmt::Debug for XmlWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlWriter")
            .field("len", &self.writer.get_ref().get_ref().len())
            .finish()
    }
}

impl XmlWriter {
    /// Create a new XML writer
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        }
    }

    /// Write `<?xml version="1.0" encoding="UTF-8"?>`
    pub fn write_declaration(&mut self) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| eyre!("Failed to write XML declaration: {}", e))?;
        Ok(())
    }

    /// Start an XML element with attributes
    pub fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(|e| eyre!("Failed to write start element: {}", e))?;
        Ok(())
    }

    /// Write a self-closing element with attributes
    pub fn write_empty_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.writer
            .write_event(Event::Empty(elem))
            .map_err(|e| eyre!("Failed to write empty element: {}", e))?;
        Ok(())
    }

    /// Write a simple element with text content
    pub fn write_text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start_element(name, &[])?;
        self.write_text(text)?;
        self.end_element(name)
    }

    /// Write text content
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        if !text.is_empty() {
            self.writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| eyre!("Failed to write text: {}", e))?;
        }
        Ok(())
    }

    /// End an XML element
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| eyre!("Failed to write end element: {}", e))?;
        Ok(())
    }

    /// Get the generated XML as a string
    pub fn into_string(self) -> Result<String> {
        let bytes = self.writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| eyre!("Failed to convert XML to string: {}", e))
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass the text of every `element` through `edit`, copying everything else
/// verbatim.
///
/// `edit` returns the replacement text or `None` to keep it. Returns the new
/// document and the number of `element` occurrences seen.
pub fn rewrite_element_text<F>(xml: &str, element: &str, mut edit: F) -> Result<(String, usize)>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut inside = false;
    let mut seen = 0;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| eyre!("Failed to parse XML at {}: {}", reader.buffer_position(), e))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if e.name().as_ref() == element.as_bytes() => {
                inside = true;
                seen += 1;
            }
            Event::End(ref e) if e.name().as_ref() == element.as_bytes() => {
                inside = false;
            }
            Event::Text(ref t) if inside => {
                let text = t
                    .unescape()
                    .map_err(|e| eyre!("Invalid text in <{element}>: {}", e))?;
                if let Some(new) = edit(&text) {
                    writer
                        .write_event(Event::Text(BytesText::new(&new)))
                        .map_err(|e| eyre!("Failed to write text: {}", e))?;
                    continue;
                }
            }
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|e| eyre!("Failed to write XML: {}", e))?;
    }

    let bytes = writer.into_inner().into_inner();
    let out = String::from_utf8(bytes).map_err(|e| eyre!("Failed to convert XML to string: {}", e))?;
    Ok((out, seen))
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_xml_writer_basic() {
        let mut writer = XmlWriter::new();
        writer.write_declaration().unwrap();
        writer.start_element("root", &[("xmlns", "urn:x")]).unwrap();
        writer.write_text_element("name", "a<b").unwrap();
        writer.write_empty_element("prop", &[("key", "k"), ("value", "v\"")]).unwrap();
        writer.end_element("root").unwrap();

        let xml = writer.into_string().unwrap();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><root xmlns="urn:x"><name>a&lt;b</name><prop key="k" value="v&quot;"/></root>"#
        );
    }

    #[test]
    fn test_xml_writer_empty_text() {
        let mut writer = XmlWriter::new();
        writer.write_text_element("empty", "").unwrap();
        assert_eq!(writer.into_string().unwrap(), "<empty></empty>");
    }

    #[test]
    fn test_rewrite_element_text() {
        let xml = "<?xml version=\"1.0\"?>\n<Foundry>\n<VM>\n<VMId type=\"string\">52 1c</VMId>\n<vmxPathName type=\"string\">web.vmx</vmxPathName></VM></Foundry>\n";
        let (out, seen) = rewrite_element_text(xml, "vmxPathName", |t| {
            (t == "web.vmx").then(|| "web&co.vmx".to_string())
        })
        .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(
            out,
            "<?xml version=\"1.0\"?>\n<Foundry>\n<VM>\n<VMId type=\"string\">52 1c</VMId>\n<vmxPathName type=\"string\">web&amp;co.vmx</vmxPathName></VM></Foundry>\n"
        );

        let (same, seen) = rewrite_element_text(xml, "vmxPathName", |_| None).unwrap();
        assert_eq!(seen, 1);
        assert_eq!(same, xml);

        let (_, seen) = rewrite_element_text(xml, "missing", |_| None).unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_rewrite_rejects_malformed() {
        assert!(rewrite_element_text("<a><b></a>", "b", |_| None).is_err());
    }
}
