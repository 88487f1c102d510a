//! Incremental RSS 2.0 serialization.
//!
//! The document is produced in one pass while the session is still fetching:
//! `start_feed` → `write_feed_title` → `write_feed_link` → `write_item`* →
//! `end_feed`. Nothing is buffered per feed; each call writes straight through
//! to the underlying sink, so a consumer holding a [`SharedBuffer`] sees the
//! document grow item by item.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::SecondsFormat;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use super::article::ArticleRecord;
use crate::util::{strip_control_chars, unescape_entities};

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const CONTENT_NAMESPACE: &str = "http://purl.org/rss/1.0/modules/content/";

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("XML write failed: {0}")]
    Xml(String),
}

/// A cloneable, thread-safe byte sink.
///
/// The session writes through one handle while callers read snapshots through
/// another.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Append-only writer for a single `rss > channel` document.
pub struct FeedWriter<W: Write> {
    writer: Writer<W>,
    started: bool,
    ended: bool,
}

impl<W: Write> FeedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new_with_indent(inner, b' ', 2),
            started: false,
            ended: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Writes the XML declaration, the `rss` root with its namespaces, and the
    /// channel's description and icon.
    pub fn start_feed(&mut self, description: &str, image_url: Option<&str>) -> Result<(), WriterError> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        self.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:dc", DC_NAMESPACE));
        rss.push_attribute(("xmlns:content", CONTENT_NAMESPACE));
        self.emit(Event::Start(rss))?;
        self.emit(Event::Start(BytesStart::new("channel")))?;

        self.text_element("description", description)?;
        if let Some(url) = image_url.filter(|u| !u.is_empty()) {
            self.emit(Event::Start(BytesStart::new("image")))?;
            self.text_element("url", url)?;
            self.emit(Event::End(BytesEnd::new("image")))?;
        }
        Ok(())
    }

    /// Channel title, entity-unescaped and wrapped in CDATA.
    pub fn write_feed_title(&mut self, title: &str) -> Result<(), WriterError> {
        self.cdata_element("title", &unescape_entities(title))
    }

    pub fn write_feed_link(&mut self, url: &str) -> Result<(), WriterError> {
        self.text_element("link", url)
    }

    pub fn write_item(&mut self, record: &ArticleRecord) -> Result<(), WriterError> {
        self.emit(Event::Start(BytesStart::new("item")))?;

        self.text_element("dc:creator", &record.author)?;
        self.cdata_element("content:encoded", &record.body)?;
        for category in &record.categories {
            self.text_element("category", category)?;
        }
        let date = record
            .date
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        self.text_element("dc:date", &date)?;
        for enclosure in &record.enclosures {
            let mut el = BytesStart::new("enclosure");
            el.push_attribute(("url", strip_control_chars(&enclosure.url).as_ref()));
            el.push_attribute(("type", strip_control_chars(&enclosure.mime_type).as_ref()));
            self.emit(Event::Empty(el))?;
        }
        self.cdata_element("title", &unescape_entities(&record.title))?;
        self.text_element("link", &record.url)?;

        self.emit(Event::End(BytesEnd::new("item")))
    }

    /// Closes `channel` and `rss`.
    ///
    /// Writes a bare header first if the feed was never started, so the sink
    /// always ends up holding a complete document. Calling it again is a no-op.
    pub fn end_feed(&mut self) -> Result<(), WriterError> {
        if self.ended {
            return Ok(());
        }
        if !self.started {
            self.start_feed("", None)?;
        }
        self.ended = true;

        self.emit(Event::End(BytesEnd::new("channel")))?;
        self.emit(Event::End(BytesEnd::new("rss")))?;
        self.writer
            .get_mut()
            .flush()
            .map_err(|e| WriterError::Xml(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn emit(&mut self, event: Event<'_>) -> Result<(), WriterError> {
        self.writer
            .write_event(event)
            .map_err(|e| WriterError::Xml(e.to_string()))
    }

    // Every string leaving the writer goes through strip_control_chars; raw
    // control bytes are illegal in XML 1.0 even inside CDATA.
    fn text_element(&mut self, name: &str, text: &str) -> Result<(), WriterError> {
        self.emit(Event::Start(BytesStart::new(name)))?;
        self.emit(Event::Text(BytesText::new(&strip_control_chars(text))))?;
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn cdata_element(&mut self, name: &str, text: &str) -> Result<(), WriterError> {
        self.emit(Event::Start(BytesStart::new(name)))?;
        let text = strip_control_chars(text);
        // "]]>" cannot appear inside a CDATA section; split it across two.
        let mut rest = text.as_ref();
        while let Some(pos) = rest.find("]]>") {
            self.emit(Event::CData(BytesCData::new(&rest[..pos + 2])))?;
            rest = &rest[pos + 2..];
        }
        self.emit(Event::CData(BytesCData::new(rest)))?;
        self.emit(Event::End(BytesEnd::new(name)))
    }
}
