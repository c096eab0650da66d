//! Parsing of the ingest server's small XML replies.
//!
//! Replies look like `<resp res="1" fileid="123" />`. Fields may also be
//! sent as child elements (`<resp><res>1</res></resp>`); both forms are
//! accepted and merged, attributes taking precedence.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::TransferError;

/// Fields of an ingest reply, keyed by attribute or child element name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReply {
    fields: HashMap<String, String>,
}

impl IngestReply {
    /// Parses the first element of `xml` and its direct children.
    pub fn parse(xml: &str) -> Result<Self, TransferError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut fields = HashMap::new();
        let mut depth = 0usize;
        let mut current_child: Option<String> = None;
        let mut seen_root = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    depth += 1;
                    if depth == 1 {
                        seen_root = true;
                        collect_attributes(&e, &mut fields)?;
                    } else if depth == 2 {
                        current_child = Some(element_name(&e));
                    }
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        seen_root = true;
                        collect_attributes(&e, &mut fields)?;
                        break;
                    }
                }
                Event::Text(t) => {
                    if depth == 2
                        && let Some(name) = current_child.as_ref()
                    {
                        let text = t.unescape()?.into_owned();
                        fields.entry(name.clone()).or_insert(text);
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        current_child = None;
                    }
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(TransferError::Protocol("empty ingest reply".into()));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Interprets the reply of the multipart upload POST.
    ///
    /// Returns the server-assigned file id on success.
    pub fn into_upload_result(self) -> Result<u64, TransferError> {
        let code = self
            .get("res")
            .ok_or_else(|| TransferError::Protocol("upload reply without result code".into()))?;
        if !is_ok_code(code) {
            return Err(TransferError::UploadRejected {
                code: code.to_string(),
                message: self
                    .get("errorMessage")
                    .filter(|m| !m.is_empty())
                    .map(str::to_string),
            });
        }
        let id = self
            .get("fileid")
            .ok_or_else(|| TransferError::Protocol("upload reply without fileid".into()))?;
        id.trim()
            .parse()
            .map_err(|_| TransferError::Protocol(format!("invalid fileid {id:?}")))
    }

    /// Interprets the reply of the resume checkpoint query.
    pub fn into_checkpoint(self) -> Result<u64, TransferError> {
        let size = self
            .get("file_size")
            .ok_or_else(|| TransferError::Protocol("checkpoint reply without file_size".into()))?;
        size.trim()
            .parse()
            .map_err(|_| TransferError::Protocol(format!("invalid file_size {size:?}")))
    }
}

/// Parses an upload reply body into the new file id.
pub fn parse_upload_reply(xml: &str) -> Result<u64, TransferError> {
    IngestReply::parse(xml)?.into_upload_result()
}

/// Parses a checkpoint reply body into the durable byte count.
pub fn parse_checkpoint_reply(xml: &str) -> Result<u64, TransferError> {
    IngestReply::parse(xml)?.into_checkpoint()
}

fn is_ok_code(code: &str) -> bool {
    let code = code.trim();
    code == "1" || code.eq_ignore_ascii_case("ok")
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn collect_attributes(
    e: &BytesStart<'_>,
    fields: &mut HashMap<String, String>,
) -> Result<(), TransferError> {
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        let value = quick_xml::escape::unescape(&raw)
            .map_err(quick_xml::Error::from)?
            .into_owned();
        fields.insert(key, value);
    }
    Ok(())
}
