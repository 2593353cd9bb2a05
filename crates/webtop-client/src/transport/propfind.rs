//! PROPFIND multistatus parsing
//!
//! Elements are matched by local name so any namespace prefix works.
//! Properties are only taken from `propstat` blocks whose status is 2xx
//! (or that carry no status at all).

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use webtop_core::CallError;

/// Properties requested by every PROPFIND
pub const PROPERTIES: [&str; 7] = [
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getlastmodified",
    "getetag",
    "resourcetype",
    "quota-available-bytes",
];

/// PROPFIND request body asking for [`PROPERTIES`] in namespace `ns`
pub fn request_body(ns: &str) -> String {
    let props: String = PROPERTIES.iter().map(|p| format!("<d:{}/>", p)).collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><d:propfind xmlns:d="{}"><d:prop>{}</d:prop></d:propfind>"#,
        ns, props
    )
}

/// One `response` element of a multistatus body
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DavEntry {
    /// Raw href as sent by the server (may be percent-encoded)
    pub href: String,
    pub display_name: Option<String>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub is_collection: bool,
    pub quota_available: Option<u64>,
}

#[derive(Default)]
struct RawPropstat {
    status: Option<String>,
    props: HashMap<String, String>,
    collection: bool,
}

impl RawPropstat {
    fn is_ok(&self) -> bool {
        match &self.status {
            None => true,
            Some(status) => status
                .split_whitespace()
                .nth(1)
                .map_or(false, |code| code.starts_with('2')),
        }
    }
}

#[derive(Default)]
struct RawResponse {
    href: Option<String>,
    propstats: Vec<RawPropstat>,
}

fn parse_number(name: &str, value: Option<&String>) -> Result<Option<u64>, String> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{} is not a number: {:?}", name, v)),
    }
}

impl RawResponse {
    fn into_entry(self) -> Result<DavEntry, String> {
        let href = self.href.ok_or_else(|| "response without href".to_string())?;

        let mut props = HashMap::new();
        let mut collection = false;
        for propstat in self.propstats.into_iter().filter(RawPropstat::is_ok) {
            collection |= propstat.collection;
            props.extend(propstat.props);
        }

        Ok(DavEntry {
            content_length: parse_number("getcontentlength", props.get("getcontentlength"))?,
            quota_available: parse_number(
                "quota-available-bytes",
                props.get("quota-available-bytes"),
            )?,
            display_name: props.remove("displayname"),
            content_type: props.remove("getcontenttype"),
            last_modified: props.remove("getlastmodified"),
            etag: props.remove("getetag").map(|e| e.trim_matches('"').to_string()),
            is_collection: collection,
            href,
        })
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Parse a `207 Multi-Status` body
///
/// Entries without an href or with malformed numeric properties are
/// skipped with a warning; a body that is not a multistatus document at
/// all is a protocol error.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, CallError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut entries = Vec::new();
    let mut response: Option<RawResponse> = None;
    let mut propstat: Option<RawPropstat> = None;
    let mut saw_multistatus = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            CallError::Protocol(format!(
                "invalid multistatus at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                match name.as_str() {
                    "multistatus" => saw_multistatus = true,
                    "response" => response = Some(RawResponse::default()),
                    "propstat" => propstat = Some(RawPropstat::default()),
                    "collection" => mark_collection(&stack, &mut propstat),
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                if name == "collection" {
                    mark_collection(&stack, &mut propstat);
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| CallError::Protocol(format!("invalid text in multistatus: {}", e)))?
                    .into_owned();
                let Some(current) = stack.last().map(String::as_str) else {
                    continue;
                };
                let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

                match (parent, current) {
                    (Some("response"), "href") => {
                        if let Some(r) = response.as_mut() {
                            r.href = Some(text);
                        }
                    }
                    (Some("propstat"), "status") => {
                        if let Some(p) = propstat.as_mut() {
                            p.status = Some(text);
                        }
                    }
                    (Some("prop"), prop) => {
                        if let Some(p) = propstat.as_mut() {
                            p.props.insert(prop.to_string(), text);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(_) => match stack.pop().as_deref() {
                Some("propstat") => {
                    if let (Some(p), Some(r)) = (propstat.take(), response.as_mut()) {
                        r.propstats.push(p);
                    }
                }
                Some("response") => {
                    if let Some(r) = response.take() {
                        match r.into_entry() {
                            Ok(entry) => entries.push(entry),
                            Err(reason) => warn!("skipping multistatus entry: {}", reason),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_multistatus {
        return Err(CallError::Protocol("response is not a multistatus document".into()));
    }
    Ok(entries)
}

fn mark_collection(stack: &[String], propstat: &mut Option<RawPropstat>) {
    if stack.last().map(String::as_str) == Some("resourcetype") {
        if let Some(p) = propstat.as_mut() {
            p.collection = true;
        }
    }
}
