//! `ContentProtection` elements of DASH manifests.

/*
    REFERENCES
    ----------

    1. https://dashif.org/identifiers/content_protection
    2. https://github.com/shaka-project/shaka-player/blob/b441518943241693fa2df03196be6ee707c8511e/lib/dash/content_protection.js

*/

use crate::Result;
use quick_xml::{
    events::{BytesStart, Event},
    name::{Namespace, ResolveResult},
    reader::NsReader,
};
use serde_json::Value;
use std::{borrow::Cow, ops::Range};
use wvkeys_mp4::pssh::SystemId;

const BRIGHTCOVE_NS: &[u8] = b"urn:brightcove:2015";
const WIDEVINE_KEY_SYSTEM: &str = "com.widevine.alpha";

/// One `ContentProtection` element, matched by local name in any namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentProtection {
    pub scheme_id_uri: Option<String>,
    /// Base64 text of the `pssh` child element.
    pub pssh: Option<String>,
    /// `licenseAcquisitionUrl` attribute in the `urn:brightcove:2015` namespace.
    pub license_url: Option<String>,
    span: Range<usize>,
}

impl ContentProtection {
    pub fn is_widevine(&self) -> bool {
        self.scheme_id_uri
            .as_deref()
            .is_some_and(|x| x.trim().eq_ignore_ascii_case(SystemId::WIDEVINE_URN))
    }
}

/// Every `ContentProtection` element of a manifest, in document order.
#[derive(Debug, Default)]
pub struct ContentProtections {
    pub elements: Vec<ContentProtection>,
}

impl ContentProtections {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = NsReader::from_str(xml);
        let mut elements = Vec::new();
        let mut current: Option<ContentProtection> = None;
        let mut in_pssh = false;

        loop {
            let start = reader.buffer_position() as usize;

            match reader.read_event()? {
                Event::Start(e) if is_content_protection(&e) => {
                    current = Some(element(&reader, &e, start)?);
                }
                Event::Empty(e) if is_content_protection(&e) => {
                    let mut x = element(&reader, &e, start)?;
                    x.span.end = reader.buffer_position() as usize;
                    elements.push(x);
                }
                Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"pssh" => {
                    in_pssh = true;
                }
                Event::Text(e) if in_pssh => {
                    if let Some(x) = current.as_mut() {
                        x.pssh
                            .get_or_insert_with(String::new)
                            .push_str(e.unescape()?.trim());
                    }
                }
                Event::End(e) if e.local_name().as_ref() == b"pssh" => {
                    in_pssh = false;
                }
                Event::End(e) if e.local_name().as_ref() == b"ContentProtection" => {
                    if let Some(mut x) = current.take() {
                        x.span.end = reader.buffer_position() as usize;
                        elements.push(x);
                    }
                }
                Event::Eof => break,
                _ => (),
            }
        }

        Ok(Self { elements })
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn widevine(&self) -> impl Iterator<Item = &ContentProtection> {
        self.elements.iter().filter(|x| x.is_widevine())
    }

    /// `xml` with every `ContentProtection` element cut out.
    pub fn strip<'a>(&self, xml: &'a str) -> Cow<'a, str> {
        if self.elements.is_empty() {
            return Cow::Borrowed(xml);
        }

        let mut out = String::with_capacity(xml.len());
        let mut offset = 0;

        for x in &self.elements {
            out.push_str(&xml[offset..x.span.start]);
            offset = x.span.end;
        }

        out.push_str(&xml[offset..]);
        Cow::Owned(out)
    }
}

fn is_content_protection(e: &BytesStart) -> bool {
    e.local_name().as_ref() == b"ContentProtection"
}

fn element(reader: &NsReader<&[u8]>, e: &BytesStart, start: usize) -> Result<ContentProtection> {
    let mut x = ContentProtection {
        span: start..start,
        ..Default::default()
    };

    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let (ns, local) = reader.resolve_attribute(attr.key);

        match (ns, local.as_ref()) {
            (ResolveResult::Unbound, b"schemeIdUri") => {
                x.scheme_id_uri = Some(attr.unescape_value()?.into_owned());
            }
            (ResolveResult::Bound(Namespace(BRIGHTCOVE_NS)), b"licenseAcquisitionUrl") => {
                x.license_url = Some(attr.unescape_value()?.into_owned());
            }
            _ => (),
        }
    }

    Ok(x)
}

/// Drop `key_systems` from Brightcove playback sources protected with
/// Widevine, so they are listed as plain sources.
///
/// Returns true when at least one source was changed.
pub fn strip_brightcove_key_systems(metadata: &mut Value) -> bool {
    let Some(sources) = metadata.get_mut("sources").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut stripped = false;

    for source in sources.iter_mut().filter_map(Value::as_object_mut) {
        let widevine = source
            .get("key_systems")
            .and_then(Value::as_object)
            .is_some_and(|x| x.contains_key(WIDEVINE_KEY_SYSTEM));

        if widevine {
            source.remove("key_systems");
            stripped = true;
        }
    }

    stripped
}
