//! The flat `<xml>` envelope WeChat Pay uses for requests, responses and callbacks.
//!
//! ```xml
//! <xml>
//!   <return_code><![CDATA[SUCCESS]]></return_code>
//!   <total_fee>1</total_fee>
//! </xml>
//! ```
//!
//! Only one level of nesting is meaningful. Deeper elements are ignored.
use quick_xml::{
    events::{BytesCData, BytesEnd, BytesStart, BytesText, Event},
    Reader,
    Writer,
};

use crate::providers::{ProviderError, SignedParams};

pub fn parse_flat_xml(xml: &str) -> Result<SignedParams, ProviderError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut fields = SignedParams::new();
    let mut depth = 0usize;
    let mut current: Option<(String, String)> = None;
    let mut saw_root = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                match depth {
                    1 => saw_root = true,
                    2 => {
                        let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                        current = Some((name, String::new()));
                    },
                    _ => {},
                }
            },
            Ok(Event::Empty(e)) if depth == 1 => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                fields.insert(name, String::new());
            },
            Ok(Event::Text(t)) if depth == 2 => {
                let text = t.unescape().map_err(|e| ProviderError::ParseError(e.to_string()))?;
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&text);
                }
            },
            Ok(Event::CData(c)) if depth == 2 => {
                let text = String::from_utf8(c.into_inner().into_owned())
                    .map_err(|e| ProviderError::ParseError(e.to_string()))?;
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&text);
                }
            },
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some((name, value)) = current.take() {
                        fields.insert(name, value);
                    }
                }
                depth = depth.saturating_sub(1);
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(ProviderError::ParseError(format!("Invalid XML at {}: {e}", reader.buffer_position()))),
        }
    }
    if !saw_root {
        return Err(ProviderError::ParseError("Payload is not an XML document".to_string()));
    }
    Ok(fields)
}

/// Renders the parameters as `<xml><k><![CDATA[v]]></k>…</xml>`, in key order.
pub fn to_cdata_xml(params: &SignedParams) -> Result<String, ProviderError> {
    let err = |e: quick_xml::Error| ProviderError::ParseError(format!("Could not render XML: {e}"));
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("xml"))).map_err(err)?;
    for (k, v) in params {
        writer.write_event(Event::Start(BytesStart::new(k.as_str()))).map_err(err)?;
        if v.contains("]]>") {
            writer.write_event(Event::Text(BytesText::new(v))).map_err(err)?;
        } else {
            writer.write_event(Event::CData(BytesCData::new(v.as_str()))).map_err(err)?;
        }
        writer.write_event(Event::End(BytesEnd::new(k.as_str()))).map_err(err)?;
    }
    writer.write_event(Event::End(BytesEnd::new("xml"))).map_err(err)?;
    String::from_utf8(writer.into_inner()).map_err(|e| ProviderError::ParseError(e.to_string()))
}
