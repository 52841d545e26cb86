// SPDX-License-Identifier: GPL-3.0-only

//! Detection result types
//!
//! Candidates are reported in the pixel space of the frame they were found
//! in. The workflow maps them into view space with a [`Viewport`].
//!
//! [`Viewport`]: crate::app::workflow::Viewport

use crate::backends::camera::types::{LensFacing, Resolution, SensorRotation};
use serde::Serialize;
use std::time::Instant;

/// Axis-aligned box in pixel coordinates
///
/// `left`/`top` are inclusive, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Smallest box containing every point
    pub fn enclosing(points: impl IntoIterator<Item = (f32, f32)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut bbox = Self::new(x, y, x, y);
        for (x, y) in iter {
            bbox.left = bbox.left.min(x);
            bbox.top = bbox.top.min(y);
            bbox.right = bbox.right.max(x);
            bbox.bottom = bbox.bottom.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Half-open containment test
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.left * sx, self.top * sy, self.right * sx, self.bottom * sy)
    }
}

/// WiFi security type from a `WIFI:` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WifiSecurity {
    Open,
    Wep,
    /// WPA/WPA2 Personal
    Wpa,
    Enterprise,
    Wpa3,
}

impl WifiSecurity {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "" | "NOPASS" => Self::Open,
            "WEP" => Self::Wep,
            "WPA2-EAP" | "WPA3-EAP" => Self::Enterprise,
            "WPA3" | "SAE" => Self::Wpa3,
            _ => Self::Wpa,
        }
    }
}

/// Typed interpretation of a decoded barcode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BarcodeValue {
    Url {
        url: String,
    },
    Wifi {
        ssid: String,
        password: Option<String>,
        security: WifiSecurity,
        hidden: bool,
    },
    Text {
        text: String,
    },
    Phone {
        number: String,
    },
    Email {
        address: String,
        subject: Option<String>,
        body: Option<String>,
    },
    Sms {
        number: String,
        message: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        label: Option<String>,
    },
    /// vCard payload, kept verbatim
    Contact {
        vcard: String,
    },
    /// iCalendar payload, kept verbatim
    Event {
        ical: String,
    },
}

impl BarcodeValue {
    /// Classify raw barcode content; anything unrecognised is `Text`
    pub fn parse(raw: &str) -> Self {
        let content = raw.trim();

        if let Some(rest) = content.strip_prefix("WIFI:") {
            return parse_wifi(rest);
        }
        if content.starts_with("http://") || content.starts_with("https://") {
            return Self::Url {
                url: content.to_string(),
            };
        }
        if let Some(number) = strip_prefix_ignore_case(content, "tel:") {
            return Self::Phone {
                number: number.to_string(),
            };
        }
        if let Some(rest) = strip_prefix_ignore_case(content, "mailto:") {
            let (address, query) = split_query(rest);
            return Self::Email {
                address: address.to_string(),
                subject: query_param(query, "subject"),
                body: query_param(query, "body"),
            };
        }
        if let Some(rest) = strip_prefix_ignore_case(content, "smsto:")
            .or_else(|| strip_prefix_ignore_case(content, "sms:"))
        {
            return parse_sms(rest);
        }
        if let Some(location) =
            strip_prefix_ignore_case(content, "geo:").and_then(parse_geo)
        {
            return location;
        }
        if content.starts_with("BEGIN:VCARD") {
            return Self::Contact {
                vcard: content.to_string(),
            };
        }
        if content.starts_with("BEGIN:VCALENDAR") || content.starts_with("BEGIN:VEVENT") {
            return Self::Event {
                ical: content.to_string(),
            };
        }
        if looks_like_domain(content) {
            return Self::Url {
                url: format!("https://{}", content),
            };
        }

        Self::Text {
            text: content.to_string(),
        }
    }

    /// Short name of the value type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::Wifi { .. } => "wifi",
            Self::Text { .. } => "text",
            Self::Phone { .. } => "phone",
            Self::Email { .. } => "email",
            Self::Sms { .. } => "sms",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Event { .. } => "event",
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn split_query(s: &str) -> (&str, &str) {
    s.split_once('?').unwrap_or((s, ""))
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| percent_decode(value))
}

/// `S:<ssid>;T:<security>;P:<password>;H:<hidden>;;` in any field order
fn parse_wifi(fields: &str) -> BarcodeValue {
    let mut ssid = String::new();
    let mut password = None;
    let mut security = WifiSecurity::Open;
    let mut hidden = false;

    for (key, value) in split_wifi_fields(fields) {
        match key.as_str() {
            "S" => ssid = value,
            "P" => password = Some(value),
            "T" => security = WifiSecurity::parse(&value),
            "H" => hidden = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    BarcodeValue::Wifi {
        ssid,
        password,
        security,
        hidden,
    }
}

/// Split on unescaped `;`, unescaping `\;` `\:` `\,` and `\\`
fn split_wifi_fields(s: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();

    let mut flush = |current: &mut String| {
        if let Some((key, value)) = current.split_once(':') {
            fields.push((key.to_string(), value.to_string()));
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    // Keep escaped separators out of split_once
                    current.push(if escaped == ':' { '\u{1}' } else { escaped });
                }
            }
            ';' => flush(&mut current),
            _ => current.push(c),
        }
    }
    flush(&mut current);

    fields
        .into_iter()
        .map(|(k, v)| (k, v.replace('\u{1}', ":")))
        .collect()
}

fn parse_sms(rest: &str) -> BarcodeValue {
    // smsto:<number>:<message> or sms:<number>?body=<message>
    let (number, query) = split_query(rest);
    if let Some((number, message)) = number.split_once(':') {
        return BarcodeValue::Sms {
            number: number.to_string(),
            message: Some(message.to_string()),
        };
    }
    BarcodeValue::Sms {
        number: number.to_string(),
        message: query_param(query, "body"),
    }
}

fn parse_geo(rest: &str) -> Option<BarcodeValue> {
    let (coords, query) = split_query(rest);
    let mut parts = coords.split(',');
    let latitude = parts.next()?.trim().parse::<f64>().ok()?;
    let longitude = parts.next()?.trim().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(BarcodeValue::Location {
        latitude,
        longitude,
        label: query_param(query, "q").or_else(|| query_param(query, "label")),
    })
}

fn looks_like_domain(s: &str) -> bool {
    s.len() < 256
        && !s.contains(char::is_whitespace)
        && (s.starts_with("www.")
            || [".com", ".org", ".net", ".io"]
                .iter()
                .any(|tld| s.ends_with(tld)))
}

/// Decode `%XX` escapes and `+` as space; invalid escapes are kept verbatim
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// One barcode found in a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Location in frame pixel space
    pub bounds: BoundingBox,
    /// Decoded content as read from the symbol
    pub raw: String,
    pub value: BarcodeValue,
}

impl Candidate {
    pub fn new(bounds: BoundingBox, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let value = BarcodeValue::parse(&raw);
        Self { bounds, raw, value }
    }
}

/// Frame properties handed to a detector alongside the pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorMetadata {
    pub width: u32,
    pub height: u32,
    pub rotation: SensorRotation,
    pub facing: LensFacing,
}

/// Candidates found in one frame
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// In detector order
    pub candidates: Vec<Candidate>,
    /// Size of the analysed frame as captured
    pub frame_size: Resolution,
    pub rotation: SensorRotation,
    pub captured_at: Instant,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            BarcodeValue::parse(" https://example.com/a?b=c "),
            BarcodeValue::Url {
                url: "https://example.com/a?b=c".into()
            }
        );
        assert_eq!(
            BarcodeValue::parse("www.example.org"),
            BarcodeValue::Url {
                url: "https://www.example.org".into()
            }
        );
    }

    #[test]
    fn test_parse_wifi_with_escapes() {
        let value = BarcodeValue::parse(r"WIFI:T:WPA;S:Cafe\;Bar;P:pa\:ss;H:true;;");
        assert_eq!(
            value,
            BarcodeValue::Wifi {
                ssid: "Cafe;Bar".into(),
                password: Some("pa:ss".into()),
                security: WifiSecurity::Wpa,
                hidden: true,
            }
        );
    }

    #[test]
    fn test_parse_open_wifi() {
        match BarcodeValue::parse("WIFI:S:Guest;T:nopass;;") {
            BarcodeValue::Wifi {
                ssid,
                password,
                security,
                ..
            } => {
                assert_eq!(ssid, "Guest");
                assert_eq!(password, None);
                assert_eq!(security, WifiSecurity::Open);
            }
            other => panic!("Expected wifi, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_contact_schemes() {
        assert_eq!(
            BarcodeValue::parse("TEL:+15551234").kind(),
            "phone"
        );
        assert_eq!(
            BarcodeValue::parse("mailto:a@b.org?subject=Hi%20there&body=x+y"),
            BarcodeValue::Email {
                address: "a@b.org".into(),
                subject: Some("Hi there".into()),
                body: Some("x y".into()),
            }
        );
        assert_eq!(
            BarcodeValue::parse("SMSTO:5551234:on my way"),
            BarcodeValue::Sms {
                number: "5551234".into(),
                message: Some("on my way".into()),
            }
        );
    }

    #[test]
    fn test_parse_geo() {
        match BarcodeValue::parse("geo:48.2082,16.3738?q=Wien") {
            BarcodeValue::Location {
                latitude,
                longitude,
                label,
            } => {
                assert!((latitude - 48.2082).abs() < 1e-9);
                assert!((longitude - 16.3738).abs() < 1e-9);
                assert_eq!(label.as_deref(), Some("Wien"));
            }
            other => panic!("Expected location, got {:?}", other),
        }
        // Out of range coordinates are just text
        assert_eq!(BarcodeValue::parse("geo:123,456").kind(), "text");
    }

    #[test]
    fn test_percent_decode_utf8() {
        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            BarcodeValue::parse("ABC123"),
            BarcodeValue::Text {
                text: "ABC123".into()
            }
        );
    }

    #[test]
    fn test_bounding_box_half_open() {
        let b = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!(b.contains(10.0, 10.0));
        assert!(!b.contains(20.0, 15.0));
        assert!(!b.contains(15.0, 20.0));
        assert_eq!(
            BoundingBox::enclosing([(3.0, 9.0), (1.0, 2.0), (5.0, 4.0)]),
            Some(BoundingBox::new(1.0, 2.0, 5.0, 9.0))
        );
    }
}
