use std::{collections::HashMap, str::FromStr};

use quick_xml::{events::Event, Reader};

use crate::types::UrlTemplate;

/// Path segment that, followed by the sequence number, addresses a single
/// fragment under a manifest base URL.
pub const FRAGMENT_PATH: &str = "sq/";

#[derive(Debug, Default)]
pub struct Manifest {
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default)]
pub struct Representation {
    pub id: String,
    pub base_url: String,
}

fn get_attr<T>(e: &quick_xml::events::BytesStart, attr: &str) -> Option<T>
where
    T: FromStr,
{
    e.try_get_attribute(attr)
        .ok()?
        .and_then(|a| std::str::from_utf8(&a.value).ok()?.parse().ok())
}

impl Representation {
    fn from_attributes(e: &quick_xml::events::BytesStart) -> Self {
        Self {
            id: get_attr(e, "id").unwrap_or_default(),
            base_url: String::default(),
        }
    }

    pub fn from_start_event(
        e: quick_xml::events::BytesStart,
        reader: &mut Reader<&[u8]>,
    ) -> Result<Self, quick_xml::Error> {
        let mut repr = Self::from_attributes(&e);

        let mut is_base_url_tag = false;
        loop {
            match reader.read_event() {
                Err(e) => return Err(e),
                Ok(Event::Eof) => {
                    return Err(quick_xml::Error::UnexpectedEof("Representation".into()))
                }
                Ok(Event::Start(e)) => is_base_url_tag = e.name().as_ref() == b"BaseURL",
                Ok(Event::Text(e)) => {
                    if is_base_url_tag {
                        repr.base_url = e
                            .unescape()
                            .ok()
                            .map(|u| u.into_owned())
                            .unwrap_or_default();
                    }
                }
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"Representation" => break,
                    _ => is_base_url_tag = false,
                },
                _ => (),
            }
        }

        Ok(repr)
    }

    /// Numeric stream identifier, if the `id` attribute holds a positive one.
    pub fn itag(&self) -> Option<i64> {
        self.id.trim().parse().ok().filter(|itag| *itag > 0)
    }
}

pub fn parse_manifest(manifest: &str) -> Result<Manifest, quick_xml::Error> {
    let mut reader = Reader::from_str(manifest);
    reader.trim_text(true);

    let mut m = Manifest::default();

    loop {
        match reader.read_event() {
            Err(e) => return Err(e),
            Ok(Event::Eof) => break,
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"Representation" {
                    m.representations.push(Representation::from_attributes(&e));
                }
            }
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == b"Representation" {
                    m.representations
                        .push(Representation::from_start_event(e, &mut reader)?);
                }
            }
            _ => (),
        }
    }

    Ok(m)
}

/// Builds one fragment URL template per itag listed in a DASH manifest.
///
/// A manifest that fails to parse yields no templates. Representations without
/// a positive numeric id or a base URL are skipped; a repeated itag keeps the
/// last entry.
pub fn get_urls_from_manifest(manifest: &str) -> HashMap<i64, UrlTemplate> {
    let mut urls = HashMap::new();

    let manifest = match parse_manifest(manifest) {
        Ok(m) => m,
        Err(e) => {
            warn!("Error parsing DASH manifest: {}", e);
            return urls;
        }
    };

    for r in manifest.representations {
        let Some(itag) = r.itag() else {
            continue;
        };

        if !r.base_url.is_empty() {
            urls.insert(itag, UrlTemplate::from_base(&r.base_url, FRAGMENT_PATH));
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic">
  <Period start="PT0S">
    <AdaptationSet mimeType="audio/mp4" subsegmentAlignment="true">
      <Representation id="140" codecs="mp4a.40.2" bandwidth="144000">
        <BaseURL>https://rr1.googlevideo.com/videoplayback/id/abc/itag/140/source/yt_live_broadcast/</BaseURL>
        <SegmentList><SegmentURL media="sq/0"/></SegmentList>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="video/mp4" subsegmentAlignment="true">
      <Representation id="136" codecs="avc1.4d401f" bandwidth="2500000" height="720">
        <BaseURL>https://rr1.googlevideo.com/videoplayback/id/abc/itag/136/old/</BaseURL>
      </Representation>
      <Representation id="299" codecs="avc1.64002a" bandwidth="6000000" height="1080">
        <BaseURL>https://rr1.googlevideo.com/videoplayback/id/abc/itag/299/</BaseURL>
      </Representation>
      <Representation id="136" codecs="avc1.4d401f" bandwidth="2500000" height="720">
        <BaseURL>https://rr1.googlevideo.com/videoplayback/id/abc/itag/136/new/</BaseURL>
      </Representation>
      <Representation id="abc" bandwidth="1"><BaseURL>https://bad/</BaseURL></Representation>
      <Representation id="0" bandwidth="1"><BaseURL>https://zero/</BaseURL></Representation>
      <Representation id="137" bandwidth="1"><BaseURL></BaseURL></Representation>
      <Representation id="298"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parse_manifest() {
        let manifest = super::parse_manifest(MANIFEST).expect("Could not parse manifest");

        assert_eq!(manifest.representations.len(), 8);
        assert_eq!(manifest.representations[0].id, "140");
        assert_eq!(manifest.representations[2].id, "299");
        assert!(manifest.representations[7].base_url.is_empty());
    }

    #[test]
    fn manifest_urls() {
        let urls = get_urls_from_manifest(MANIFEST);

        assert_eq!(urls.len(), 3, "Unexpected itags: {:?}", urls.keys());
        assert_eq!(
            urls[&140].fill(12),
            "https://rr1.googlevideo.com/videoplayback/id/abc/itag/140/source/yt_live_broadcast/sq/12"
        );
        assert_eq!(
            urls[&136].as_str(),
            "https://rr1.googlevideo.com/videoplayback/id/abc/itag/136/new/sq/%d"
        );
        assert!(urls.contains_key(&299));
    }

    #[test]
    fn percent_is_escaped() {
        let urls = get_urls_from_manifest(
            r#"<Representation id="140"><BaseURL>http://x/y?a=1%b</BaseURL></Representation>"#,
        );

        let tmpl = urls.get(&140).expect("No template for itag 140");
        assert_eq!(tmpl.as_str(), "http://x/y?a=1%%bsq/%d");
        assert_eq!(tmpl.fill(3), "http://x/y?a=1%bsq/3");
    }

    #[test]
    fn malformed_manifest_is_empty() {
        assert!(get_urls_from_manifest("<MPD><Representation id=\"140\"><BaseURL>x</Foo>").is_empty());
        assert!(get_urls_from_manifest("<Representation id=\"140\"><BaseURL>x").is_empty());
        assert!(get_urls_from_manifest("").is_empty());
    }
}
