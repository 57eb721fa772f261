// src/ingest/providers/rss.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ingest::types::{FeedFetcher, FetchError, RawFeedItem, SummaryVariant};

pub const DEFAULT_USER_AGENT: &str = "HeadlineAnchor/1.0";

/// Fetches RSS 2.0 or Atom documents over HTTP (or from a fixture).
pub struct RssFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl RssFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    /// Serve the same document for every endpoint.
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Vec<RawFeedItem>, FetchError> {
        match &self.mode {
            Mode::Fixture(xml) => parse_feed(xml),
            Mode::Http { client } => {
                let resp = client
                    .get(endpoint)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| map_reqwest(e, timeout))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status(status.as_u16()));
                }
                let body = resp.text().await.map_err(|e| map_reqwest(e, timeout))?;
                parse_feed(&body)
            }
        }
    }
}

fn map_reqwest(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Http(e)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Description,
    Encoded,
    Summary,
    Content,
}

#[derive(Default)]
struct Entry {
    title: Option<String>,
    link: Option<String>,
    atom_link: Option<(bool, String)>,
    guid: Option<String>,
    description: Option<String>,
    encoded: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    atom: bool,
}

impl Entry {
    fn set(&mut self, field: Field, text: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::Description => &mut self.description,
            Field::Encoded => &mut self.encoded,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    /// Atom entries can carry several links; `alternate` (or no rel) wins.
    fn offer_atom_link(&mut self, el: &BytesStart<'_>) {
        let mut href = None;
        let mut alternate = true;
        for attr in el.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => alternate = value == "alternate",
                _ => {}
            }
        }
        let Some(href) = href else { return };
        match &self.atom_link {
            Some((true, _)) => {}
            Some((false, _)) if !alternate => {}
            _ => self.atom_link = Some((alternate, href)),
        }
    }

    fn finish(self) -> RawFeedItem {
        let summary_variants = if self.atom {
            [self.content, self.summary]
        } else {
            [self.description, self.encoded]
        }
        .into_iter()
        .flatten()
        .map(SummaryVariant::Markup)
        .collect();

        RawFeedItem {
            title: self.title,
            link: self.link.or(self.atom_link.map(|(_, href)| href)),
            guid: self.guid,
            summary_variants,
        }
    }
}

fn field_for(name: &[u8], atom: bool) -> Option<Field> {
    match (name, atom) {
        (b"title", _) => Some(Field::Title),
        (b"link", false) => Some(Field::Link),
        (b"guid", false) | (b"id", true) => Some(Field::Guid),
        (b"description", false) => Some(Field::Description),
        (b"encoded", false) => Some(Field::Encoded),
        (b"summary", true) => Some(Field::Summary),
        (b"content", true) => Some(Field::Content),
        _ => None,
    }
}

/// Parse an RSS 2.0 or Atom document into raw items, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<RawFeedItem>, FetchError> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let mut reader = Reader::from_str(&xml_clean);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut saw_root = false;
    let mut depth = 0usize;
    // (depth of the item element, entry under construction)
    let mut entry: Option<(usize, Entry)> = None;
    // (depth of the field element, field, accumulated text)
    let mut field: Option<(usize, Field, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = e.local_name();
                match entry.as_mut() {
                    None => {
                        saw_root |= matches!(name.as_ref(), b"rss" | b"feed" | b"RDF");
                        if matches!(name.as_ref(), b"item" | b"entry") {
                            let atom = name.as_ref() == b"entry";
                            entry = Some((depth, Entry { atom, ..Entry::default() }));
                        }
                    }
                    Some((item_depth, ent)) => {
                        if field.is_none() && depth == *item_depth + 1 {
                            if ent.atom && name.as_ref() == b"link" {
                                ent.offer_atom_link(&e);
                            } else if let Some(f) = field_for(name.as_ref(), ent.atom) {
                                field = Some((depth, f, String::new()));
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some((item_depth, ent)) = &mut entry {
                    if depth == *item_depth && ent.atom && e.local_name().as_ref() == b"link" {
                        ent.offer_atom_link(&e);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, _, buf)) = &mut field {
                    match t.unescape() {
                        Ok(s) => push_text(buf, &s),
                        Err(_) => push_text(buf, &String::from_utf8_lossy(&t)),
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, _, buf)) = &mut field {
                    push_text(buf, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if matches!(&field, Some((d, _, _)) if *d == depth) {
                    if let (Some((_, f, text)), Some((_, ent))) = (field.take(), entry.as_mut()) {
                        ent.set(f, text);
                    }
                }
                if matches!(&entry, Some((d, _)) if *d == depth) {
                    if let Some((_, ent)) = entry.take() {
                        out.push(ent.finish());
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FetchError::Parse(e.to_string())),
            _ => {}
        }
    }

    if !saw_root {
        return Err(FetchError::Parse("not an RSS or Atom document".into()));
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_parse_ms").record(ms);
    counter!("feed_raw_items_total").increment(out.len() as u64);
    Ok(out)
}

fn push_text(buf: &mut String, s: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(s);
}

/// HTML named entities are not valid XML; fold the common ones before parsing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
