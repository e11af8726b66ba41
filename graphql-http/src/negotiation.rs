//! `Accept` header negotiation between JSON and the HTML explorer.

use std::cmp::Ordering;

use http::HeaderMap;
use http::header::ACCEPT;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::Name;
use mediatype::ReadParams;

/// The representations a GraphQL endpoint can produce, in server preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    Json,
    Html,
}

impl Representation {
    const CANDIDATES: [Representation; 2] = [Representation::Json, Representation::Html];

    fn media_type(&self) -> (&'static str, &'static str) {
        match self {
            Representation::Json => ("application", "json"),
            Representation::Html => ("text", "html"),
        }
    }
}

struct AcceptEntry {
    ty: String,
    subty: String,
    params: Vec<String>,
    q: f32,
    order: usize,
}

impl AcceptEntry {
    fn new(mime: &MediaType<'_>, order: usize) -> Self {
        let q = Name::new("q")
            .and_then(|q| mime.get_param(q))
            .map(|q| q.as_str().parse::<f32>().unwrap_or(0.0))
            .unwrap_or(1.0);
        let params = mime
            .params
            .iter()
            .filter(|(name, _)| !name.as_str().eq_ignore_ascii_case("q"))
            .map(|(_, value)| value.as_str().trim_matches('"').to_string())
            .collect();
        Self {
            ty: mime.ty.as_str().to_ascii_lowercase(),
            subty: mime.subty.as_str().to_ascii_lowercase(),
            params,
            q,
            order,
        }
    }

    /// How specifically this entry matches a media type, or `None` when it does not.
    fn specificity(&self, (ty, subty): (&str, &str)) -> Option<u8> {
        let mut specificity = 0;
        if self.ty == ty {
            specificity |= 4;
        } else if self.ty != "*" {
            return None;
        }
        if self.subty == subty {
            specificity |= 2;
        } else if self.subty != "*" {
            return None;
        }
        // Candidates carry no parameters, so only wildcard parameters can match.
        if !self.params.is_empty() {
            if self.params.iter().all(|value| value == "*") {
                specificity |= 1;
            } else {
                return None;
            }
        }
        Some(specificity)
    }
}

#[derive(Clone, Copy)]
struct Priority {
    representation: Representation,
    index: usize,
    q: f32,
    specificity: u8,
    order: usize,
}

/// Picks the representation the client prefers, `None` when it accepts neither.
///
/// Without an `Accept` header JSON is preferred.
pub fn preferred_representation(headers: &HeaderMap) -> Option<Representation> {
    let mut accept_header_present = false;
    let entries: Vec<AcceptEntry> = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|header| {
            accept_header_present = true;
            header.to_str().ok()
        })
        .flat_map(MediaTypeList::new)
        .flatten()
        .enumerate()
        .map(|(order, mime)| AcceptEntry::new(&mime, order))
        .collect();

    if !accept_header_present {
        return Some(Representation::Json);
    }

    Representation::CANDIDATES
        .iter()
        .enumerate()
        .filter_map(|(index, representation)| {
            let media_type = representation.media_type();
            entries
                .iter()
                .filter_map(|entry| {
                    entry.specificity(media_type).map(|specificity| Priority {
                        representation: *representation,
                        index,
                        q: entry.q,
                        specificity,
                        order: entry.order,
                    })
                })
                .max_by(|a, b| {
                    a.specificity
                        .cmp(&b.specificity)
                        .then(a.q.partial_cmp(&b.q).unwrap_or(Ordering::Equal))
                        .then(a.order.cmp(&b.order))
                })
        })
        .filter(|priority| priority.q > 0.0)
        .min_by(|a, b| {
            b.q.partial_cmp(&a.q)
                .unwrap_or(Ordering::Equal)
                .then(b.specificity.cmp(&a.specificity))
                .then(a.order.cmp(&b.order))
                .then(a.index.cmp(&b.index))
        })
        .map(|priority| priority.representation)
}

/// Whether the client prefers an HTML page over JSON.
pub fn prefers_html(headers: &HeaderMap) -> bool {
    preferred_representation(headers) == Some(Representation::Html)
}
