//! Grounding metadata → citation records.
//!
//! Two shapes are understood:
//! - `groundingAttributions`: each entry carries its own text segment and
//!   web source.
//! - `groundingSupports` + `groundingChunks`: each support names a segment
//!   and points at web chunks by index.
//!
//! Missing indices default to 0, a missing URI to `""` and a missing title to
//! [`DEFAULT_TITLE`]. Entries without a segment or without a web source are
//! skipped. Input order is kept and nothing is deduplicated.

use serde::{Deserialize, Serialize};

/// Title used when a web source has none.
pub const DEFAULT_TITLE: &str = "Web Source";

/// Normalized citation emitted to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub start_index: u32,
    pub end_index: u32,
    #[serde(rename = "sourceURI")]
    pub source_uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroundingMetadata {
    pub grounding_attributions: Vec<GroundingAttribution>,
    pub grounding_chunks: Vec<GroundingChunk>,
    pub grounding_supports: Vec<GroundingSupport>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroundingAttribution {
    pub segment: Option<Segment>,
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Segment {
    pub start_index: Option<u32>,
    pub end_index: Option<u32>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroundingSupport {
    pub segment: Option<Segment>,
    pub grounding_chunk_indices: Vec<usize>,
}

fn citation(segment: &Segment, web: &WebSource) -> Citation {
    Citation {
        start_index: segment.start_index.unwrap_or(0),
        end_index: segment.end_index.unwrap_or(0),
        source_uri: web.uri.clone().unwrap_or_default(),
        title: web
            .title
            .clone()
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    }
}

/// Extract citations in input order.
pub fn extract_citations(metadata: &GroundingMetadata) -> Vec<Citation> {
    let mut out = Vec::new();

    for attribution in &metadata.grounding_attributions {
        if let (Some(segment), Some(web)) = (&attribution.segment, &attribution.web) {
            out.push(citation(segment, web));
        }
    }

    for support in &metadata.grounding_supports {
        let Some(segment) = &support.segment else {
            continue;
        };
        for &idx in &support.grounding_chunk_indices {
            match metadata.grounding_chunks.get(idx).and_then(|c| c.web.as_ref()) {
                Some(web) => out.push(citation(segment, web)),
                None => tracing::debug!(idx, "grounding support points at no web chunk"),
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GroundingMetadata {
        serde_json::from_str(raw).expect("grounding metadata")
    }

    #[test]
    fn attributions_with_defaults() {
        let metadata = parse(
            r#"{"groundingAttributions":[
                {"segment":{"startIndex":5,"endIndex":10},"web":{"uri":"https://x","title":"X"}},
                {"segment":{"startIndex":0,"endIndex":0},"web":{}}
            ]}"#,
        );

        let citations = extract_citations(&metadata);
        assert_eq!(
            citations,
            vec![
                Citation {
                    start_index: 5,
                    end_index: 10,
                    source_uri: "https://x".into(),
                    title: "X".into(),
                },
                Citation {
                    start_index: 0,
                    end_index: 0,
                    source_uri: String::new(),
                    title: "Web Source".into(),
                },
            ]
        );
    }

    #[test]
    fn entries_missing_segment_or_web_are_skipped() {
        let metadata = parse(
            r#"{"groundingAttributions":[
                {"web":{"uri":"https://a"}},
                {"segment":{"startIndex":1}},
                {"segment":{},"web":{"uri":"https://b"}}
            ]}"#,
        );

        let citations = extract_citations(&metadata);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_uri, "https://b");
        assert_eq!(citations[0].start_index, 0);
        assert_eq!(citations[0].end_index, 0);
    }

    #[test]
    fn duplicates_are_kept() {
        let entry = r#"{"segment":{"startIndex":1,"endIndex":2},"web":{"uri":"u"}}"#;
        let metadata = parse(&format!(r#"{{"groundingAttributions":[{entry},{entry}]}}"#));
        assert_eq!(extract_citations(&metadata).len(), 2);
    }

    #[test]
    fn supports_resolve_chunk_indices() {
        let metadata = parse(
            r#"{
                "groundingChunks":[{"web":{"uri":"https://one","title":"One"}},{"web":{"uri":"https://two"}}],
                "groundingSupports":[
                    {"segment":{"startIndex":3,"endIndex":9},"groundingChunkIndices":[1,0,7]}
                ]
            }"#,
        );

        let citations = extract_citations(&metadata);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source_uri, "https://two");
        assert_eq!(citations[0].title, DEFAULT_TITLE);
        assert_eq!(citations[1].title, "One");
        assert_eq!((citations[1].start_index, citations[1].end_index), (3, 9));
    }

    #[test]
    fn citation_serializes_source_uri_key() {
        let json = serde_json::to_value(Citation {
            start_index: 1,
            end_index: 2,
            source_uri: "u".into(),
            title: "t".into(),
        })
        .unwrap();
        assert_eq!(json["sourceURI"], "u");
        assert_eq!(json["startIndex"], 1);
    }

    #[test]
    fn empty_metadata_yields_nothing() {
        assert!(extract_citations(&GroundingMetadata::default()).is_empty());
    }
}
