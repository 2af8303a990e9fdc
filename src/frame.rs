//! HTTP/3 frame payloads as exchanged with the native engine

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::StreamId;

/// Header section of a HEADERS frame, pseudo-headers included
pub type Headers = HashMap<String, String>;

pub const PSEUDO_HEADER_PREFIX: char = ':';
pub const METHOD: &str = ":method";
pub const SCHEME: &str = ":scheme";
pub const AUTHORITY: &str = ":authority";
pub const PATH: &str = ":path";
pub const STATUS: &str = ":status";

pub fn is_pseudo_header(name: &str) -> bool {
    name.starts_with(PSEUDO_HEADER_PREFIX)
}

/// Merge header fragments left to right; later fragments win on conflicts
pub fn merge_headers<I>(fragments: I) -> Headers
where
    I: IntoIterator<Item = Headers>,
{
    fragments.into_iter().fold(Headers::new(), |mut merged, fragment| {
        merged.extend(fragment);
        merged
    })
}

/// One item of outbound stream data: either payload bytes or the end-of-stream marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Bytes(Bytes),
    Fin,
}

impl From<Bytes> for Data {
    fn from(bytes: Bytes) -> Self {
        Data::Bytes(bytes)
    }
}

impl From<&'static str> for Data {
    fn from(text: &'static str) -> Self {
        Data::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Data {
    fn from(text: String) -> Self {
        Data::Bytes(Bytes::from(text))
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Data::Bytes(Bytes::from(bytes))
    }
}

/// A frame as handed to the engine's command interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum OutboundFrame {
    Headers {
        stream_id: StreamId,
        headers: Headers,
    },
    Data {
        stream_id: StreamId,
        #[serde(default, with = "payload::optional")]
        data: Option<Bytes>,
        fin: bool,
    },
}

impl OutboundFrame {
    pub fn stream_id(&self) -> &StreamId {
        match self {
            OutboundFrame::Headers { stream_id, .. } | OutboundFrame::Data { stream_id, .. } => {
                stream_id
            }
        }
    }

    pub fn is_fin(&self) -> bool {
        matches!(self, OutboundFrame::Data { fin: true, .. })
    }
}

/// DATA payloads serialize as UTF-8 text when possible, raw byte arrays otherwise
pub(crate) mod payload {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Raw(Vec<u8>),
    }

    impl From<&Bytes> for Repr {
        fn from(bytes: &Bytes) -> Self {
            match std::str::from_utf8(bytes) {
                Ok(text) => Repr::Text(text.to_string()),
                Err(_) => Repr::Raw(bytes.to_vec()),
            }
        }
    }

    impl From<Repr> for Bytes {
        fn from(repr: Repr) -> Self {
            match repr {
                Repr::Text(text) => Bytes::from(text),
                Repr::Raw(raw) => Bytes::from(raw),
            }
        }
    }

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        Repr::from(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        Ok(Repr::deserialize(deserializer)?.into())
    }

    pub mod optional {
        use super::Repr;
        use bytes::Bytes;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(data: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
            data.as_ref().map(Repr::from).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
            Ok(Option::<Repr>::deserialize(deserializer)?.map(Bytes::from))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn later_fragments_override_earlier() {
        let merged = merge_headers([
            headers(&[(":status", "200"), ("content-type", "text/plain")]),
            headers(&[("content-type", "text/html"), ("x-extra", "1")]),
        ]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["content-type"], "text/html");
        assert_eq!(merged[":status"], "200");
    }

    #[test]
    fn pseudo_header_detection() {
        assert!(is_pseudo_header(":path"));
        assert!(!is_pseudo_header("path"));
    }

    #[test]
    fn data_frame_serializes_text_payload() {
        let frame = OutboundFrame::Data {
            stream_id: StreamId::from("0"),
            data: Some(Bytes::from_static(b"hi")),
            fin: true,
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["frame"], "data");
        assert_eq!(json["data"], "hi");
        assert_eq!(json["fin"], true);
    }
}
