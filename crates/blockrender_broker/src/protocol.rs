//! Message protocol spoken with the embedded MakeCode render service
//!
//! Outbound envelopes ask the service to render a snippet. Inbound envelopes
//! announce readiness or carry a rendered image (or an error) for a request id.
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::RenderResult;

/// Envelope sent to the render service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "renderblocks")]
    RenderBlocks {
        id: String,
        code: String,
        options: RenderOptions,
    },
}

impl OutboundMessage {
    pub fn render_blocks(
        id: impl Into<String>,
        code: impl Into<String>,
        options: RenderOptions,
    ) -> Self {
        Self::RenderBlocks {
            id: id.into(),
            code: code.into(),
            options,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::RenderBlocks { id, .. } => id,
        }
    }
}

/// Extra render options forwarded untouched to the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
}

/// Envelope received from the render service, once its `source` tag was checked
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceMessage {
    /// The service finished loading and accepts render requests
    #[serde(rename = "renderready")]
    RenderReady,
    /// Reply to a `renderblocks` request
    #[serde(rename = "renderblocks")]
    RenderBlocks(RenderBlocksReply),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderBlocksReply {
    pub id: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub svg: Option<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RenderBlocksReply {
    /// Converts the reply into the result for its request id.
    ///
    /// An `error` field wins over image fields. A bare `svg` is turned into a
    /// base64 data uri.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when the reply carries neither an
    /// error nor a complete image (uri or svg plus both dimensions)
    pub fn into_result(self) -> Result<(String, RenderResult), DecodeError> {
        if let Some(message) = self.error {
            return Ok((self.id, RenderResult::failure(message)));
        }

        let image_uri = match (self.uri, self.svg) {
            (Some(uri), _) => uri,
            (None, Some(svg)) => svg_data_uri(&svg),
            (None, None) => {
                return Err(DecodeError::Malformed(format!(
                    "reply for {} has neither uri, svg nor error",
                    self.id
                )));
            }
        };

        match (self.width, self.height) {
            (Some(width), Some(height)) => Ok((
                self.id,
                RenderResult::Success {
                    image_uri,
                    width,
                    height,
                },
            )),
            _ => Err(DecodeError::Malformed(format!(
                "reply for {} is missing its dimensions",
                self.id
            ))),
        }
    }
}

pub fn svg_data_uri(svg: &str) -> String {
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Message does not come from the render service")]
    ForeignSource,
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Decodes a raw cross-context payload into a [`ServiceMessage`].
///
/// Anything that is not an object tagged with `source == service_tag` is
/// [`DecodeError::ForeignSource`]; tagged payloads that fail to parse are
/// [`DecodeError::Malformed`].
///
/// # Errors
///
/// See above; callers treat every error as a message to discard
pub fn decode_inbound(raw: &Value, service_tag: &str) -> Result<ServiceMessage, DecodeError> {
    match raw.get("source").and_then(Value::as_str) {
        Some(source) if source == service_tag => {}
        _ => return Err(DecodeError::ForeignSource),
    }

    ServiceMessage::deserialize(raw).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_format() {
        let msg = OutboundMessage::render_blocks("r1", "basic.showString('x')", RenderOptions::default());
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "renderblocks",
                "id": "r1",
                "code": "basic.showString('x')",
                "options": {}
            })
        );

        let with_package = OutboundMessage::render_blocks(
            "r2",
            "",
            RenderOptions {
                package_id: Some("_abc123".into()),
            },
        );
        assert_eq!(
            serde_json::to_value(&with_package).unwrap()["options"],
            json!({ "packageId": "_abc123" })
        );
    }

    #[test]
    fn test_decode_ready() {
        let raw = json!({ "source": "makecode", "type": "renderready" });
        assert_eq!(
            decode_inbound(&raw, "makecode").unwrap(),
            ServiceMessage::RenderReady
        );
    }

    #[test]
    fn test_decode_rejects_foreign_source() {
        for raw in [
            json!({ "type": "renderready" }),
            json!({ "source": "other", "type": "renderready" }),
            json!({ "source": 7, "type": "renderready" }),
            json!("renderready"),
            Value::Null,
        ] {
            assert_eq!(
                decode_inbound(&raw, "makecode"),
                Err(DecodeError::ForeignSource),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_missing_id() {
        let unknown = json!({ "source": "makecode", "type": "renderpng" });
        assert!(matches!(
            decode_inbound(&unknown, "makecode"),
            Err(DecodeError::Malformed(_))
        ));

        let no_id = json!({ "source": "makecode", "type": "renderblocks", "uri": "data:," });
        assert!(matches!(
            decode_inbound(&no_id, "makecode"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_reply_success() {
        let raw = json!({
            "source": "makecode",
            "type": "renderblocks",
            "id": "r1",
            "uri": "data:image/png;base64,AAAA",
            "css": ".blocklyText{}",
            "width": 100,
            "height": 40
        });
        let ServiceMessage::RenderBlocks(reply) = decode_inbound(&raw, "makecode").unwrap() else {
            panic!("expected renderblocks");
        };
        let (id, result) = reply.into_result().unwrap();
        assert_eq!(id, "r1");
        assert_eq!(
            result,
            RenderResult::Success {
                image_uri: "data:image/png;base64,AAAA".into(),
                width: 100.0,
                height: 40.0,
            }
        );
    }

    #[test]
    fn test_reply_svg_becomes_data_uri() {
        let reply = RenderBlocksReply {
            id: "r1".into(),
            uri: None,
            svg: Some("<svg/>".into()),
            width: Some(10.0),
            height: Some(5.5),
            error: None,
        };
        let (_, result) = reply.into_result().unwrap();
        let RenderResult::Success { image_uri, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(image_uri, "data:image/svg+xml;base64,PHN2Zy8+");
    }

    #[test]
    fn test_reply_error_wins() {
        let raw = json!({
            "source": "makecode",
            "type": "renderblocks",
            "id": "r1",
            "uri": "data:,",
            "error": "compile error"
        });
        let ServiceMessage::RenderBlocks(reply) = decode_inbound(&raw, "makecode").unwrap() else {
            panic!("expected renderblocks");
        };
        assert_eq!(
            reply.into_result().unwrap(),
            ("r1".to_string(), RenderResult::failure("compile error"))
        );
    }

    #[test]
    fn test_reply_without_dimensions_is_malformed() {
        let reply = RenderBlocksReply {
            id: "r1".into(),
            uri: Some("data:,".into()),
            svg: None,
            width: Some(10.0),
            height: None,
            error: None,
        };
        assert!(matches!(reply.into_result(), Err(DecodeError::Malformed(_))));
    }
}
