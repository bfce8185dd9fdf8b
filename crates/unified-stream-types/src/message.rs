use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// The closed set of roles a caller may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Inline media attached to a message (base64 payload plus MIME type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Encode raw bytes.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// `data:` URL form, as OpenAI expects for inline images.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Whether the payload is well-formed base64.
    pub fn is_valid_base64(&self) -> bool {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .is_ok()
    }
}

/// One turn of the caller-supplied conversation, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde() {
        for (role, expected_json) in [
            (Role::System, "\"system\""),
            (Role::User, "\"user\""),
            (Role::Assistant, "\"assistant\""),
        ] {
            assert_eq!(serde_json::to_string(&role).unwrap(), expected_json);
        }
    }

    #[test]
    fn test_unknown_role_rejected_on_deserialize() {
        let result: Result<Message, _> =
            serde_json::from_str(r#"{"role":"wizard","content":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_attachment_from_bytes_round_trips_base64() {
        let att = Attachment::from_bytes("image/png", &[0x89, b'P', b'N', b'G']);
        assert!(att.is_valid_base64());
        assert!(att.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_invalid_base64_detected() {
        let att = Attachment::new("image/png", "not base64!!");
        assert!(!att.is_valid_base64());
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::user("look").with_attachment(Attachment::new("image/jpeg", "AAAA"));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.attachments.len(), 1);
    }
}
