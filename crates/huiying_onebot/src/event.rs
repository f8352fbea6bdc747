use huiying_core::InboundMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "post_type")]
pub enum OneBotEvent {
    #[serde(rename = "message")]
    Message(MessageEvent),
    #[serde(rename = "meta_event")]
    Meta(MetaEvent),
    #[serde(rename = "notice")]
    Notice(serde_json::Value),
    #[serde(rename = "request")]
    Request(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_type: String, // "private" or "group"
    pub sub_type: Option<String>,
    pub message_id: i32,
    pub user_id: i64,
    pub group_id: Option<i64>,
    pub raw_message: String,
    #[serde(default)]
    pub font: i32,
    pub sender: Sender,
    pub time: i64,
}

impl MessageEvent {
    pub fn origin(&self) -> Origin {
        match self.group_id {
            Some(group_id) => Origin::Group(group_id),
            None => Origin::Private(self.user_id),
        }
    }

    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage::new(&self.raw_message, self.user_id.to_string(), self.origin().to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub card: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "meta_event_type")]
pub enum MetaEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat {
        time: i64,
        status: serde_json::Value,
        interval: i64,
    },
    #[serde(rename = "lifecycle")]
    Lifecycle {
        time: i64,
        sub_type: String,
    },
}

// ============================================================================
// Origin
// ============================================================================

/// Where a message came from, and where its reply should go.
/// Rendered as `onebot:group:<id>` / `onebot:private:<user_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Private(i64),
    Group(i64),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Private(user_id) => write!(f, "onebot:private:{}", user_id),
            Origin::Group(group_id) => write!(f, "onebot:group:{}", group_id),
        }
    }
}

impl FromStr for Origin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some("onebot"), Some(kind), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            anyhow::bail!("not a OneBot origin: {}", s);
        };
        let id: i64 = id.parse().map_err(|_| anyhow::anyhow!("bad id in origin: {}", s))?;
        match kind {
            "private" => Ok(Origin::Private(id)),
            "group" => Ok(Origin::Group(id)),
            other => anyhow::bail!("unknown origin kind '{}' in {}", other, s),
        }
    }
}

// ============================================================================
// Outbound actions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SendMessageAction {
    pub action: String,
    pub params: SendMessageParams,
    pub echo: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageParams {
    pub message_type: String,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub message: String,
}

impl SendMessageAction {
    pub fn reply(origin: Origin, message: &str) -> Self {
        let (action, message_type, user_id, group_id) = match origin {
            Origin::Private(user_id) => ("send_private_msg", "private", Some(user_id), None),
            Origin::Group(group_id) => ("send_group_msg", "group", None, Some(group_id)),
        };
        Self {
            action: action.to_string(),
            params: SendMessageParams {
                message_type: message_type.to_string(),
                user_id,
                group_id,
                message: message.to_string(),
            },
            echo: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneBotResponse {
    pub status: String,
    pub retcode: i32,
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub wording: String,
    pub echo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_MESSAGE: &str = r#"{
        "post_type": "message",
        "message_type": "group",
        "sub_type": "normal",
        "message_id": 123,
        "user_id": 10001,
        "group_id": 42,
        "raw_message": "  你好呀  ",
        "font": 0,
        "sender": {"user_id": 10001, "nickname": "小明"},
        "time": 1700000000
    }"#;

    #[test]
    fn test_parse_group_message() {
        let event: OneBotEvent = serde_json::from_str(GROUP_MESSAGE).unwrap();
        let OneBotEvent::Message(msg) = event else {
            panic!("expected message event");
        };
        assert_eq!(msg.origin(), Origin::Group(42));

        let inbound = msg.to_inbound();
        assert_eq!(inbound.text, "你好呀");
        assert_eq!(inbound.sender_id, "10001");
        assert_eq!(inbound.origin, "onebot:group:42");
    }

    #[test]
    fn test_parse_private_message_without_font() {
        let json = r#"{"post_type":"message","message_type":"private","message_id":1,
            "user_id":555,"raw_message":"/kr list","sender":{},"time":1}"#;
        let event: OneBotEvent = serde_json::from_str(json).unwrap();
        let OneBotEvent::Message(msg) = event else {
            panic!("expected message event");
        };
        assert_eq!(msg.origin(), Origin::Private(555));
        assert!(msg.to_inbound().is_command());
    }

    #[test]
    fn test_parse_heartbeat() {
        let json = r#"{"post_type":"meta_event","meta_event_type":"heartbeat",
            "time":1,"status":{"online":true},"interval":5000}"#;
        let event: OneBotEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, OneBotEvent::Meta(MetaEvent::Heartbeat { interval: 5000, .. })));
    }

    #[test]
    fn test_origin_round_trip() {
        for origin in [Origin::Private(1), Origin::Group(-7)] {
            assert_eq!(origin.to_string().parse::<Origin>().unwrap(), origin);
        }
        assert!("console".parse::<Origin>().is_err());
        assert!("onebot:channel:1".parse::<Origin>().is_err());
        assert!("onebot:group:abc".parse::<Origin>().is_err());
    }

    #[test]
    fn test_action_response_is_not_an_event() {
        let json = r#"{"status":"failed","retcode":100,"data":null,"echo":"abc"}"#;
        assert!(serde_json::from_str::<OneBotEvent>(json).is_err());
        let resp: OneBotResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.retcode, 100);
        assert!(resp.message.is_empty());
    }

    #[test]
    fn test_reply_action_shape() {
        let action = SendMessageAction::reply(Origin::Group(42), "嗨！");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "send_group_msg");
        assert_eq!(json["params"]["group_id"], 42);
        assert_eq!(json["params"]["message"], "嗨！");
        assert!(json["params"]["user_id"].is_null());
        assert!(!json["echo"].as_str().unwrap().is_empty());
    }
}
