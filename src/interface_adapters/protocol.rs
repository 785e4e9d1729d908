// Wire protocol DTOs and conversions for the live session WebSocket.
// Frames are `{"type": ..., "data": ...}` JSON text messages with camelCase fields.

use crate::domain::{Participant, ParticipantKey, PointType, Summary};
use crate::use_cases::{
    ActivityAnnouncement, InboundMessage, OutboundMessage, ServerRejection,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages the client sends to the session server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    Join(JoinPayload),
    Leave,
    // Host only; the server rejects it for participants.
    Start,
    Advance,
    SubmitActivity(SubmitActivityPayload),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActivityPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub activity_id: String,
    pub answer_content: serde_json::Value,
}

impl From<OutboundMessage> for ClientFrame {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Join {
                display_name,
                participant_key,
            } => ClientFrame::Join(JoinPayload {
                display_name,
                participant_key: participant_key.map(|key| key.as_str().to_owned()),
            }),
            OutboundMessage::Leave => ClientFrame::Leave,
            OutboundMessage::Start => ClientFrame::Start,
            OutboundMessage::Advance => ClientFrame::Advance,
            OutboundMessage::SubmitActivity {
                session_id,
                activity_id,
                answer_content,
            } => ClientFrame::SubmitActivity(SubmitActivityPayload {
                session_id,
                activity_id,
                answer_content,
            }),
        }
    }
}

/// Messages the session server pushes to clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    // Full roster snapshot, never a delta.
    ParticipantsUpdate(Vec<ParticipantDto>),
    SessionStart(SessionStartDto),
    NextActivity(ActivityDto),
    SessionEnd(Option<SessionEndDto>),
    SessionSummary(Vec<SummaryDto>),
    Error(ErrorDto),
}

/// User ids arrive as numbers from some backends and as strings from others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn user_key(&self) -> ParticipantKey {
        match self {
            WireId::Number(id) => ParticipantKey::from_user_id(*id),
            WireId::Text(id) => ParticipantKey::new(format!("user:{id}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDto {
    #[serde(default)]
    pub participant_key: Option<String>,
    #[serde(default)]
    pub user_id: Option<WireId>,
    #[serde(default)]
    pub guest_id: Option<String>,
}

impl IdentityDto {
    /// Explicit key first, then the authenticated user, then the server-assigned guest id.
    pub fn key(&self) -> Option<ParticipantKey> {
        if let Some(key) = self.participant_key.as_deref().filter(|key| !key.is_empty()) {
            return Some(ParticipantKey::new(key));
        }
        if let Some(user_id) = &self.user_id {
            return Some(user_id.user_key());
        }
        self.guest_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ParticipantKey::from_guest_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    #[serde(flatten)]
    pub identity: IdentityDto,
    pub display_name: String,
    #[serde(default)]
    pub display_avatar: Option<String>,
    #[serde(default)]
    pub realtime_score: i64,
    #[serde(default = "connected_by_default")]
    pub connected: bool,
}

fn connected_by_default() -> bool {
    true
}

impl TryFrom<ParticipantDto> for Participant {
    type Error = FrameError;

    fn try_from(dto: ParticipantDto) -> Result<Self, Self::Error> {
        let key = dto.identity.key().ok_or_else(|| FrameError::MissingIdentity {
            display_name: dto.display_name.clone(),
        })?;
        Ok(Participant {
            key,
            display_name: dto.display_name,
            display_avatar: dto.display_avatar,
            realtime_score: dto.realtime_score,
            connected: dto.connected,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartDto {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndDto {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointTypeDto {
    #[default]
    Standard,
    DoublePoints,
    NoPoints,
}

impl From<PointTypeDto> for PointType {
    fn from(point_type: PointTypeDto) -> Self {
        match point_type {
            PointTypeDto::Standard => PointType::Standard,
            PointTypeDto::DoublePoints => PointType::DoublePoints,
            PointTypeDto::NoPoints => PointType::NoPoints,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDto {
    pub activity_id: String,
    #[serde(default)]
    pub point_type: PointTypeDto,
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl From<ActivityDto> for ActivityAnnouncement {
    fn from(dto: ActivityDto) -> Self {
        Self {
            activity_id: dto.activity_id,
            point_type: dto.point_type.into(),
            sequence: dto.sequence,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    #[serde(flatten)]
    pub identity: IdentityDto,
    pub display_name: String,
    #[serde(default)]
    pub final_score: i64,
    #[serde(default)]
    pub final_ranking: Option<u32>,
}

impl From<SummaryDto> for Summary {
    fn from(dto: SummaryDto) -> Self {
        Self {
            participant_key: dto.identity.key(),
            display_name: dto.display_name,
            final_score: dto.final_score,
            final_ranking: dto.final_ranking,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDto {
    pub message: String,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug)]
pub enum FrameError {
    Json(serde_json::Error),
    // Roster entry with no usable identity; the whole frame is dropped.
    MissingIdentity { display_name: String },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Json(err) => write!(f, "malformed frame: {err}"),
            FrameError::MissingIdentity { display_name } => {
                write!(f, "participant {display_name:?} has no identity")
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Json(err)
    }
}

pub fn encode(message: OutboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ClientFrame::from(message))
}

pub fn decode(text: &str) -> Result<InboundMessage, FrameError> {
    let message = match serde_json::from_str::<ServerFrame>(text)? {
        ServerFrame::ParticipantsUpdate(roster) => InboundMessage::ParticipantsUpdate(
            roster
                .into_iter()
                .map(Participant::try_from)
                .collect::<Result<_, _>>()?,
        ),
        ServerFrame::SessionStart(start) => InboundMessage::SessionStart {
            session_id: start.session_id,
        },
        ServerFrame::NextActivity(activity) => InboundMessage::NextActivity(activity.into()),
        ServerFrame::SessionEnd(end) => InboundMessage::SessionEnd {
            session_id: end.and_then(|end| end.session_id),
        },
        ServerFrame::SessionSummary(rows) => {
            InboundMessage::SessionSummary(rows.into_iter().map(Summary::from).collect())
        }
        ServerFrame::Error(error) => InboundMessage::Rejected(ServerRejection {
            message: error.message,
            action: error.action,
        }),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn encoded(message: OutboundMessage) -> Value {
        let text = encode(message).expect("frame should encode");
        serde_json::from_str(&text).expect("encoded frame should be json")
    }

    #[test]
    fn when_join_is_encoded_then_optional_key_is_omitted() {
        let frame = encoded(OutboundMessage::Join {
            display_name: "Alice".into(),
            participant_key: None,
        });

        assert_eq!(frame, json!({"type": "join", "data": {"displayName": "Alice"}}));
    }

    #[test]
    fn when_join_carries_a_key_then_it_is_sent_as_participant_key() {
        let frame = encoded(OutboundMessage::Join {
            display_name: "Alice".into(),
            participant_key: Some(ParticipantKey::from_user_id(7)),
        });

        assert_eq!(frame["data"]["participantKey"], "user:7");
    }

    #[test]
    fn when_unit_actions_are_encoded_then_only_type_is_sent() {
        assert_eq!(encoded(OutboundMessage::Leave), json!({"type": "leave"}));
        assert_eq!(encoded(OutboundMessage::Start), json!({"type": "start"}));
        assert_eq!(encoded(OutboundMessage::Advance), json!({"type": "advance"}));
    }

    #[test]
    fn when_submission_is_encoded_then_answer_is_passed_through() {
        let frame = encoded(OutboundMessage::SubmitActivity {
            session_id: Some("s-1".into()),
            activity_id: "q1".into(),
            answer_content: json!({"choices": [1, 3]}),
        });

        assert_eq!(
            frame,
            json!({
                "type": "submitActivity",
                "data": {"sessionId": "s-1", "activityId": "q1", "answerContent": {"choices": [1, 3]}}
            })
        );
    }

    #[test]
    fn when_roster_is_decoded_then_keys_follow_identity_precedence() {
        let text = json!({
            "type": "participantsUpdate",
            "data": [
                {"participantKey": "custom", "userId": 1, "displayName": "A"},
                {"userId": 42, "guestId": "g", "displayName": "B", "realtimeScore": 5},
                {"userId": "abc", "displayName": "C"},
                {"guestId": "g9", "displayName": "D", "connected": false, "displayAvatar": "http://x/a.png"}
            ]
        })
        .to_string();

        let InboundMessage::ParticipantsUpdate(roster) = decode(&text).expect("roster should decode")
        else {
            panic!("expected roster");
        };

        let keys: Vec<_> = roster.iter().map(|p| p.key.as_str().to_owned()).collect();
        assert_eq!(keys, ["custom", "user:42", "user:abc", "guest:g9"]);
        assert_eq!(roster[1].realtime_score, 5);
        assert!(roster[0].connected);
        assert!(!roster[3].connected);
        assert_eq!(roster[3].display_avatar.as_deref(), Some("http://x/a.png"));
    }

    #[test]
    fn when_roster_entry_has_no_identity_then_frame_is_rejected() {
        let text = r#"{"type":"participantsUpdate","data":[{"displayName":"Ghost"}]}"#;

        let err = decode(text).expect_err("frame should be rejected");

        assert!(matches!(err, FrameError::MissingIdentity { ref display_name } if display_name == "Ghost"));
    }

    #[test]
    fn when_activity_is_decoded_then_point_type_defaults_to_standard() {
        let text = r#"{"type":"nextActivity","data":{"activityId":"q1"}}"#;
        let InboundMessage::NextActivity(activity) = decode(text).expect("activity should decode")
        else {
            panic!("expected activity");
        };
        assert_eq!(activity.point_type, PointType::Standard);
        assert_eq!(activity.sequence, None);

        let text = r#"{"type":"nextActivity","data":{"activityId":"q2","pointType":"DOUBLE_POINTS","sequence":4}}"#;
        let InboundMessage::NextActivity(activity) = decode(text).expect("activity should decode")
        else {
            panic!("expected activity");
        };
        assert_eq!(activity.point_type, PointType::DoublePoints);
        assert_eq!(activity.sequence, Some(4));
    }

    #[test]
    fn when_session_end_has_no_payload_then_it_still_decodes() {
        let message = decode(r#"{"type":"sessionEnd"}"#).expect("end should decode");
        assert!(matches!(message, InboundMessage::SessionEnd { session_id: None }));

        let message =
            decode(r#"{"type":"sessionEnd","data":{"sessionId":"s-1","reason":"done"}}"#)
                .expect("end should decode");
        assert!(matches!(message, InboundMessage::SessionEnd { session_id: Some(ref id) } if id == "s-1"));
    }

    #[test]
    fn when_server_rejects_an_action_then_error_frame_decodes() {
        let message = decode(r#"{"type":"error","data":{"message":"host only","action":"start"}}"#)
            .expect("error should decode");

        let InboundMessage::Rejected(rejection) = message else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.message, "host only");
        assert_eq!(rejection.action.as_deref(), Some("start"));
    }

    #[test]
    fn when_summary_is_decoded_then_rows_keep_optional_identity() {
        let text = json!({
            "type": "sessionSummary",
            "data": [
                {"guestId": "g1", "displayName": "Alice", "finalScore": 900, "finalRanking": 1},
                {"displayName": "Anonymous", "finalScore": 10}
            ]
        })
        .to_string();

        let InboundMessage::SessionSummary(rows) = decode(&text).expect("summary should decode")
        else {
            panic!("expected summary");
        };
        assert_eq!(rows[0].participant_key, Some(ParticipantKey::from_guest_id("g1")));
        assert_eq!(rows[0].final_ranking, Some(1));
        assert_eq!(rows[1].participant_key, None);
    }

    #[test]
    fn when_frame_type_is_unknown_then_decoding_fails() {
        assert!(matches!(decode(r#"{"type":"bogus","data":{}}"#), Err(FrameError::Json(_))));
        assert!(matches!(decode("not json"), Err(FrameError::Json(_))));
    }
}
