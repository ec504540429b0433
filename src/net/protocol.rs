//! Wire protocol message definitions
//!
//! Every message is a JSON object carried in one frame (see
//! [`framing`](super::framing)). Server messages are a bag of optional
//! sections; absent sections are omitted from the JSON entirely.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::input::InputSnapshot;

use super::error::NetError;

/// Numeric session id, also the id of the session's car
pub type SessionId = u32;

/// Numeric target id
pub type TargetId = u32;

/// Pose of one car as exchanged on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CarState {
    pub pos: [f32; 2],
    /// Body orientation, radians
    pub a_pos: f32,
    pub vel: [f32; 2],
    pub steering_angle: f32,
    pub wep_angle: f32,
}

/// State of one target as exchanged on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub pos: [f32; 2],
    pub hp: f32,
}

/// Admission details for a freshly registered session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitInfo {
    pub id: SessionId,
    pub init_pos: [f32; 2],
}

/// Server to client message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Sent once, on admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_cars: Option<BTreeMap<SessionId, CarState>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_cars: Option<Vec<SessionId>>,

    /// Per-tick snapshot of every car
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_cars: Option<BTreeMap<SessionId, CarState>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_targets: Option<BTreeMap<TargetId, TargetState>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_targets: Option<Vec<TargetId>>,
}

impl ServerMessage {
    pub fn admission(init: InitInfo, existing: BTreeMap<SessionId, CarState>) -> Self {
        Self {
            init: Some(init),
            add_cars: Some(existing),
            ..Self::default()
        }
    }

    pub fn add_car(id: SessionId, state: CarState) -> Self {
        Self {
            add_cars: Some(BTreeMap::from([(id, state)])),
            ..Self::default()
        }
    }

    pub fn remove_cars(ids: Vec<SessionId>) -> Self {
        Self {
            remove_cars: Some(ids),
            ..Self::default()
        }
    }

    /// Whether the message carries nothing worth sending
    pub fn is_empty(&self) -> bool {
        self.init.is_none()
            && self.add_cars.is_none()
            && self.remove_cars.is_none()
            && self.update_cars.is_none()
            && self.update_targets.is_none()
            && self.remove_targets.is_none()
    }
}

/// A client's own car pose, tagged with its session id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SessionId>,
    #[serde(flatten)]
    pub state: CarState,
}

/// Client to server message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Locally simulated pose, applied as authoritative for the sender's car
    State(ClientState),
    /// Raw input, integrated by the server
    Input(InputSnapshot),
}

/// Serialize a message into a frame payload
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, NetError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

/// Parse a frame payload
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, NetError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Steer;

    #[test]
    fn admission_message_shape() {
        let mut existing = BTreeMap::new();
        existing.insert(0, CarState::default());
        let msg = ServerMessage::admission(
            InitInfo {
                id: 1,
                init_pos: [100.0, 200.0],
            },
            existing,
        );

        let json: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["init"]["id"], 1);
        assert_eq!(json["init"]["init_pos"][0], 100.0);
        assert!(json["add_cars"]["0"]["pos"].is_array());
        assert!(json.get("update_cars").is_none());
        assert!(json.get("remove_cars").is_none());
    }

    #[test]
    fn server_messages_parse_with_missing_sections() {
        let msg: ServerMessage = decode(br#"{"remove_cars":[3,4]}"#).unwrap();
        assert_eq!(msg.remove_cars, Some(vec![3, 4]));
        assert!(msg.update_cars.is_none());
        assert!(!msg.is_empty());
        assert!(ServerMessage::default().is_empty());
    }

    #[test]
    fn client_state_is_recognized() {
        let msg: ClientMessage = decode(
            br#"{"id":2,"pos":[1.0,2.0],"a_pos":0.5,"vel":[0.0,0.0],"steering_angle":0.1,"wep_angle":3.0}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::State(s) => {
                assert_eq!(s.id, Some(2));
                assert_eq!(s.state.pos, [1.0, 2.0]);
                assert_eq!(s.state.wep_angle, 3.0);
            }
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn bare_input_is_recognized() {
        let msg: ClientMessage = decode(br#"{"steer":"left"}"#).unwrap();
        match msg {
            ClientMessage::Input(input) => assert_eq!(input.steer, Steer::Left),
            other => panic!("expected input, got {:?}", other),
        }
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        let payloads: [&[u8]; 3] = [b"not json", br#"{"pos":[1.0]}"#, br#""hello""#];
        for payload in payloads {
            match decode::<ClientMessage>(payload) {
                Err(NetError::Protocol(_)) => {}
                other => panic!("expected protocol error, got {:?}", other),
            }
        }
    }
}
