use serde::{Deserialize, Serialize};

use super::types::{EndpointId, IceCandidate, OutboundMessage, Role};

/// Messages sent from browser to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ClientMessage {
    /// Join the room
    #[serde(rename = "START")]
    Start,

    /// Browser PeerConnection is ready; start ICE gathering
    #[serde(rename = "WEBRTCPEER_READY")]
    WebRtcPeerReady {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
    },

    /// Browser processed our SDP offer
    #[serde(rename = "PROCESS_SDP_ANSWER")]
    ProcessSdpAnswer {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },

    /// Browser renegotiates an established talker (track replaced on mute)
    #[serde(rename = "PROCESS_SDP_REOFFER")]
    ProcessSdpReoffer {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Browser found a local candidate
    #[serde(rename = "ADD_ICE_CANDIDATE")]
    AddIceCandidate {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        candidate: IceCandidate,
    },

    /// Leave the room
    #[serde(rename = "STOP")]
    Stop,

    /// Browser-side failure
    #[serde(rename = "ERROR")]
    Error { message: String },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Start => "START",
            ClientMessage::WebRtcPeerReady { .. } => "WEBRTCPEER_READY",
            ClientMessage::ProcessSdpAnswer { .. } => "PROCESS_SDP_ANSWER",
            ClientMessage::ProcessSdpReoffer { .. } => "PROCESS_SDP_REOFFER",
            ClientMessage::AddIceCandidate { .. } => "ADD_ICE_CANDIDATE",
            ClientMessage::Stop => "STOP",
            ClientMessage::Error { .. } => "ERROR",
        }
    }
}

/// Messages sent from server to browser
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ServerMessage {
    /// New talker endpoint, offer ready
    #[serde(rename = "MAKE_TALKER")]
    MakeTalker {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// New listener endpoint, offer ready
    #[serde(rename = "MAKE_LISTENER")]
    MakeListener {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Engine answer to a browser re-offer
    #[serde(rename = "PROCESS_SDP_REANSWER")]
    ProcessSdpReanswer {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },

    /// Local candidate found by the engine
    #[serde(rename = "ADD_ICE_CANDIDATE")]
    AddIceCandidate {
        #[serde(rename = "webRtcEpId")]
        endpoint_id: EndpointId,
        candidate: IceCandidate,
    },

    /// Server-side failure report
    #[serde(rename = "ERROR")]
    Error { message: String },
}

impl ServerMessage {
    pub fn offer(role: Role, endpoint_id: EndpointId, sdp_offer: String) -> Self {
        match role {
            Role::Talker => ServerMessage::MakeTalker {
                endpoint_id,
                sdp_offer,
            },
            Role::Listener => ServerMessage::MakeListener {
                endpoint_id,
                sdp_offer,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_outbound(&self) -> Result<OutboundMessage, serde_json::Error> {
        serde_json::to_string(self).map(OutboundMessage::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start() {
        let json = r#"{"id": "START"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Start));
    }

    #[test]
    fn parse_webrtcpeer_ready() {
        let json = r#"{"id": "WEBRTCPEER_READY", "webRtcEpId": "ep-1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::WebRtcPeerReady { endpoint_id } = msg {
            assert_eq!(endpoint_id.as_str(), "ep-1");
        } else {
            panic!("Expected WebRtcPeerReady");
        }
    }

    #[test]
    fn parse_sdp_answer() {
        let json = r#"{"id": "PROCESS_SDP_ANSWER", "webRtcEpId": "ep-1", "sdpAnswer": "v=0"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::ProcessSdpAnswer {
            endpoint_id,
            sdp_answer,
        } = msg
        {
            assert_eq!(endpoint_id.as_str(), "ep-1");
            assert_eq!(sdp_answer, "v=0");
        } else {
            panic!("Expected ProcessSdpAnswer");
        }
    }

    #[test]
    fn parse_sdp_reoffer() {
        let json = r#"{"id": "PROCESS_SDP_REOFFER", "webRtcEpId": "ep-1", "sdpOffer": "v=0"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind(), "PROCESS_SDP_REOFFER");
        assert!(matches!(
            msg,
            ClientMessage::ProcessSdpReoffer { ref sdp_offer, .. } if sdp_offer == "v=0"
        ));
    }

    #[test]
    fn parse_add_ice_candidate() {
        let json = r#"{"id": "ADD_ICE_CANDIDATE", "webRtcEpId": "ep-1",
            "candidate": {"candidate": "candidate:0 1 UDP 1 1.2.3.4 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::AddIceCandidate {
            endpoint_id,
            candidate,
        } = msg
        {
            assert_eq!(endpoint_id.as_str(), "ep-1");
            assert_eq!(candidate.sdp_mid, "0");
        } else {
            panic!("Expected AddIceCandidate");
        }
    }

    #[test]
    fn parse_error_and_stop() {
        let msg: ClientMessage = serde_json::from_str(r#"{"id": "ERROR", "message": "oops"}"#).unwrap();
        assert_eq!(msg.kind(), "ERROR");
        let msg: ClientMessage = serde_json::from_str(r#"{"id": "STOP"}"#).unwrap();
        assert_eq!(msg.kind(), "STOP");
    }

    #[test]
    fn missing_field_is_rejected() {
        let json = r#"{"id": "PROCESS_SDP_ANSWER", "webRtcEpId": "ep-1"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{"id": "MUTE"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn serialize_make_talker() {
        let msg = ServerMessage::offer(Role::Talker, EndpointId::from("ep-1"), "v=0".to_string());
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["id"], "MAKE_TALKER");
        assert_eq!(value["webRtcEpId"], "ep-1");
        assert_eq!(value["sdpOffer"], "v=0");
    }

    #[test]
    fn serialize_make_listener() {
        let msg = ServerMessage::offer(Role::Listener, EndpointId::from("ep-2"), "v=0".to_string());
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["id"], "MAKE_LISTENER");
        assert_eq!(value["webRtcEpId"], "ep-2");
    }

    #[test]
    fn serialize_reanswer() {
        let msg = ServerMessage::ProcessSdpReanswer {
            endpoint_id: EndpointId::from("ep-1"),
            sdp_answer: "v=0".to_string(),
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["id"], "PROCESS_SDP_REANSWER");
        assert_eq!(value["webRtcEpId"], "ep-1");
        assert_eq!(value["sdpAnswer"], "v=0");
    }

    #[test]
    fn serialize_add_ice_candidate() {
        let msg = ServerMessage::AddIceCandidate {
            endpoint_id: EndpointId::from("ep-3"),
            candidate: IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: "0".to_string(),
                sdp_m_line_index: 0,
            },
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["id"], "ADD_ICE_CANDIDATE");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn serialize_error() {
        let json = serde_json::to_string(&ServerMessage::error("boom")).unwrap();
        assert!(json.contains("\"id\":\"ERROR\""));
        assert!(json.contains("boom"));
    }
}
