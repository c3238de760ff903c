//! WebSocket protocol messages for Saffold.

use crate::transport::{MatchId, Notification, SeatId};
use saffold_core::{Intent, PlayerId};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Seat the named players in a new match
    CreateMatch {
        players: Vec<String>,
        #[serde(default)]
        seed: Option<String>,
    },

    /// Attach this connection to a seat
    JoinMatch { match_id: MatchId, seat_id: SeatId },

    /// Act on behalf of the attached seat
    Intent { intent: Intent },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Match created; hand each seat id to its player
    MatchCreated {
        match_id: MatchId,
        seats: Vec<SeatInfo>,
    },

    /// Connection is now attached to a seat
    Joined { match_id: MatchId, player: PlayerId },

    /// Something from the match
    Notification(Notification),

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}

/// One seat of a new match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub player: PlayerId,
    pub name: String,
    pub seat_id: SeatId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use saffold_core::{ChainId, Coord};
    use uuid::Uuid;

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"CreateMatch","payload":{"players":["Alice","Bob"]}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::CreateMatch { ref players, seed: None } if players.len() == 2
        ));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"Intent","payload":{"intent":{"PlaceTile":"D6"}}}"#,
        )
        .unwrap();
        let tile: Coord = "D6".parse().unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Intent { intent: Intent::PlaceTile(c) } if c == tile
        ));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"Intent","payload":{"intent":{"BuyShares":{"chain":"Messla","count":2}}}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Intent {
                intent: Intent::BuyShares { chain: ChainId::Messla, count: 2 }
            }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"Ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_bad_coordinate_is_refused() {
        let parsed = serde_json::from_str::<ClientMessage>(
            r#"{"type":"Intent","payload":{"intent":{"PlaceTile":"Z99"}}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let match_id = Uuid::new_v4();
        let msg = ServerMessage::Joined {
            match_id,
            player: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Joined");
        assert_eq!(json["payload"]["player"], 1);

        let msg = ServerMessage::Notification(Notification::Rejected {
            reason: "Not your turn".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Notification");
        assert_eq!(json["payload"]["kind"], "Rejected");
        assert_eq!(json["payload"]["data"]["reason"], "Not your turn");
    }
}
