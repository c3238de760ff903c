//! Outbound delivery to seats.
//!
//! Actors never talk to sockets. They hand a `Notification` for a seat to a
//! `Transport`, which delivers it or drops it without reporting back.

use crate::view::MatchView;
use saffold_core::{Decision, Intent, PlayerId, Standing};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies a live or stored match
pub type MatchId = Uuid;

/// Identifies one seat of one match; the only credential a client holds
pub type SeatId = Uuid;

/// Everything the server tells a seat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Notification {
    /// Fresh snapshot after a change
    StateChanged { view: Box<MatchView> },

    /// The seat must act; these are its legal intents
    YourTurn { intents: Vec<Intent> },

    /// The seat owes a specific decision
    YourDecision {
        decision: Decision,
        intents: Vec<Intent>,
    },

    /// Someone else is acting
    Waiting { for_player: PlayerId, name: String },

    /// The seat's last intent was refused
    Rejected { reason: String },

    /// The match is over
    GameOver { standings: Vec<Standing> },
}

impl Notification {
    /// Prompts tell a seat what it should be doing; they are re-sent on reconnect
    pub fn is_prompt(&self) -> bool {
        matches!(
            self,
            Notification::YourTurn { .. }
                | Notification::YourDecision { .. }
                | Notification::Waiting { .. }
                | Notification::GameOver { .. }
        )
    }
}

/// Fire-and-forget delivery to a seat
pub trait Transport: Send + Sync + 'static {
    fn deliver(&self, seat: SeatId, notification: Notification);
}

/// Channel transport, mostly for tests and embedding
impl Transport for mpsc::UnboundedSender<(SeatId, Notification)> {
    fn deliver(&self, seat: SeatId, notification: Notification) {
        let _ = self.send((seat, notification));
    }
}
