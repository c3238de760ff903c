//! Player session actors.
//!
//! One task per seat sits between the seat's transport and its match actor.
//! It forwards intents in submission order, remembers what the seat was last
//! told, and runs the disconnect timer that turns a dropped seat into an
//! abandoned one.

use crate::match_actor::{ActorError, MatchCommand};
use crate::transport::{Notification, SeatId, Transport};
use saffold_core::{Intent, PlayerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// What a seat is doing, as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Connected, someone else is acting
    Waiting,
    /// Connected, the seat is acting
    Active,
    /// Connected, the seat owes a founding, survivor or liquidation decision
    AwaitingDecision,
    /// Connection lost; the abandon timer is running
    Disconnected,
    /// Gone for good
    Abandoned,
}

/// How a session begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Connected,
    /// Restored after a restart; the timer starts immediately
    Disconnected,
    /// Seat was already abandoned; no task is started
    Abandoned,
}

#[derive(Debug)]
pub enum SessionCommand {
    /// Intent from the seat's client
    Submit(Intent),
    /// Notification from the match actor
    Notify(Notification),
    Connected,
    Disconnected,
    /// Match is over
    Close,
}

/// Handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub seat: SeatId,
    pub player: PlayerId,
    tx: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn spawn(
        seat: SeatId,
        player: PlayerId,
        start: SessionStart,
        match_tx: mpsc::UnboundedSender<MatchCommand>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();

        let initial = match start {
            SessionStart::Connected => SessionStatus::Waiting,
            SessionStart::Disconnected => SessionStatus::Disconnected,
            SessionStart::Abandoned => SessionStatus::Abandoned,
        };
        let (status_tx, status) = watch::channel(initial);

        if start != SessionStart::Abandoned {
            let session = Session {
                seat,
                player,
                inbox,
                match_tx,
                transport,
                timeout,
                status_tx,
                engaged: SessionStatus::Waiting,
                connected: start == SessionStart::Connected,
                last_view: None,
                last_prompt: None,
                queued: Vec::new(),
                deadline: (start == SessionStart::Disconnected).then(|| Instant::now() + timeout),
            };
            tokio::spawn(session.run());
        }

        Self {
            seat,
            player,
            tx,
            status,
        }
    }

    /// Submit an intent on behalf of the seat
    pub fn submit(&self, intent: Intent) -> Result<(), ActorError> {
        self.send(SessionCommand::Submit(intent))
    }

    pub fn send(&self, command: SessionCommand) -> Result<(), ActorError> {
        self.tx
            .send(command)
            .map_err(|_| ActorError::SessionClosed(self.player))
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

struct Session {
    seat: SeatId,
    player: PlayerId,
    inbox: mpsc::UnboundedReceiver<SessionCommand>,
    match_tx: mpsc::UnboundedSender<MatchCommand>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    status_tx: watch::Sender<SessionStatus>,
    /// Connected status implied by the last prompt
    engaged: SessionStatus,
    connected: bool,
    last_view: Option<Notification>,
    last_prompt: Option<Notification>,
    /// Intents submitted while disconnected
    queued: Vec<Intent>,
    /// When the seat is abandoned, if it stays disconnected
    deadline: Option<Instant>,
}

impl Session {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            let expiry = async move {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(SessionCommand::Close) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = expiry => {
                    self.abandon();
                    break;
                }
            }
        }
        debug!(seat = %self.seat, player = self.player, "session stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Submit(intent) => {
                if self.connected {
                    self.forward(intent);
                } else {
                    debug!(player = self.player, "queueing intent while disconnected");
                    self.queued.push(intent);
                }
            }

            SessionCommand::Notify(notification) => {
                match &notification {
                    Notification::YourTurn { .. } => self.engaged = SessionStatus::Active,
                    Notification::YourDecision { .. } => {
                        self.engaged = SessionStatus::AwaitingDecision
                    }
                    Notification::Waiting { .. } | Notification::GameOver { .. } => {
                        self.engaged = SessionStatus::Waiting
                    }
                    Notification::StateChanged { .. } => {
                        self.last_view = Some(notification.clone())
                    }
                    Notification::Rejected { .. } => {}
                }
                if notification.is_prompt() {
                    self.last_prompt = Some(notification.clone());
                }

                if self.connected {
                    self.publish(self.engaged);
                    self.transport.deliver(self.seat, notification);
                }
            }

            SessionCommand::Connected => {
                if !self.connected {
                    info!(seat = %self.seat, player = self.player, "seat reconnected");
                    self.connected = true;
                    self.deadline = None;
                }
                self.publish(self.engaged);

                // Bring the client up to date
                for notification in [self.last_view.clone(), self.last_prompt.clone()]
                    .into_iter()
                    .flatten()
                {
                    self.transport.deliver(self.seat, notification);
                }
                for intent in std::mem::take(&mut self.queued) {
                    self.forward(intent);
                }
            }

            SessionCommand::Disconnected => {
                if self.connected {
                    info!(seat = %self.seat, player = self.player, "seat disconnected");
                    self.connected = false;
                    self.deadline = Some(Instant::now() + self.timeout);
                    self.publish(SessionStatus::Disconnected);
                }
            }

            SessionCommand::Close => {}
        }
    }

    fn forward(&self, intent: Intent) {
        let command = MatchCommand::Intent {
            player: self.player,
            intent,
        };
        if self.match_tx.send(command).is_err() {
            warn!(player = self.player, "match has stopped; intent dropped");
        }
    }

    fn abandon(&mut self) {
        info!(seat = %self.seat, player = self.player, "seat abandoned after timeout");
        self.queued.clear();
        self.publish(SessionStatus::Abandoned);
        if self.match_tx.send(MatchCommand::Abandoned(self.player)).is_err() {
            warn!(player = self.player, "match has stopped before abandonment");
        }
    }

    fn publish(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(300);

    struct Harness {
        handle: SessionHandle,
        match_rx: mpsc::UnboundedReceiver<MatchCommand>,
        delivered: mpsc::UnboundedReceiver<(SeatId, Notification)>,
    }

    fn harness(start: SessionStart) -> Harness {
        let (match_tx, match_rx) = mpsc::unbounded_channel();
        let (transport, delivered) = mpsc::unbounded_channel();
        let handle = SessionHandle::spawn(
            Uuid::new_v4(),
            1,
            start,
            match_tx,
            Arc::new(transport),
            TIMEOUT,
        );
        Harness {
            handle,
            match_rx,
            delivered,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_times_out_to_abandoned() {
        let mut h = harness(SessionStart::Connected);
        h.handle.send(SessionCommand::Disconnected).unwrap();

        time::sleep(TIMEOUT - Duration::from_secs(1)).await;
        assert_eq!(h.handle.status(), SessionStatus::Disconnected);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.handle.status(), SessionStatus::Abandoned);
        assert!(matches!(
            h.match_rx.recv().await,
            Some(MatchCommand::Abandoned(1))
        ));
        assert!(h.handle.submit(Intent::EndTurn).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_timer() {
        let mut h = harness(SessionStart::Connected);
        h.handle.send(SessionCommand::Disconnected).unwrap();
        time::sleep(Duration::from_secs(60)).await;
        h.handle.send(SessionCommand::Connected).unwrap();

        time::sleep(TIMEOUT * 2).await;
        assert_eq!(h.handle.status(), SessionStatus::Waiting);
        assert!(h.match_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_session_starts_timer() {
        let h = harness(SessionStart::Disconnected);
        assert_eq!(h.handle.status(), SessionStatus::Disconnected);

        let mut status = h.handle.watch();
        time::sleep(TIMEOUT + Duration::from_secs(1)).await;
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_intents_forwarded_in_order() {
        let mut h = harness(SessionStart::Connected);
        h.handle.submit(Intent::PassPlacement).unwrap();
        h.handle.submit(Intent::EndTurn).unwrap();

        for expected in [Intent::PassPlacement, Intent::EndTurn] {
            match h.match_rx.recv().await {
                Some(MatchCommand::Intent { player, intent }) => {
                    assert_eq!(player, 1);
                    assert_eq!(intent, expected);
                }
                other => panic!("unexpected command {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_queued_intents_flush_on_reconnect() {
        let mut h = harness(SessionStart::Connected);
        h.handle.send(SessionCommand::Disconnected).unwrap();
        h.handle.submit(Intent::PassPlacement).unwrap();
        h.handle.submit(Intent::EndTurn).unwrap();
        tokio::task::yield_now().await;
        assert!(h.match_rx.try_recv().is_err());

        h.handle.send(SessionCommand::Connected).unwrap();
        let mut forwarded = Vec::new();
        for _ in 0..2 {
            if let Some(MatchCommand::Intent { intent, .. }) = h.match_rx.recv().await {
                forwarded.push(intent);
            }
        }
        assert_eq!(forwarded, vec![Intent::PassPlacement, Intent::EndTurn]);
    }

    #[tokio::test]
    async fn test_prompt_redelivered_on_reconnect() {
        let mut h = harness(SessionStart::Connected);
        let prompt = Notification::YourTurn {
            intents: vec![Intent::PassPlacement],
        };
        h.handle.send(SessionCommand::Notify(prompt.clone())).unwrap();
        assert_eq!(h.delivered.recv().await.unwrap().1, prompt);

        h.handle.send(SessionCommand::Disconnected).unwrap();
        let rejected = Notification::Rejected {
            reason: "nope".into(),
        };
        h.handle.send(SessionCommand::Notify(rejected)).unwrap();
        h.handle.send(SessionCommand::Connected).unwrap();

        // Only the prompt comes back; the rejection was never a prompt
        assert_eq!(h.delivered.recv().await.unwrap().1, prompt);
        let mut status = h.handle.watch();
        status
            .wait_for(|s| *s == SessionStatus::Active)
            .await
            .unwrap();
        assert!(h.delivered.try_recv().is_err());
    }
}
