//! Per-connection view of a room.

use crate::entity::SessionId;
use crate::room::{TargetedMessage, TargetedMessageType};
use crate::sim::WorldSnapshot;
use protocol::BinaryWriter;
use protocol::packets::{self, SnapshotBody};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;

/// What one connection has been told so far.
#[derive(Debug)]
pub struct ClientView {
    pub session: SessionId,
    /// Coins this client already knows about.
    known_coins: HashSet<u32>,
}

impl ClientView {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            known_coins: HashSet::new(),
        }
    }

    /// Encode a snapshot, sending coins as a delta against the last one.
    pub fn snapshot_packet(&mut self, snapshot: &WorldSnapshot) -> BinaryWriter {
        let current: HashSet<u32> = snapshot.coins.iter().map(|c| c.id).collect();
        let added: Vec<SnapshotBody> = snapshot
            .coins
            .iter()
            .filter(|c| !self.known_coins.contains(&c.id))
            .copied()
            .collect();
        let mut removed: Vec<u32> = self
            .known_coins
            .iter()
            .filter(|id| !current.contains(id))
            .copied()
            .collect();
        removed.sort_unstable();
        self.known_coins = current;

        packets::build_snapshot(
            snapshot.tick,
            &snapshot.players,
            &added,
            &removed,
            &snapshot.hazards,
            &snapshot.leaderboard,
        )
    }
}

/// What a connection does with one receive from the targeted channel.
#[derive(Debug)]
pub enum Delivery {
    Send(BinaryWriter),
    Skip,
    Close,
}

/// Route one targeted receive for `session`.
///
/// A lagged receiver closes the connection: the skipped messages may have
/// held this session's Disconnect.
pub fn route_targeted(received: Result<TargetedMessage, RecvError>, session: SessionId) -> Delivery {
    match received {
        Ok(msg) if !msg.is_for(session) => Delivery::Skip,
        Ok(msg) => encode_targeted(&msg.message).map_or(Delivery::Close, Delivery::Send),
        Err(RecvError::Lagged(_) | RecvError::Closed) => Delivery::Close,
    }
}

/// Wire packet for a targeted message; `None` for [`TargetedMessageType::Disconnect`].
pub fn encode_targeted(message: &TargetedMessageType) -> Option<BinaryWriter> {
    let packet = match message {
        TargetedMessageType::Joined {
            session,
            position,
            mass,
            world_size,
            playable_radius,
            declared_stake,
            stake_pending,
        } => packets::build_joined(
            *session,
            *position,
            *mass,
            *world_size,
            *playable_radius,
            *declared_stake,
            *stake_pending,
        ),
        TargetedMessageType::Eliminated {
            final_score,
            final_mass,
            eliminator,
        } => packets::build_eliminated(*final_score, *final_mass, eliminator),
        TargetedMessageType::StakeTransfer { winner, loser, amount } => {
            packets::build_stake_transfer(winner, loser, *amount)
        }
        TargetedMessageType::StakeCredit { amount, from } => packets::build_stake_credit(*amount, from),
        TargetedMessageType::StakeDebit { amount, to } => packets::build_stake_debit(*amount, to),
        TargetedMessageType::StakeStatus { status, amount } => packets::build_stake_status(*status, *amount),
        TargetedMessageType::Kicked { reason } => packets::build_kicked(reason),
        TargetedMessageType::Disconnect => return None,
    };
    Some(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use protocol::BinaryReader;
    use protocol::packets::{ServerOpcode, StakeStatus};

    fn coin(id: u32) -> SnapshotBody {
        SnapshotBody {
            id,
            position: Vec2::new(id as f32, 0.0),
            radius: 6.0,
        }
    }

    fn snapshot(tick: u64, coins: &[u32]) -> WorldSnapshot {
        WorldSnapshot {
            tick,
            players: Vec::new(),
            coins: coins.iter().map(|&id| coin(id)).collect(),
            hazards: Vec::new(),
            leaderboard: Vec::new(),
        }
    }

    /// Read (added ids, removed ids) out of an encoded snapshot.
    fn coin_delta(packet: BinaryWriter) -> (Vec<u32>, Vec<u32>) {
        let mut r = BinaryReader::new(packet.finish());
        assert_eq!(r.get_u8().unwrap(), ServerOpcode::Snapshot as u8);
        r.get_u64().unwrap();
        assert_eq!(r.get_u32().unwrap(), 0);

        let mut added = Vec::new();
        for _ in 0..r.get_u32().unwrap() {
            added.push(r.get_u32().unwrap());
            r.get_f32().unwrap();
            r.get_f32().unwrap();
            r.get_f32().unwrap();
        }
        let mut removed = Vec::new();
        for _ in 0..r.get_u32().unwrap() {
            removed.push(r.get_u32().unwrap());
        }
        (added, removed)
    }

    #[test]
    fn test_first_snapshot_sends_every_coin() {
        let mut view = ClientView::new(1);
        let (mut added, removed) = coin_delta(view.snapshot_packet(&snapshot(1, &[3, 5, 8])));
        added.sort_unstable();
        assert_eq!(added, vec![3, 5, 8]);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_coin_delta_tracks_pickups_and_respawns() {
        let mut view = ClientView::new(1);
        view.snapshot_packet(&snapshot(1, &[3, 5, 8]));
        let (added, removed) = coin_delta(view.snapshot_packet(&snapshot(2, &[3, 8, 9])));
        assert_eq!(added, vec![9]);
        assert_eq!(removed, vec![5]);

        let (added, removed) = coin_delta(view.snapshot_packet(&snapshot(3, &[3, 8, 9])));
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn test_encode_targeted() {
        let status = encode_targeted(&TargetedMessageType::StakeStatus {
            status: StakeStatus::Refunded,
            amount: 12,
        })
        .unwrap();
        let mut r = BinaryReader::new(status.finish());
        assert_eq!(r.get_u8().unwrap(), ServerOpcode::StakeStatus as u8);
        assert_eq!(r.get_u8().unwrap(), StakeStatus::Refunded as u8);
        assert_eq!(r.get_u64().unwrap(), 12);

        let kicked = encode_targeted(&TargetedMessageType::Kicked {
            reason: "speed".into(),
        })
        .unwrap();
        assert_eq!(kicked.as_slice()[0], ServerOpcode::Kicked as u8);

        assert!(encode_targeted(&TargetedMessageType::Disconnect).is_none());
    }

    fn to(target: Option<SessionId>, message: TargetedMessageType) -> Result<TargetedMessage, RecvError> {
        Ok(TargetedMessage { target, message })
    }

    #[test]
    fn test_route_targeted() {
        let kicked = TargetedMessageType::Kicked { reason: "speed".into() };
        assert!(matches!(route_targeted(to(Some(2), kicked.clone()), 1), Delivery::Skip));
        assert!(matches!(route_targeted(to(Some(1), kicked.clone()), 1), Delivery::Send(_)));
        assert!(matches!(route_targeted(to(None, kicked), 1), Delivery::Send(_)));
        assert!(matches!(
            route_targeted(to(Some(1), TargetedMessageType::Disconnect), 1),
            Delivery::Close
        ));
        assert!(matches!(route_targeted(to(Some(2), TargetedMessageType::Disconnect), 1), Delivery::Skip));
        assert!(matches!(route_targeted(Err(RecvError::Closed), 1), Delivery::Close));
    }

    #[tokio::test]
    async fn test_lagged_receiver_closes() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(2);
        // The Disconnect for session 1 falls out of the buffer.
        tx.send(TargetedMessage { target: Some(1), message: TargetedMessageType::Disconnect }).unwrap();
        for _ in 0..3 {
            tx.send(TargetedMessage { target: Some(2), message: TargetedMessageType::Disconnect }).unwrap();
        }

        let received = rx.recv().await;
        assert!(matches!(received, Err(RecvError::Lagged(2))));
        assert!(matches!(route_targeted(received, 1), Delivery::Close));
    }
}
