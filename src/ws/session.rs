//! Session protocol handler - applies one connection's messages to the world

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{PhysicsSystem, PlayerPatch, Position, World};
use crate::util::time::unix_millis;

use super::broadcast::Broadcaster;
use super::connections::Frame;
use super::protocol::{BulletShot, ClientMsg, ServerMsg};

/// Longest display name kept, in characters; the rest is cut off
pub const MAX_NAME_CHARS: usize = 32;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, default player created, no name yet
    Connected,
    /// Name set
    Registered,
    /// Terminal; registry entries removed
    Closed,
}

/// Inbound messages that were dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("session is closed")]
    Closed,
}

/// Per-connection protocol state machine
pub struct Session {
    id: Uuid,
    phase: SessionPhase,
    world: Arc<World>,
    broadcaster: Broadcaster,
    clamp_positions: bool,
}

impl Session {
    /// Register the connection, queueing its `welcome` as the first frame
    pub fn open(state: &AppState, outbound: mpsc::Sender<Frame>) -> Self {
        let id = state.broadcaster.admit(outbound);
        info!(conn_id = %id, "Session opened");

        Self {
            id,
            phase: SessionPhase::Connected,
            world: state.world.clone(),
            broadcaster: state.broadcaster.clone(),
            clamp_positions: state.config.clamp_positions,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Decode and apply one text frame
    pub fn handle_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        let msg = serde_json::from_str::<ClientMsg>(text)?;
        self.handle(msg)
    }

    /// Apply one decoded message
    pub fn handle(&mut self, msg: ClientMsg) -> Result<(), ProtocolError> {
        if self.phase == SessionPhase::Closed {
            return Err(ProtocolError::Closed);
        }

        match msg {
            ClientMsg::Register { id, name } => {
                self.note_client_id(id.as_deref());
                let name: String = name.chars().take(MAX_NAME_CHARS).collect();
                self.update(PlayerPatch::name(name))?;
                if self.phase == SessionPhase::Connected {
                    info!(conn_id = %self.id, "Player registered");
                }
                self.phase = SessionPhase::Registered;
                self.broadcaster.publish_state();
            }
            ClientMsg::Move { id, position } => {
                self.note_client_id(id.as_deref());
                if !position.is_finite() {
                    return Err(ProtocolError::NonFinite("position"));
                }
                let position = if self.clamp_positions {
                    PhysicsSystem::clamp_player(position)
                } else {
                    position
                };
                self.update(PlayerPatch::position(position))?;
                self.broadcaster.publish_state();
            }
            ClientMsg::Bullet { bullet } => {
                let BulletShot { x, y, vx, vy } = bullet;
                if ![x, y, vx, vy].iter().all(|v| v.is_finite()) {
                    return Err(ProtocolError::NonFinite("bullet"));
                }
                let bullet = self.world.spawn_bullet(Position::new(x, y), vx, vy);
                if !bullet.in_bounds() {
                    // Never stored, so nobody hears about it
                    debug!(conn_id = %self.id, x, y, "Bullet spawned out of bounds, dropped");
                    return Ok(());
                }
                debug!(conn_id = %self.id, bullet_id = %bullet.id, "Bullet spawned");
                self.broadcaster.publish_event(bullet);
                self.broadcaster.publish_state();
            }
            ClientMsg::Ping { t } => {
                let pong = ServerMsg::Pong {
                    t,
                    server_time: unix_millis(),
                };
                if let Err(e) = self.broadcaster.send_to(&self.id, &pong) {
                    debug!(conn_id = %self.id, error = %e, "Pong not delivered");
                }
            }
        }

        Ok(())
    }

    /// Leave the world and tell everyone else. Safe to call more than once.
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;

        if self.world.disconnect(&self.id) {
            self.broadcaster.publish_state();
        }
        info!(conn_id = %self.id, "Session closed");
    }

    fn update(&mut self, patch: PlayerPatch) -> Result<(), ProtocolError> {
        if self.world.update_connected(self.id, patch).is_none() {
            // Reaped by a failed delivery; nothing left to update
            self.phase = SessionPhase::Closed;
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }

    fn note_client_id(&self, claimed: Option<&str>) {
        if let Some(claimed) = claimed {
            if claimed != self.id.to_string() {
                debug!(conn_id = %self.id, claimed, "Ignoring client-supplied id");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::physics::PLAYER_MAX_X;
    use crate::game::Player;
    use tokio_test::{assert_err, assert_ok};

    fn state_with(config: Config) -> AppState {
        AppState::new(config)
    }

    fn connect(state: &AppState) -> (Session, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(64);
        (Session::open(state, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn last_players(frames: &[ServerMsg]) -> Vec<Player> {
        frames
            .iter()
            .rev()
            .find_map(|f| match f {
                ServerMsg::Players { players, .. } => Some(players.clone()),
                _ => None,
            })
            .expect("no players frame")
    }

    #[test]
    fn open_welcomes_with_server_minted_id() {
        let state = state_with(Config::default());
        let (session, mut rx) = connect(&state);

        assert_eq!(session.phase(), SessionPhase::Connected);
        match drain(&mut rx).as_slice() {
            [ServerMsg::Welcome { id, .. }] => assert_eq!(*id, session.id()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(state.world.player(&session.id()).is_some());
    }

    #[test]
    fn register_then_bullet_then_disconnect() {
        let state = state_with(Config::default());
        let (mut a, mut rx_a) = connect(&state);
        let (mut b, mut rx_b) = connect(&state);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let text = format!(r#"{{"type":"register","id":"{}","name":"Al"}}"#, a.id());
        assert_ok!(a.handle_text(&text));
        assert_eq!(a.phase(), SessionPhase::Registered);

        for rx in [&mut rx_a, &mut rx_b] {
            let players = last_players(&drain(rx));
            assert_eq!(players.len(), 2);
            assert_eq!(players[0].id, a.id());
            assert_eq!(players[0].name, "Al");
            assert_eq!(players[0].position, Position::new(0.0, 0.0));
            assert_eq!(players[1].id, b.id());
            assert_eq!(players[1].name, "");
        }

        assert_ok!(a.handle_text(r#"{"type":"bullet","bullet":{"x":0,"y":0,"vx":1,"vy":0}}"#));
        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 2);
            match &frames[0] {
                ServerMsg::Bullet { bullet } => {
                    assert_eq!((bullet.x, bullet.y, bullet.vx, bullet.vy), (0.0, 0.0, 1.0, 0.0));
                }
                other => panic!("unexpected {:?}", other),
            }
            match &frames[1] {
                ServerMsg::Players { players, bullets } => {
                    assert_eq!(players.len(), 2);
                    assert_eq!(players[0].name, "Al");
                    assert!(bullets.is_none());
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        b.close();
        assert_eq!(b.phase(), SessionPhase::Closed);
        let players = last_players(&drain(&mut rx_a));
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, a.id());

        // Nothing reaches b after closure
        assert_ok!(a.handle_text(r#"{"type":"move","position":{"x":5,"y":5}}"#));
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn server_ids_for_bullets_ignore_client_ids() {
        let state = state_with(Config::default());
        let (mut a, mut rx) = connect(&state);
        drain(&mut rx);

        let msg = r#"{"type":"bullet","bullet":{"id":"same","x":10,"y":10,"vx":0,"vy":1}}"#;
        assert_ok!(a.handle_text(msg));
        assert_ok!(a.handle_text(msg));

        let ids: Vec<Uuid> = drain(&mut rx)
            .into_iter()
            .filter_map(|f| match f {
                ServerMsg::Bullet { bullet } => Some(bullet.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn last_move_wins() {
        let state = state_with(Config::default());
        let (mut a, _rx) = connect(&state);

        for i in 0..20 {
            let text = format!(r#"{{"type":"move","position":{{"x":{},"y":{}}}}}"#, i * 10, i * 5);
            assert_ok!(a.handle_text(&text));
        }
        assert_ok!(a.handle_text(r#"{"type":"register","name":"Zed"}"#));

        let player = state.world.player(&a.id()).unwrap();
        assert_eq!(player.position, Position::new(190.0, 95.0));
        assert_eq!(player.name, "Zed");
    }

    #[test]
    fn moves_are_clamped_server_side() {
        let state = state_with(Config::default());
        let (mut a, _rx) = connect(&state);

        assert_ok!(a.handle_text(r#"{"type":"move","position":{"x":5000,"y":-20}}"#));
        let player = state.world.player(&a.id()).unwrap();
        assert_eq!(player.position, Position::new(PLAYER_MAX_X, 0.0));
    }

    #[test]
    fn clamping_can_be_disabled() {
        let config = Config {
            clamp_positions: false,
            ..Config::default()
        };
        let state = state_with(config);
        let (mut a, _rx) = connect(&state);

        assert_ok!(a.handle_text(r#"{"type":"move","position":{"x":5000,"y":-20}}"#));
        let player = state.world.player(&a.id()).unwrap();
        assert_eq!(player.position, Position::new(5000.0, -20.0));
    }

    #[test]
    fn malformed_messages_change_nothing() {
        let state = state_with(Config::default());
        let (mut a, mut rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);
        assert_ok!(a.handle_text(r#"{"type":"move","position":{"x":42,"y":24}}"#));
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert!(matches!(
            a.handle_text(r#"{"type":"move"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert_err!(a.handle_text(r#"{"type":"dance"}"#));
        assert_err!(a.handle_text("{{{"));
        assert_err!(a.handle_text(r#"{"type":"bullet","bullet":{"x":1}}"#));

        assert_eq!(
            state.world.player(&a.id()).unwrap().position,
            Position::new(42.0, 24.0)
        );
        assert_eq!(a.phase(), SessionPhase::Connected);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());

        // Still usable afterwards
        assert_ok!(a.handle_text(r#"{"type":"register","name":"ok"}"#));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let state = state_with(Config::default());
        let (mut a, _rx) = connect(&state);

        let err = a
            .handle(ClientMsg::Move {
                id: None,
                position: Position::new(f32::NAN, 1.0),
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NonFinite("position")));

        let err = a
            .handle(ClientMsg::Bullet {
                bullet: BulletShot {
                    x: 1.0,
                    y: 1.0,
                    vx: f32::INFINITY,
                    vy: 0.0,
                },
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NonFinite("bullet")));
        assert_eq!(state.world.stats().bullets, 0);
    }

    #[test]
    fn ping_answers_sender_only() {
        let state = state_with(Config::default());
        let (mut a, mut rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_ok!(a.handle_text(r#"{"type":"ping","t":1234}"#));
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerMsg::Pong { t: 1234, .. }]
        ));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn out_of_bounds_bullet_is_not_announced() {
        let state = state_with(Config::default());
        let (mut a, mut rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_ok!(a.handle_text(r#"{"type":"bullet","bullet":{"x":905,"y":300,"vx":-1,"vy":0}}"#));
        assert_eq!(state.world.stats().bullets, 0);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());

        // The edge of the field still counts as inside
        assert_ok!(a.handle_text(r#"{"type":"bullet","bullet":{"x":900,"y":600,"vx":-1,"vy":0}}"#));
        assert_eq!(state.world.stats().bullets, 1);
        assert!(matches!(
            drain(&mut rx_b).as_slice(),
            [ServerMsg::Bullet { .. }, ServerMsg::Players { .. }]
        ));
    }

    #[test]
    fn long_names_are_truncated() {
        let state = state_with(Config::default());
        let (mut a, _rx) = connect(&state);

        let long = "é".repeat(MAX_NAME_CHARS + 10);
        assert_ok!(a.handle(ClientMsg::Register {
            id: None,
            name: long,
        }));
        let name = state.world.player(&a.id()).unwrap().name;
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
        assert_eq!(name, "é".repeat(MAX_NAME_CHARS));

        assert_ok!(a.handle_text(r#"{"type":"register","name":"Al"}"#));
        assert_eq!(state.world.player(&a.id()).unwrap().name, "Al");
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_messages() {
        let state = state_with(Config::default());
        let (mut a, _rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);
        drain(&mut rx_b);

        a.close();
        a.close();
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(matches!(
            a.handle_text(r#"{"type":"register","name":"late"}"#),
            Err(ProtocolError::Closed)
        ));
        assert!(state.world.player(&a.id()).is_none());
    }

    #[test]
    fn reaped_session_does_not_resurrect_player() {
        let state = state_with(Config::default());
        let (mut a, rx_a) = connect(&state);
        let (mut b, _rx_b) = connect(&state);

        // a's writer dies; the next broadcast removes it
        drop(rx_a);
        assert_ok!(b.handle_text(r#"{"type":"register","name":"B"}"#));
        assert!(state.world.connection(&a.id()).is_none());

        assert!(matches!(
            a.handle_text(r#"{"type":"move","position":{"x":1,"y":1}}"#),
            Err(ProtocolError::Closed)
        ));
        assert_eq!(a.phase(), SessionPhase::Closed);
        assert!(state.world.player(&a.id()).is_none());
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_registry_consistent() {
        let state = state_with(Config::default());
        let mut tasks = Vec::new();
        for n in 0..16 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, mut rx) = mpsc::channel(4096);
                let mut session = Session::open(&state, tx);
                let name = format!(r#"{{"type":"register","name":"p{}"}}"#, n);
                session.handle_text(&name).unwrap();
                for i in 0..20 {
                    let text = format!(
                        r#"{{"type":"bullet","bullet":{{"x":{},"y":10,"vx":1,"vy":1}}}}"#,
                        i
                    );
                    session.handle_text(&text).unwrap();
                    tokio::task::yield_now().await;
                }
                let mut ids = Vec::new();
                while let Ok(frame) = rx.try_recv() {
                    if let Ok(ServerMsg::Bullet { bullet }) = serde_json::from_str(&frame) {
                        ids.push(bullet.id);
                    }
                }
                session.close();
                ids
            }));
        }

        let mut all = std::collections::HashSet::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }

        // Each spawner saw its own bullets, and no two bullets share an id
        assert_eq!(all.len(), 16 * 20);
        assert_eq!(state.world.stats().players, 0);
        assert_eq!(state.world.stats().connections, 0);
        assert_eq!(state.world.stats().bullets, 16 * 20);
    }
}
