use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::events::{EventRegistry, MethodCall};
use crate::models::{placeholder_name, ChatEvent, ChatRecord, MissingPlayerPolicy, PlayerRegistry};
use crate::player::BattlePlayer;

pub const CHAT_ENTITY: &str = "Avatar";
pub const CHAT_METHOD: &str = "onChatMessage";

/// "No player" and "system" senders; never recorded.
pub const SENTINEL_PLAYER_IDS: [i64; 2] = [0, -1];

/// Chat events captured during one playback run
#[derive(Debug, Clone, Default)]
pub struct ChatCapture {
    events: Arc<Mutex<Vec<ChatEvent>>>,
}

impl ChatCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles `onChatMessage(player_id, namespace, message, _)`.
    ///
    /// Never fails: malformed calls are logged and skipped so that playback
    /// carries on.
    pub fn on_chat_message(&self, call: &MethodCall) {
        let (player_id, namespace, message) = match chat_args(&call.args) {
            Some(args) => args,
            None => {
                tracing::warn!(
                    "Ignoring malformed {} call on entity {}: {:?}",
                    CHAT_METHOD,
                    call.entity_id,
                    call.args
                );
                return;
            }
        };
        if SENTINEL_PLAYER_IDS.contains(&player_id) {
            return;
        }

        let event = ChatEvent {
            player_id,
            namespace: namespace.to_string(),
            message: message.to_string(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    pub fn snapshot(&self) -> Vec<ChatEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn chat_args(args: &[Value]) -> Option<(i64, &str, &str)> {
    let player_id = args.first()?.as_i64()?;
    let namespace = args.get(1)?.as_str()?;
    let message = args.get(2)?.as_str()?;
    Some((player_id, namespace, message))
}

/// `[CLAN]NAME: MESSAGE`, or `NAME: MESSAGE` when the clan tag is blank
pub fn display_line(clan_tag: &str, name: &str, message: &str) -> String {
    if clan_tag.trim().is_empty() {
        format!("{}: {}", name, message)
    } else {
        format!("[{}]{}: {}", clan_tag, name, message)
    }
}

/// Joins captured events with the post-battle registry, keeping capture order.
pub fn format_chats(
    events: &[ChatEvent],
    players: &PlayerRegistry,
    policy: MissingPlayerPolicy,
) -> Vec<ChatRecord> {
    let mut dropped = 0usize;
    let records: Vec<ChatRecord> = events
        .iter()
        .filter_map(|event| {
            let (name, clan) = match (players.get(&event.player_id), policy) {
                (Some(info), _) => (
                    info.name.clone(),
                    info.clan_tag.clone().unwrap_or_default(),
                ),
                (None, MissingPlayerPolicy::Placeholder) => {
                    (placeholder_name(event.player_id), String::new())
                }
                (None, MissingPlayerPolicy::Drop) => {
                    dropped += 1;
                    return None;
                }
            };
            Some(ChatRecord {
                player_id: event.player_id,
                display: display_line(&clan, &name, &event.message),
                player_name: name,
                clan_tag: clan,
                namespace: event.namespace.clone(),
                message: event.message.clone(),
            })
        })
        .collect();

    if dropped > 0 {
        tracing::debug!(
            "Dropped {} chat messages from players missing in the post-battle registry",
            dropped
        );
    }
    records
}

/// A battle player that listens for chat messages
pub struct ChatPlayer {
    inner: Box<dyn BattlePlayer>,
    events: EventRegistry,
    capture: ChatCapture,
}

impl ChatPlayer {
    pub fn new(inner: Box<dyn BattlePlayer>) -> Self {
        let capture = ChatCapture::new();
        let mut events = EventRegistry::new();
        let sink = capture.clone();
        events.subscribe_method_call(CHAT_ENTITY, CHAT_METHOD, move |call| {
            sink.on_chat_message(call)
        });
        tracing::trace!(
            "Subscribed {} handler(s) to {}.{}",
            events.handler_count(CHAT_ENTITY, CHAT_METHOD),
            CHAT_ENTITY,
            CHAT_METHOD
        );
        Self {
            inner,
            events,
            capture,
        }
    }

    pub fn play(&mut self, payload: &[u8], strict_mode: bool) -> Result<()> {
        self.inner.play(payload, strict_mode, &mut self.events)
    }

    pub fn captured(&self) -> Vec<ChatEvent> {
        self.capture.snapshot()
    }

    /// Empty when playback produced no player info.
    pub fn chats(&self, policy: MissingPlayerPolicy) -> Vec<ChatRecord> {
        match self.inner.players_info() {
            Some(players) => format_chats(&self.capture.snapshot(), players, policy),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::PlayerInfo;
    use serde_json::json;

    /// Emits a fixed list of calls and then exposes a fixed registry.
    /// Every `play` appends its strict flag to `strict_modes`.
    pub(crate) struct ScriptedPlayer {
        pub calls: Vec<MethodCall>,
        pub players: Option<PlayerRegistry>,
        pub revealed: bool,
        pub strict_modes: Arc<Mutex<Vec<bool>>>,
    }

    impl ScriptedPlayer {
        pub(crate) fn new(calls: Vec<MethodCall>, players: Option<PlayerRegistry>) -> Self {
            Self {
                calls,
                players,
                revealed: false,
                strict_modes: Arc::default(),
            }
        }

        pub(crate) fn with_strict_log(mut self, log: Arc<Mutex<Vec<bool>>>) -> Self {
            self.strict_modes = log;
            self
        }
    }

    impl BattlePlayer for ScriptedPlayer {
        fn play(
            &mut self,
            _payload: &[u8],
            strict_mode: bool,
            events: &mut EventRegistry,
        ) -> Result<()> {
            self.strict_modes.lock().unwrap().push(strict_mode);
            for call in &self.calls {
                events.dispatch(call);
            }
            self.revealed = true;
            Ok(())
        }

        fn players_info(&self) -> Option<&PlayerRegistry> {
            if self.revealed {
                self.players.as_ref()
            } else {
                None
            }
        }
    }

    pub(crate) fn chat_call(player_id: i64, namespace: &str, message: &str) -> MethodCall {
        MethodCall {
            entity_type: CHAT_ENTITY.to_string(),
            method: CHAT_METHOD.to_string(),
            entity_id: 1,
            args: vec![json!(player_id), json!(namespace), json!(message), json!("")],
        }
    }

    pub(crate) fn sample_registry() -> PlayerRegistry {
        let mut players = PlayerRegistry::new();
        players.insert(
            5,
            PlayerInfo {
                name: "Foo".to_string(),
                clan_tag: Some("BAR".to_string()),
            },
        );
        players.insert(
            7,
            PlayerInfo {
                name: "Baz".to_string(),
                clan_tag: None,
            },
        );
        players
    }

    fn event(player_id: i64, namespace: &str, message: &str) -> ChatEvent {
        ChatEvent {
            player_id,
            namespace: namespace.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_sentinel_ids_are_never_recorded() {
        let capture = ChatCapture::new();
        for id in SENTINEL_PLAYER_IDS {
            capture.on_chat_message(&chat_call(id, "team", "hello"));
            capture.on_chat_message(&chat_call(id, "all", ""));
        }
        capture.on_chat_message(&chat_call(12, "all", "o7"));

        assert_eq!(capture.snapshot(), vec![event(12, "all", "o7")]);
    }

    #[test]
    fn test_malformed_calls_are_skipped() {
        let capture = ChatCapture::new();
        let mut call = chat_call(5, "team", "hi");
        call.args = vec![json!("five"), json!("team"), json!("hi")];
        capture.on_chat_message(&call);
        call.args = vec![json!(5)];
        capture.on_chat_message(&call);

        assert!(capture.snapshot().is_empty());
    }

    #[test]
    fn test_display_line() {
        assert_eq!(display_line("BAR", "Foo", "go left"), "[BAR]Foo: go left");
        assert_eq!(display_line("", "Baz", "gg"), "Baz: gg");
        assert_eq!(display_line("   ", "Baz", "gg"), "Baz: gg");
    }

    #[test]
    fn test_format_preserves_order_and_drops_unknown() {
        let events = vec![
            event(7, "all", "first"),
            event(99, "team", "left early"),
            event(5, "team", "second"),
            event(7, "all", "third"),
        ];
        let records = format_chats(&events, &sample_registry(), MissingPlayerPolicy::Drop);

        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(events.len() - records.len(), 1);
        assert_eq!(records[1].clan_tag, "BAR");
        assert_eq!(records[0].clan_tag, "");
    }

    #[test]
    fn test_format_placeholder_policy_keeps_unknown() {
        let events = vec![event(99, "team", "left early")];
        let records = format_chats(
            &events,
            &sample_registry(),
            MissingPlayerPolicy::Placeholder,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].player_name, "Unknown player #99");
        assert_eq!(records[0].display, "Unknown player #99: left early");
    }

    #[test]
    fn test_format_is_idempotent() {
        let events = vec![event(5, "team", "a"), event(7, "all", "b")];
        let players = sample_registry();
        assert_eq!(
            format_chats(&events, &players, MissingPlayerPolicy::Drop),
            format_chats(&events, &players, MissingPlayerPolicy::Drop)
        );
    }

    #[test]
    fn test_chat_player_end_to_end() {
        let script = ScriptedPlayer::new(
            vec![
                chat_call(5, "team", "go left"),
                chat_call(0, "all", "ignored"),
                chat_call(7, "all", "gg"),
            ],
            Some(sample_registry()),
        );
        let mut player = ChatPlayer::new(Box::new(script));
        player.play(b"", true).unwrap();

        assert_eq!(player.captured().len(), 2);
        let displays: Vec<String> = player
            .chats(MissingPlayerPolicy::Drop)
            .into_iter()
            .map(|r| r.display)
            .collect();
        assert_eq!(displays, vec!["[BAR]Foo: go left", "Baz: gg"]);
    }

    #[test]
    fn test_chat_player_forwards_strict_flag() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let script = ScriptedPlayer::new(Vec::new(), Some(sample_registry()))
            .with_strict_log(log.clone());
        let mut player = ChatPlayer::new(Box::new(script));
        player.play(b"", true).unwrap();
        player.play(b"", false).unwrap();

        assert_eq!(*log.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_no_player_info_means_no_chats() {
        let script = ScriptedPlayer::new(vec![chat_call(5, "team", "go left")], None);
        let mut player = ChatPlayer::new(Box::new(script));
        player.play(b"", true).unwrap();

        assert_eq!(player.captured().len(), 1);
        assert!(player.chats(MissingPlayerPolicy::Placeholder).is_empty());
    }
}
