use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A chat message as captured during playback, before any player lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub player_id: i64,
    pub namespace: String,
    pub message: String,
}

/// Post-battle info for one player, as reported by the replay backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    #[serde(rename = "clanTag", default)]
    pub clan_tag: Option<String>,
}

/// Player id -> post-battle info
pub type PlayerRegistry = HashMap<i64, PlayerInfo>;

/// A chat message joined with its sender's name and clan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub player_id: i64,
    pub player_name: String,
    pub clan_tag: String,
    pub namespace: String,
    pub message: String,
    /// `[CLAN]NAME: MESSAGE`, clan segment omitted when there is no clan
    pub display: String,
}

/// Message count for one chat channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceCount {
    pub namespace: String,
    pub label: String,
    pub count: usize,
}

/// Statistics panel contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatStats {
    /// In order of first appearance
    pub namespaces: Vec<NamespaceCount>,
    pub unique_players: usize,
    pub total_messages: usize,
}

/// A processed upload, ready to render
#[derive(Debug, Clone, Serialize)]
pub struct ChatReport {
    pub id: u64,
    pub filename: String,
    pub client_version: String,
    pub processed_at: chrono::DateTime<chrono::Local>,
    pub messages: Vec<ChatRecord>,
    pub stats: ChatStats,
}

/// What to do with a chat event whose sender is missing from the post-battle registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MissingPlayerPolicy {
    /// Silently skip the message
    #[default]
    Drop,
    /// Keep the message under a generated placeholder name
    Placeholder,
}

/// Name used for senders kept by `MissingPlayerPolicy::Placeholder`
pub fn placeholder_name(player_id: i64) -> String {
    format!("Unknown player #{}", player_id)
}
