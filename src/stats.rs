use std::collections::HashSet;

use crate::models::{ChatRecord, ChatStats, NamespaceCount};

impl ChatStats {
    pub fn from_records(records: &[ChatRecord]) -> Self {
        let mut namespaces: Vec<NamespaceCount> = Vec::new();
        for record in records {
            match namespaces
                .iter_mut()
                .find(|n| n.namespace == record.namespace)
            {
                Some(entry) => entry.count += 1,
                None => namespaces.push(NamespaceCount {
                    namespace: record.namespace.clone(),
                    label: namespace_label(&record.namespace),
                    count: 1,
                }),
            }
        }

        let unique_players = records
            .iter()
            .map(|r| r.player_id)
            .collect::<HashSet<_>>()
            .len();

        ChatStats {
            namespaces,
            unique_players,
            total_messages: records.len(),
        }
    }
}

/// "battle_team" -> "Battle Team Chat"
pub fn namespace_label(namespace: &str) -> String {
    let words: Vec<String> = namespace
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Chat".to_string()
    } else {
        format!("{} Chat", words.join(" "))
    }
}
