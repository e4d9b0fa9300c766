use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::chat::ChatPlayer;
use crate::error::Result;
use crate::models::{ChatReport, ChatStats, MissingPlayerPolicy};
use crate::player::PlayerFactory;
use crate::replay::{ClientVersion, ReplayReader};

pub const REPLAY_SUFFIX: &str = ".wowsreplay";

static NEXT_REPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Uploads are always played in strict mode; any unrecognized structure fails.
const STRICT_PLAYBACK: bool = true;

/// Upload -> temp file -> reader -> player -> formatted chat
#[derive(Clone)]
pub struct ChatExtractor {
    factory: Arc<dyn PlayerFactory>,
    policy: MissingPlayerPolicy,
    temp_dir: Option<PathBuf>,
}

impl ChatExtractor {
    pub fn new(factory: Arc<dyn PlayerFactory>, policy: MissingPlayerPolicy) -> Self {
        Self {
            factory,
            policy,
            temp_dir: None,
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    pub fn policy(&self) -> MissingPlayerPolicy {
        self.policy
    }

    /// Blocking; call from a worker thread.
    pub fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ChatReport> {
        let start = std::time::Instant::now();

        // Removed on drop, which covers every early return below
        let mut builder = tempfile::Builder::new();
        builder.prefix("wowschat-").suffix(REPLAY_SUFFIX);
        let mut tmp_file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tmp_file.write_all(bytes)?;
        tmp_file.flush()?;
        tracing::debug!("Wrote {} bytes to {}", bytes.len(), tmp_file.path().display());

        let replay = ReplayReader::open(tmp_file.path())?.get_replay_data()?;
        let version = ClientVersion::from_engine_data(&replay.engine_data)?;
        tracing::info!("Replay {} recorded with client {}", file_name, version);
        tracing::debug!(
            "{} extra metadata blocks, {} payload bytes",
            replay.extra_blocks.len(),
            replay.payload.len()
        );

        let mut chat_player = ChatPlayer::new(self.factory.create(&version)?);
        chat_player.play(&replay.payload, STRICT_PLAYBACK)?;
        let messages = chat_player.chats(self.policy);
        let captured = chat_player.captured().len();
        if captured != messages.len() {
            tracing::debug!(
                "{} of {} captured chat messages kept",
                messages.len(),
                captured
            );
        }

        if let Err(e) = tmp_file.close() {
            tracing::debug!("Failed to remove temporary replay: {}", e);
        }

        let stats = ChatStats::from_records(&messages);
        tracing::info!(
            "Extracted {} chat messages from {} in {:.2}s",
            messages.len(),
            file_name,
            start.elapsed().as_secs_f64()
        );

        Ok(ChatReport {
            id: NEXT_REPORT_ID.fetch_add(1, Ordering::Relaxed),
            filename: file_name.to_string(),
            client_version: version.to_string(),
            processed_at: chrono::Local::now(),
            messages,
            stats,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chat::tests::{chat_call, sample_registry, ScriptedPlayer};
    use crate::error::ChatError;
    use crate::player::BattlePlayer;
    use crate::replay::tests::build_replay;
    use serde_json::json;
    use std::sync::Mutex;

    /// Hands out one scripted player per call and records requested versions
    /// and the strict flag each player was driven with
    pub(crate) struct ScriptedFactory {
        pub versions: Mutex<Vec<String>>,
        pub strict_modes: Arc<Mutex<Vec<bool>>>,
        pub fail: bool,
    }

    impl ScriptedFactory {
        pub(crate) fn new() -> Self {
            Self {
                versions: Mutex::new(Vec::new()),
                strict_modes: Arc::default(),
                fail: false,
            }
        }
    }

    pub(crate) fn scripted_extractor() -> ChatExtractor {
        ChatExtractor::new(Arc::new(ScriptedFactory::new()), MissingPlayerPolicy::Drop)
    }

    impl PlayerFactory for ScriptedFactory {
        fn create(&self, version: &ClientVersion) -> Result<Box<dyn BattlePlayer>> {
            self.versions.lock().unwrap().push(version.to_string());
            if self.fail {
                return Err(ChatError::Playback(format!(
                    "unsupported version {}",
                    version
                )));
            }
            let player = ScriptedPlayer::new(
                vec![
                    chat_call(5, "team", "go left"),
                    chat_call(0, "all", "ignored"),
                    chat_call(7, "all", "gg"),
                ],
                Some(sample_registry()),
            )
            .with_strict_log(self.strict_modes.clone());
            Ok(Box::new(player))
        }
    }

    pub(crate) fn sample_replay() -> Vec<u8> {
        build_replay(
            &[json!({"clientVersionFromXml": "0, 11, 5, 7412345"})],
            b"opaque battle payload",
        )
    }

    fn dir_is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_extract_end_to_end() {
        let factory = Arc::new(ScriptedFactory::new());
        let tmp = tempfile::tempdir().unwrap();
        let extractor = ChatExtractor::new(factory.clone(), MissingPlayerPolicy::Drop)
            .with_temp_dir(Some(tmp.path().to_path_buf()));

        let report = extractor.extract("match.wowsreplay", &sample_replay()).unwrap();

        let displays: Vec<&str> = report.messages.iter().map(|m| m.display.as_str()).collect();
        assert_eq!(displays, vec!["[BAR]Foo: go left", "Baz: gg"]);
        let counts: Vec<(&str, usize)> = report
            .stats
            .namespaces
            .iter()
            .map(|n| (n.namespace.as_str(), n.count))
            .collect();
        assert_eq!(counts, vec![("team", 1), ("all", 1)]);
        assert_eq!(report.stats.unique_players, 2);
        assert_eq!(report.client_version, "0,11,5,7412345");
        assert_eq!(*factory.versions.lock().unwrap(), vec!["0,11,5,7412345"]);
        assert_eq!(*factory.strict_modes.lock().unwrap(), vec![true]);
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn test_temp_file_removed_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = scripted_extractor().with_temp_dir(Some(tmp.path().to_path_buf()));

        let err = extractor.extract("bad.wowsreplay", b"definitely not a replay").unwrap_err();
        assert!(matches!(err, ChatError::InvalidMagic { .. }));
        assert!(dir_is_empty(tmp.path()));

        let mut failing = ScriptedFactory::new();
        failing.fail = true;
        let extractor = ChatExtractor::new(Arc::new(failing), MissingPlayerPolicy::Drop)
            .with_temp_dir(Some(tmp.path().to_path_buf()));
        let err = extractor.extract("old.wowsreplay", &sample_replay()).unwrap_err();
        assert!(err.to_string().contains("unsupported version"));
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn test_missing_version_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = scripted_extractor().with_temp_dir(Some(tmp.path().to_path_buf()));
        let bytes = build_replay(&[json!({"mapName": "spaces/01_solomon_islands"})], b"");

        let err = extractor.extract("nover.wowsreplay", &bytes).unwrap_err();
        assert!(matches!(err, ChatError::MissingVersion));
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn test_report_ids_are_unique() {
        let extractor = scripted_extractor();
        let a = extractor.extract("a.wowsreplay", &sample_replay()).unwrap();
        let b = extractor.extract("b.wowsreplay", &sample_replay()).unwrap();
        assert_ne!(a.id, b.id);
    }
}
