use serde::Deserialize;

use crate::models::ChatRecord;

/// Download formats offered for a chat log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One JSON object per message
    Jsonl,
    /// One `[CLAN]NAME: MESSAGE` line per message
    #[serde(alias = "txt")]
    #[value(alias = "txt")]
    Text,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Text => "txt",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "application/x-ndjson",
            ExportFormat::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn render(self, records: &[ChatRecord]) -> serde_json::Result<String> {
        match self {
            ExportFormat::Jsonl => to_jsonl(records),
            ExportFormat::Text => Ok(to_text(records)),
        }
    }
}

pub fn to_jsonl(records: &[ChatRecord]) -> serde_json::Result<String> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

#[cfg(test)]
pub fn parse_jsonl(content: &str) -> serde_json::Result<Vec<ChatRecord>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

pub fn to_text(records: &[ChatRecord]) -> String {
    records
        .iter()
        .map(|r| r.display.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `<upload name>_chat.<ext>`
pub fn export_file_name(upload_name: &str, format: ExportFormat) -> String {
    format!("{}_chat.{}", upload_name, format.extension())
}
