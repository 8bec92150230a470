use crate::core::message::{Message, Role};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const USER_PREFIX: &str = "You";

/// Plain-text transcript of finished turns, appended as the chat goes on.
#[derive(Debug)]
pub struct TranscriptLog {
    file_path: PathBuf,
}

impl TranscriptLog {
    /// Opens (or creates) `path` for appending, failing early when it is
    /// not writable.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let file_path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        file.flush()?;
        Ok(Self { file_path })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn write_message<W: Write>(writer: &mut W, message: &Message) -> io::Result<()> {
        let text = match message.role {
            Role::User => format!("{USER_PREFIX}: {}", message.content),
            Role::Assistant if message.content.is_empty() => return Ok(()),
            Role::Assistant => message.content.clone(),
            Role::System => format!("## {}", message.content),
        };
        for line in text.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between messages, matching the on-screen layout.
        writeln!(writer)
    }

    pub fn log_message(&self, message: &Message) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        Self::write_message(&mut writer, message)?;
        writer.flush()
    }

    /// Replace the log with `messages`, e.g. after an edit truncated the
    /// conversation. The original file is only replaced once the new
    /// contents are fully written.
    pub fn rewrite(&self, messages: &[Message]) -> io::Result<()> {
        let parent = self
            .file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(parent)?;
        for message in messages {
            Self::write_message(&mut temp_file, message)?;
        }
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(&self.file_path)
            .map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_turns_with_prefixes() {
        let dir = TempDir::new().unwrap();
        let log = TranscriptLog::new(dir.path().join("chat.log")).unwrap();

        log.log_message(&Message::user("Hello\nthere")).unwrap();
        log.log_message(&Message::assistant("Hi!", "gpt-4o")).unwrap();
        log.log_message(&Message::assistant("", "gpt-4o")).unwrap();
        log.log_message(&Message::system("truncated")).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "You: Hello\nthere\n\nHi!\n\n## truncated\n\n");
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let log = TranscriptLog::new(dir.path().join("chat.log")).unwrap();
        log.log_message(&Message::user("first")).unwrap();
        log.log_message(&Message::assistant("reply", "m")).unwrap();

        log.rewrite(&[Message::user("edited")]).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "You: edited\n\n");
    }

    #[test]
    fn unwritable_paths_fail_up_front() {
        let dir = TempDir::new().unwrap();
        assert!(TranscriptLog::new(dir.path().join("missing").join("chat.log")).is_err());
    }
}
