//! Hand generated files to a preview runtime

use crate::annotations::Annotation;
use crate::conversation::{Message, MessageStatus};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Receives the virtual file set whenever an assistant message completes
pub trait PreviewSink: Send + Sync {
    fn publish(&self, files: &BTreeMap<String, String>) -> Result<()>;
}

/// Every code block with a `file` attribute in completed messages.
/// A later block for the same path replaces an earlier one.
pub fn collect_preview_files(messages: &[Message]) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    for message in messages
        .iter()
        .filter(|m| m.status == MessageStatus::Complete)
    {
        for annotation in &message.annotations {
            if let Annotation::CodeBlock(block) = annotation {
                if let Some(file) = &block.file {
                    files.insert(file.clone(), block.code.clone());
                }
            }
        }
    }
    files
}

/// Writes published files below a root directory
pub struct DirectoryPreviewSink {
    root: PathBuf,
}

impl DirectoryPreviewSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, virtual_path: &str) -> Result<PathBuf> {
        let relative = Path::new(virtual_path.trim_start_matches("./"));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => anyhow::bail!("Refusing preview path outside the preview directory: {virtual_path}"),
            }
        }
        if resolved == self.root {
            anyhow::bail!("Empty preview path");
        }
        Ok(resolved)
    }
}

impl PreviewSink for DirectoryPreviewSink {
    fn publish(&self, files: &BTreeMap<String, String>) -> Result<()> {
        let mut written = 0;
        for (path, content) in files {
            let target = match self.resolve(path) {
                Ok(target) => target,
                Err(e) => {
                    warn!("Skipping preview file: {e}");
                    continue;
                }
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&target, content)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            debug!("Wrote preview file {}", target.display());
            written += 1;
        }
        info!("Published {written} preview file(s) to {}", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::CodeBlock;
    use crate::conversation::StreamFailure;

    fn code(file: Option<&str>, code: &str) -> Annotation {
        Annotation::CodeBlock(CodeBlock {
            language: "tsx".to_string(),
            project: None,
            file: file.map(str::to_string),
            block_type: None,
            title: None,
            code: code.to_string(),
        })
    }

    fn assistant(id: &str, annotations: Vec<Annotation>, status: MessageStatus) -> Message {
        let mut message = Message::assistant_streaming(id);
        message.annotations = annotations;
        message.status = status;
        message
    }

    #[test]
    fn test_later_blocks_override_earlier_ones() {
        let messages = vec![
            assistant(
                "1",
                vec![code(Some("app.tsx"), "v1"), code(None, "snippet")],
                MessageStatus::Complete,
            ),
            Message::user("2", "change it"),
            assistant(
                "3",
                vec![code(Some("app.tsx"), "v2"), code(Some("util.ts"), "u")],
                MessageStatus::Complete,
            ),
            Message::user("4", "again"),
            assistant(
                "5",
                vec![code(Some("app.tsx"), "broken")],
                MessageStatus::Failed(StreamFailure::Cancelled),
            ),
        ];

        let files = collect_preview_files(&messages);
        assert_eq!(files.len(), 2);
        assert_eq!(files["app.tsx"], "v2");
        assert_eq!(files["util.ts"], "u");
    }

    #[test]
    fn test_directory_sink_writes_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = DirectoryPreviewSink::new(dir.path());

        let mut files = BTreeMap::new();
        files.insert("src/App.tsx".to_string(), "export default 1;".to_string());
        files.insert("./index.html".to_string(), "<html></html>".to_string());
        sink.publish(&files)?;

        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/App.tsx"))?,
            "export default 1;"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("index.html"))?,
            "<html></html>"
        );
        Ok(())
    }

    #[test]
    fn test_directory_sink_rejects_escaping_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = DirectoryPreviewSink::new(dir.path().join("preview"));

        for path in ["../evil.txt", "/etc/passwd", "a/../../b", ""] {
            assert!(sink.resolve(path).is_err(), "path {path:?}");

            let mut files = BTreeMap::new();
            files.insert(path.to_string(), "x".to_string());
            sink.publish(&files)?;
        }
        assert!(!dir.path().join("evil.txt").exists());
        assert!(!dir.path().join("b").exists());
        Ok(())
    }

    #[test]
    fn test_rejected_path_does_not_block_other_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("preview");
        let sink = DirectoryPreviewSink::new(&root);

        let mut files = BTreeMap::new();
        files.insert("../evil.js".to_string(), "bad".to_string());
        files.insert("App.tsx".to_string(), "good".to_string());
        sink.publish(&files)?;

        assert_eq!(std::fs::read_to_string(root.join("App.tsx"))?, "good");
        assert!(!dir.path().join("evil.js").exists());
        Ok(())
    }
}
