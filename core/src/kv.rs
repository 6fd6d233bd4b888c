//! Write-through persistence for session documents.
//!
//! The in-memory [`crate::store::SessionStore`] is authoritative for the
//! process; a sink only mirrors documents so they survive restarts. Sink
//! failures are logged by the store and never fail a mutation.

use std::path::Path;
use std::path::PathBuf;

use classdeck_protocol::SessionCode;
use classdeck_protocol::SessionDoc;
use tracing::debug;

use crate::config::Config;
use crate::config::KvBackend;
use crate::error::Result;

/// Backend chosen via `KV_BACKEND`.
#[derive(Debug, Clone)]
pub enum SessionSink {
    /// No persistence.
    Memory,
    /// One `<code>.json` per session under `dir`.
    File { dir: PathBuf },
}

impl SessionSink {
    pub fn from_config(config: &Config) -> Self {
        match &config.kv_backend {
            KvBackend::Memory => Self::Memory,
            KvBackend::File { dir } => Self::File { dir: dir.clone() },
        }
    }

    pub async fn put(&self, code: &SessionCode, doc: &SessionDoc) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::File { dir } => put_file(dir, code, doc).await,
        }
    }

    pub async fn delete(&self, code: &SessionCode) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::File { dir } => {
                let path = doc_path(dir, code);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Load a persisted document, if any. Used at startup to repopulate the
    /// store when the file backend is configured.
    pub async fn load_all(&self) -> Result<Vec<SessionDoc>> {
        let Self::File { dir } = self else {
            return Ok(Vec::new());
        };
        let mut docs = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<SessionDoc>(&bytes) {
                Ok(doc) => docs.push(doc),
                Err(e) => debug!("skipping unreadable session file {}: {e}", path.display()),
            }
        }
        Ok(docs)
    }
}

fn doc_path(dir: &Path, code: &SessionCode) -> PathBuf {
    dir.join(format!("{code}.json"))
}

/// Write via a temp file and rename so a crash never leaves a torn document.
async fn put_file(dir: &Path, code: &SessionCode, doc: &SessionDoc) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let json = serde_json::to_vec(doc)?;
    let tmp = dir.join(format!(".{code}.json.tmp"));
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, doc_path(dir, code)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(code: &str) -> SessionDoc {
        SessionDoc::new(
            code.parse().unwrap(),
            "Intro".to_string(),
            String::new(),
            "python".to_string(),
            String::new(),
        )
    }

    #[tokio::test]
    async fn file_sink_round_trips_documents() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SessionSink::File {
            dir: dir.path().to_path_buf(),
        };
        let doc = doc("abcdef");
        sink.put(&doc.code.clone(), &doc).await.unwrap();

        let loaded = sink.load_all().await.unwrap();
        assert_eq!(loaded, vec![doc.clone()]);

        sink.delete(&doc.code).await.unwrap();
        assert!(sink.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_sink_is_a_no_op() {
        let sink = SessionSink::Memory;
        let doc = doc("ghijkl");
        sink.put(&doc.code.clone(), &doc).await.unwrap();
        assert!(sink.load_all().await.unwrap().is_empty());
    }
}
