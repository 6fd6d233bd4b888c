// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use classdeck_protocol::SessionCode;
use classdeck_protocol::SessionDoc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::EngineErr;
use crate::error::Result;
use crate::kv::SessionSink;

/// Process-wide map of live session documents.
///
/// The outer mutex guards only the map; each document sits behind its own
/// RwLock, so mutators serialize per session while readers share. Writer
/// ordering is therefore well-defined per session but not across sessions.
pub struct SessionStore {
    sessions: StdMutex<HashMap<SessionCode, Arc<RwLock<SessionDoc>>>>,
    sink: SessionSink,
}

impl SessionStore {
    pub fn new(sink: SessionSink) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(SessionSink::Memory)
    }

    /// Fresh code by uniform sampling with rejection on collision.
    pub fn generate_code(&self) -> SessionCode {
        let sessions = self.sessions.lock().unwrap();
        loop {
            let code = SessionCode::random();
            if !sessions.contains_key(&code) {
                return code;
            }
        }
    }

    /// Register a new document. Fails with `Conflict` when the code is
    /// already live.
    pub fn create(&self, doc: SessionDoc) -> Result<()> {
        let code = doc.code.clone();
        {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.entry(code.clone()) {
                Entry::Occupied(_) => {
                    return Err(EngineErr::Conflict(format!(
                        "session {code} already exists"
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(RwLock::new(doc.clone())));
                }
            }
        }
        self.write_through(code, doc);
        Ok(())
    }

    /// Re-insert a document loaded from the sink at startup, replacing any
    /// existing entry.
    pub fn restore(&self, doc: SessionDoc) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(doc.code.clone(), Arc::new(RwLock::new(doc)));
    }

    fn handle(&self, code: &SessionCode) -> Result<Arc<RwLock<SessionDoc>>> {
        self.sessions
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| EngineErr::NotFound(format!("session {code}")))
    }

    /// Point-in-time snapshot of the document.
    pub async fn get(&self, code: &SessionCode) -> Result<SessionDoc> {
        let handle = self.handle(code)?;
        let doc = handle.read().await.clone();
        Ok(doc)
    }

    /// Run a read-only projection under the shared lock.
    pub async fn read<F, T>(&self, code: &SessionCode, project: F) -> Result<T>
    where
        F: FnOnce(&SessionDoc) -> T,
    {
        let handle = self.handle(code)?;
        let guard = handle.read().await;
        Ok(project(&guard))
    }

    /// Apply `mutate` under the session's exclusive lock. On success the
    /// store bumps `updated_at` and writes the new document through to the
    /// sink; a failing mutator must not have touched the document.
    pub async fn update<F, T>(&self, code: &SessionCode, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut SessionDoc) -> Result<T>,
    {
        let handle = self.handle(code)?;
        let (out, snapshot) = {
            let mut guard = handle.write().await;
            let out = mutate(&mut guard)?;
            guard.updated_at = Utc::now();
            (out, guard.clone())
        };
        self.write_through(code.clone(), snapshot);
        Ok(out)
    }

    pub fn delete(&self, code: &SessionCode) -> Result<()> {
        let removed = self.sessions.lock().unwrap().remove(code);
        if removed.is_none() {
            return Err(EngineErr::NotFound(format!("session {code}")));
        }
        let sink = self.sink.clone();
        let code = code.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.delete(&code).await {
                warn!("failed to delete persisted session {code}: {e}");
            }
        });
        Ok(())
    }

    pub fn contains(&self, code: &SessionCode) -> bool {
        self.sessions.lock().unwrap().contains_key(code)
    }

    pub fn codes(&self) -> Vec<SessionCode> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    /// Mirror the document to the sink on a detached task. The in-memory
    /// copy is authoritative, so sink failures only warn.
    fn write_through(&self, code: SessionCode, doc: SessionDoc) {
        if matches!(self.sink, SessionSink::Memory) {
            return;
        }
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.put(&code, &doc).await {
                warn!("failed to persist session {code}: {e}");
            }
        });
    }
}
