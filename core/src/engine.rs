// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::DateTime;
use chrono::Utc;
use classdeck_protocol::ClientOp;
use classdeck_protocol::EndpointId;
use classdeck_protocol::ErrorEvent;
use classdeck_protocol::ExecutionRecord;
use classdeck_protocol::ExecutionResultEvent;
use classdeck_protocol::ServerEvent;
use classdeck_protocol::SessionCode;
use classdeck_protocol::SessionDataEvent;
use classdeck_protocol::SessionDoc;
use classdeck_protocol::Slide;
use classdeck_protocol::SlideChangeEvent;
use classdeck_protocol::Student;
use classdeck_protocol::StudentCodeUpdateEvent;
use classdeck_protocol::StudentExecutionResultEvent;
use classdeck_protocol::StudentSummaryUpdateEvent;
use classdeck_protocol::Summary;
use classdeck_protocol::UserJoinedEvent;
use classdeck_protocol::UserLeftEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::error::EngineErr;
use crate::error::Result;
use crate::evaluator::EvaluatorClient;
use crate::exec::CodeExecutor;
use crate::kv::SessionSink;
use crate::rate_limit::EvaluationThrottle;
use crate::registry::Role;
use crate::registry::RoomRegistry;
use crate::store::SessionStore;

/// Drafts at or below this length are not worth an evaluator call.
const MIN_EVAL_CODE_LEN: usize = 10;

/// Where an endpoint is bound after a successful join or reconnect.
#[derive(Debug, Clone)]
pub struct Binding {
    pub code: SessionCode,
    pub role: Role,
    pub name: String,
}

/// Connection-scoped state owned by the endpoint task. The engine mutates
/// the binding on join/reconnect/disconnect and consults it for role checks.
pub struct EndpointCtx {
    pub id: EndpointId,
    tx: mpsc::Sender<ServerEvent>,
    pub binding: Option<Binding>,
}

impl EndpointCtx {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: EndpointId::new(),
            tx,
            binding: None,
        }
    }

    fn sender(&self) -> mpsc::Sender<ServerEvent> {
        self.tx.clone()
    }

    /// Deliver an event to this endpoint, swallowing send failures (the
    /// endpoint may already be gone).
    pub async fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Fields accepted by session create/update over HTTP.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionParams {
    pub title: String,
    pub description: String,
    pub language: String,
    pub initial_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateSessionParams {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub initial_code: Option<String>,
}

/// The hub wiring the store, registry, executor, evaluator, and schedulers
/// together. One instance per process; endpoints and HTTP handlers share it
/// behind an `Arc`.
pub struct SessionEngine {
    store: SessionStore,
    registry: RoomRegistry,
    evaluator: EvaluatorClient,
    throttle: EvaluationThrottle,
    executor: CodeExecutor,
    sink: SessionSink,
    schedulers: StdMutex<HashMap<SessionCode, JoinHandle<()>>>,
    config: Config,
}

impl SessionEngine {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let sink = SessionSink::from_config(&config);
        let executor = CodeExecutor::new(config.temp_dir.clone())?;
        Ok(Arc::new(Self {
            store: SessionStore::new(sink.clone()),
            registry: RoomRegistry::new(),
            evaluator: EvaluatorClient::new(config.evaluator.clone()),
            throttle: EvaluationThrottle::new(),
            executor,
            sink,
            schedulers: StdMutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Repopulate the store from the KV sink, if one is configured.
    pub async fn restore_persisted_sessions(&self) -> Result<usize> {
        let docs = self.sink.load_all().await?;
        let count = docs.len();
        for doc in docs {
            self.store.restore(doc);
        }
        if count > 0 {
            info!("restored {count} persisted sessions");
        }
        Ok(count)
    }

    /// Dispatch one inbound event. Errors are reported to the caller as an
    /// `error` event and never broadcast.
    pub async fn handle_event(self: &Arc<Self>, ctx: &mut EndpointCtx, op: ClientOp) {
        let result = match op {
            ClientOp::JoinSession { code, name } => {
                self.on_join(ctx, code, name, Role::Student).await
            }
            ClientOp::TeacherJoin { code, name } => {
                self.on_join(ctx, code, name, Role::Teacher).await
            }
            ClientOp::ReconnectSession { code, name, token } => {
                self.on_reconnect(ctx, code, name, token).await
            }
            ClientOp::CodeUpdate { code } => self.on_code_update(ctx, code).await,
            ClientOp::UpdateSlide { slide_index } => self.on_update_slide(ctx, slide_index).await,
            ClientOp::UpdateSlideData {
                slides,
                slides_with_code,
            } => self.on_update_slide_data(ctx, slides, slides_with_code).await,
            ClientOp::ExecuteCode { code, language } => {
                self.on_execute_code(ctx, code, language).await
            }
            ClientOp::Disconnect => {
                self.handle_disconnect(ctx).await;
                Ok(())
            }
            // `ClientOp` is non-exhaustive; anything newer than this build
            // is a validation error, not a crash.
            _ => Err(EngineErr::Validation("unsupported operation".to_string())),
        };

        if let Err(err) = result {
            match &err {
                EngineErr::Validation(_) | EngineErr::NotFound(_) | EngineErr::Forbidden(_) => {
                    debug!("rejected event from {}: {err}", ctx.id);
                }
                _ => warn!("event from {} failed: {err}", ctx.id),
            }
            ctx.send(ServerEvent::Error(ErrorEvent {
                message: err.to_string(),
            }))
            .await;
        }
    }

    async fn on_join(
        self: &Arc<Self>,
        ctx: &mut EndpointCtx,
        code: String,
        name: String,
        role: Role,
    ) -> Result<()> {
        if ctx.binding.is_some() {
            return Err(EngineErr::Validation(
                "endpoint is already bound to a session".to_string(),
            ));
        }
        let code = parse_code(&code)?;
        let name = validate_name(&name)?;
        let endpoint = ctx.id;
        let now = Utc::now();

        let (snapshot, token) = self
            .store
            .update(&code, |doc| {
                if !doc.active {
                    return Err(EngineErr::Forbidden(format!(
                        "session {} has ended",
                        doc.code
                    )));
                }
                let token = match role {
                    Role::Student => {
                        // Re-use of an in-grace name lands here too: the
                        // record is replaced outright, fresh token included.
                        let student = Student::new(endpoint, now);
                        let token = student.reconnect_token.clone();
                        doc.students.insert(name.clone(), student);
                        Some(token)
                    }
                    Role::Teacher => {
                        doc.teacher_endpoint_id = Some(endpoint);
                        None
                    }
                };
                Ok((doc.sanitized(), token))
            })
            .await?;

        self.registry
            .attach(&code, endpoint, role, &name, ctx.sender());
        ctx.binding = Some(Binding {
            code: code.clone(),
            role,
            name: name.clone(),
        });

        ctx.send(ServerEvent::SessionData(SessionDataEvent {
            session: snapshot.clone(),
            reconnect_token: token,
        }))
        .await;
        match role {
            Role::Student => ctx.send(slide_change_event(&snapshot)).await,
            Role::Teacher => self.ensure_scheduler(&code),
        }
        self.registry
            .broadcast_except(
                &code,
                endpoint,
                &ServerEvent::UserJoined(UserJoinedEvent {
                    name,
                    timestamp: now,
                }),
            )
            .await;
        Ok(())
    }

    async fn on_reconnect(
        self: &Arc<Self>,
        ctx: &mut EndpointCtx,
        code: String,
        name: String,
        token: String,
    ) -> Result<()> {
        if ctx.binding.is_some() {
            return Err(EngineErr::Validation(
                "endpoint is already bound to a session".to_string(),
            ));
        }
        let code = parse_code(&code)?;
        let name = validate_name(&name)?;
        let endpoint = ctx.id;
        let now = Utc::now();

        let (snapshot, draft) = self
            .store
            .update(&code, |doc| {
                let student = doc
                    .students
                    .get_mut(&name)
                    .ok_or_else(|| EngineErr::NotFound(format!("student {name}")))?;
                if student.reconnect_token != token {
                    return Err(EngineErr::Forbidden(
                        "reconnect token mismatch".to_string(),
                    ));
                }
                student.socket_endpoint_id = Some(endpoint);
                student.reconnected_at = Some(now);
                student.disconnected_at = None;
                student.last_active = now;
                let student_code = student.code.clone();
                Ok((doc.sanitized(), student_code))
            })
            .await?;

        self.registry
            .attach(&code, endpoint, Role::Student, &name, ctx.sender());
        ctx.binding = Some(Binding {
            code,
            role: Role::Student,
            name,
        });

        ctx.send(ServerEvent::SessionData(SessionDataEvent {
            session: snapshot.clone(),
            reconnect_token: Some(token),
        }))
        .await;
        ctx.send(slide_change_event(&snapshot)).await;
        if !draft.is_empty() {
            ctx.send(ServerEvent::CodeRestore(
                classdeck_protocol::CodeRestoreEvent {
                    code: draft,
                    timestamp: now,
                },
            ))
            .await;
        }
        Ok(())
    }

    async fn on_code_update(self: &Arc<Self>, ctx: &mut EndpointCtx, text: String) -> Result<()> {
        let Binding { code, role, name } = require_binding(ctx)?;
        let now = Utc::now();
        match role {
            Role::Teacher => {
                // The teacher's scratchpad is silent: no broadcast, no
                // evaluation.
                self.store
                    .update(&code, |doc| {
                        doc.current_code = text;
                        Ok(())
                    })
                    .await
            }
            Role::Student => {
                self.store
                    .update(&code, |doc| {
                        let student = doc
                            .students
                            .get_mut(&name)
                            .ok_or_else(|| EngineErr::NotFound(format!("student {name}")))?;
                        student.code = text.clone();
                        student.last_active = now;
                        Ok(())
                    })
                    .await?;

                self.registry
                    .send_to_role(
                        &code,
                        Role::Teacher,
                        &ServerEvent::StudentCodeUpdate(StudentCodeUpdateEvent {
                            student_name: name.clone(),
                            code: text.clone(),
                            timestamp: now,
                        }),
                    )
                    .await;

                if text.len() > MIN_EVAL_CODE_LEN && self.throttle.try_acquire(&code, &name) {
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        engine.evaluate_student(code, name, text).await;
                    });
                }
                Ok(())
            }
        }
    }

    async fn on_update_slide(
        self: &Arc<Self>,
        ctx: &mut EndpointCtx,
        slide_index: i64,
    ) -> Result<()> {
        let Binding { code, .. } = require_teacher(ctx)?;
        let index = usize::try_from(slide_index)
            .map_err(|_| EngineErr::Validation(format!("bad slide index {slide_index}")))?;

        let (has_code_editor, prompt) = self
            .store
            .update(&code, |doc| {
                if !doc.is_valid_slide_index(index) {
                    return Err(EngineErr::Validation(format!(
                        "slide index {index} out of range"
                    )));
                }
                doc.current_slide = index;
                Ok((doc.has_coding_task(index), doc.slide_prompt(index)))
            })
            .await?;

        self.registry
            .broadcast(
                &code,
                &ServerEvent::SlideChange(SlideChangeEvent {
                    index,
                    has_code_editor,
                    prompt,
                    timestamp: Utc::now(),
                }),
            )
            .await;
        Ok(())
    }

    async fn on_update_slide_data(
        self: &Arc<Self>,
        ctx: &mut EndpointCtx,
        slides: Vec<Slide>,
        slides_with_code: Option<Vec<usize>>,
    ) -> Result<()> {
        let Binding { code, .. } = require_teacher(ctx)?;
        self.store
            .update(&code, |doc| {
                doc.slides = slides;
                doc.slides_with_code = slides_with_code;
                if !doc.is_valid_slide_index(doc.current_slide) {
                    doc.current_slide = 0;
                }
                Ok(())
            })
            .await
    }

    async fn on_execute_code(
        self: &Arc<Self>,
        ctx: &mut EndpointCtx,
        source: String,
        language: Option<String>,
    ) -> Result<()> {
        let Binding { code, role, name } = require_binding(ctx)?;
        let language = match language {
            Some(language) => language,
            None => self.store.read(&code, |doc| doc.language.clone()).await?,
        };

        let (result, error) = match self.executor.execute(&language, &source).await {
            Ok(out) if out.exit_code == 0 => {
                let error = (!out.stderr.is_empty()).then(|| out.stderr.clone());
                (out.stdout, error)
            }
            Ok(out) => {
                let message = if out.stderr.is_empty() {
                    format!("exited with code {}", out.exit_code)
                } else {
                    out.stderr.trim_end().to_string()
                };
                let result = if out.stdout.is_empty() {
                    format!("Error: {message}")
                } else {
                    out.stdout
                };
                (result, Some(message))
            }
            // Sandbox refusals and limit trips come back to the caller as a
            // result, never as a protocol error.
            Err(sandbox) => (format!("Error: {sandbox}"), Some(sandbox.to_string())),
        };
        let now = Utc::now();

        if role == Role::Student {
            let record = ExecutionRecord {
                result: result.clone(),
                error: error.clone(),
                timestamp: now,
            };
            if let Err(e) = self
                .store
                .update(&code, |doc| {
                    if let Some(student) = doc.students.get_mut(&name) {
                        student.last_execution = Some(record);
                        student.last_active = now;
                    }
                    Ok(())
                })
                .await
            {
                debug!("could not persist execution for {name}: {e}");
            }
        }

        ctx.send(ServerEvent::ExecutionResult(ExecutionResultEvent {
            result: result.clone(),
            error: error.clone(),
            timestamp: now,
        }))
        .await;

        if role == Role::Student {
            self.registry
                .send_to_role(
                    &code,
                    Role::Teacher,
                    &ServerEvent::StudentExecutionResult(StudentExecutionResultEvent {
                        student_name: name,
                        result,
                        error,
                        timestamp: now,
                    }),
                )
                .await;
        }
        Ok(())
    }

    /// Endpoint drop, explicit or from a dead socket or idle timeout.
    pub async fn handle_disconnect(self: &Arc<Self>, ctx: &mut EndpointCtx) {
        let Some(Binding { code, role, name }) = ctx.binding.take() else {
            return;
        };
        let endpoint = ctx.id;
        self.registry.detach(endpoint);
        let now = Utc::now();

        self.registry
            .broadcast_except(
                &code,
                endpoint,
                &ServerEvent::UserLeft(UserLeftEvent {
                    name: name.clone(),
                    timestamp: now,
                }),
            )
            .await;

        match role {
            Role::Teacher => {
                let _ = self
                    .store
                    .update(&code, |doc| {
                        if doc.teacher_endpoint_id == Some(endpoint) {
                            doc.teacher_endpoint_id = None;
                        }
                        Ok(())
                    })
                    .await;
                if !self.registry.has_role(&code, Role::Teacher) {
                    self.stop_scheduler(&code);
                }
            }
            Role::Student => {
                let marked = self
                    .store
                    .update(&code, |doc| {
                        Ok(match doc.students.get_mut(&name) {
                            // Only mark the record if this endpoint still
                            // owns it; a re-joined name belongs to a newer
                            // endpoint.
                            Some(student) if student.socket_endpoint_id == Some(endpoint) => {
                                student.socket_endpoint_id = None;
                                student.disconnected_at = Some(now);
                                student.reconnected_at = None;
                                true
                            }
                            _ => false,
                        })
                    })
                    .await
                    .unwrap_or(false);

                if marked {
                    let engine = Arc::clone(self);
                    let grace = self.config.disconnect_grace;
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        engine.remove_if_still_disconnected(&code, &name, now).await;
                    });
                }
            }
        }
    }

    /// The grace timer's target: drop the student only when the same
    /// disconnection is still in effect.
    async fn remove_if_still_disconnected(
        &self,
        code: &SessionCode,
        name: &str,
        stamp: DateTime<Utc>,
    ) {
        let _ = self
            .store
            .update(code, |doc| {
                let expired = doc.students.get(name).is_some_and(|s| {
                    s.disconnected_at == Some(stamp) && s.reconnected_at.is_none()
                });
                if expired {
                    doc.students.remove(name);
                    debug!("removed {name} after the disconnect grace window");
                }
                Ok(())
            })
            .await;
    }

    async fn evaluate_student(&self, code: SessionCode, name: String, draft: String) {
        let Ok(prompt) = self
            .store
            .read(&code, |doc| doc.slide_prompt(doc.current_slide))
            .await
        else {
            return;
        };
        let summary = self.evaluator.evaluate(&prompt, &draft).await;
        self.deliver_summary(&code, &name, summary).await;
    }

    /// Persist and fan out a fresh summary. Returns false (and emits
    /// nothing) when the student disconnected or vanished while the
    /// evaluation was in flight.
    pub(crate) async fn deliver_summary(
        &self,
        code: &SessionCode,
        name: &str,
        summary: Summary,
    ) -> bool {
        let persisted = self
            .store
            .update(code, |doc| {
                Ok(match doc.students.get_mut(name) {
                    Some(student) if student.disconnected_at.is_none() => {
                        student.summary = Some(summary.clone());
                        true
                    }
                    _ => false,
                })
            })
            .await
            .unwrap_or(false);

        if persisted {
            self.registry
                .send_to_role(
                    code,
                    Role::Teacher,
                    &ServerEvent::StudentSummaryUpdate(StudentSummaryUpdateEvent {
                        student_name: name.to_string(),
                        summary,
                        timestamp: Utc::now(),
                    }),
                )
                .await;
        }
        persisted
    }

    /// One summary pass. Returns false when the scheduler should stop: the
    /// session is gone, ended, or has no teacher attached.
    pub(crate) async fn sweep_session(&self, code: &SessionCode) -> bool {
        if !self.registry.has_role(code, Role::Teacher) {
            return false;
        }
        let Ok(doc) = self.store.get(code).await else {
            return false;
        };
        if !doc.active {
            return false;
        }

        let prompt = doc.slide_prompt(doc.current_slide);
        let mut students: Vec<(String, String)> = doc
            .students
            .iter()
            .filter(|(_, s)| !s.code.is_empty() && s.disconnected_at.is_none())
            .map(|(name, s)| (name.clone(), s.code.clone()))
            .collect();
        students.sort();

        let mut accepted = 0usize;
        for (name, draft) in students {
            if !self.throttle.try_acquire(code, &name) {
                continue;
            }
            let summary = self.evaluator.evaluate(&prompt, &draft).await;
            self.deliver_summary(code, &name, summary).await;
            accepted += 1;
            if accepted % crate::scheduler::BATCH_SIZE == 0 {
                tokio::time::sleep(crate::scheduler::BATCH_PAUSE).await;
            }
        }
        true
    }

    fn ensure_scheduler(self: &Arc<Self>, code: &SessionCode) {
        let mut schedulers = self.schedulers.lock().unwrap();
        if let Some(handle) = schedulers.get(code)
            && !handle.is_finished()
        {
            return;
        }
        let engine = Arc::clone(self);
        let task_code = code.clone();
        let handle = tokio::spawn(async move {
            crate::scheduler::run(engine, task_code).await;
        });
        schedulers.insert(code.clone(), handle);
    }

    pub fn stop_scheduler(&self, code: &SessionCode) {
        if let Some(handle) = self.schedulers.lock().unwrap().remove(code) {
            handle.abort();
        }
    }

    /// Graceful shutdown: stop every scheduler and sweep the scratch dir.
    /// Evaluations in flight are not cancelled; their results are discarded
    /// on delivery.
    pub fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut schedulers = self.schedulers.lock().unwrap();
            schedulers.drain().collect()
        };
        for (_, handle) in handles {
            handle.abort();
        }
        if let Err(e) = std::fs::remove_dir_all(self.executor.scratch_dir()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to clear scratch dir: {e}");
            }
        }
    }

    // ----- HTTP-surface projections of the same mutations -----

    pub async fn create_session(&self, params: CreateSessionParams) -> Result<SessionCode> {
        for _ in 0..3 {
            let code = self.store.generate_code();
            let doc = SessionDoc::new(
                code.clone(),
                params.title.clone(),
                params.description.clone(),
                params.language.clone(),
                params.initial_code.clone(),
            );
            match self.store.create(doc) {
                Ok(()) => {
                    info!("created session {code}");
                    return Ok(code);
                }
                Err(EngineErr::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(EngineErr::Conflict(
            "could not allocate a session code".to_string(),
        ))
    }

    pub async fn session_snapshot(&self, code: &str) -> Result<SessionDoc> {
        let code = parse_code(code)?;
        Ok(self.store.get(&code).await?.sanitized())
    }

    pub async fn update_session_meta(&self, code: &str, params: UpdateSessionParams) -> Result<()> {
        let code = parse_code(code)?;
        self.store
            .update(&code, |doc| {
                if let Some(title) = params.title {
                    doc.title = title;
                }
                if let Some(description) = params.description {
                    doc.description = description;
                }
                if let Some(language) = params.language {
                    doc.language = language;
                }
                if let Some(initial_code) = params.initial_code {
                    doc.initial_code = initial_code;
                }
                Ok(())
            })
            .await
    }

    pub async fn end_session(&self, code: &str) -> Result<()> {
        let code = parse_code(code)?;
        self.store
            .update(&code, |doc| {
                doc.active = false;
                Ok(())
            })
            .await?;
        self.stop_scheduler(&code);
        info!("ended session {code}");
        Ok(())
    }

    pub async fn delete_session(&self, code: &str) -> Result<()> {
        let code = parse_code(code)?;
        self.store.delete(&code)?;
        self.stop_scheduler(&code);
        self.registry.remove_room(&code);
        info!("deleted session {code}");
        Ok(())
    }

    /// HTTP projection of `update-slide`: same mutation, same room-wide
    /// broadcast, no endpoint involved.
    pub async fn set_slide(&self, code: &str, index: usize) -> Result<()> {
        let code = parse_code(code)?;
        let (has_code_editor, prompt) = self
            .store
            .update(&code, |doc| {
                if !doc.is_valid_slide_index(index) {
                    return Err(EngineErr::Validation(format!(
                        "slide index {index} out of range"
                    )));
                }
                doc.current_slide = index;
                Ok((doc.has_coding_task(index), doc.slide_prompt(index)))
            })
            .await?;
        self.registry
            .broadcast(
                &code,
                &ServerEvent::SlideChange(SlideChangeEvent {
                    index,
                    has_code_editor,
                    prompt,
                    timestamp: Utc::now(),
                }),
            )
            .await;
        Ok(())
    }

    /// HTTP join: creates the student record ahead of the socket and hands
    /// back the reconnect token the realtime client will present.
    pub async fn join_student_http(&self, code: &str, name: &str) -> Result<String> {
        let code = parse_code(code)?;
        let name = validate_name(name)?;
        let now = Utc::now();
        let token = self
            .store
            .update(&code, |doc| {
                if !doc.active {
                    return Err(EngineErr::Forbidden(format!(
                        "session {} has ended",
                        doc.code
                    )));
                }
                let mut student = Student::new(EndpointId::new(), now);
                student.socket_endpoint_id = None;
                let token = student.reconnect_token.clone();
                doc.students.insert(name.clone(), student);
                Ok(token)
            })
            .await?;
        self.registry
            .broadcast(
                &code,
                &ServerEvent::UserJoined(UserJoinedEvent {
                    name,
                    timestamp: now,
                }),
            )
            .await;
        Ok(token)
    }

    pub async fn all_summaries(&self, code: &str) -> Result<HashMap<String, Option<Summary>>> {
        let code = parse_code(code)?;
        self.store
            .read(&code, |doc| {
                doc.students
                    .iter()
                    .map(|(name, s)| (name.clone(), s.summary.clone()))
                    .collect()
            })
            .await
    }

    pub async fn student_summary(&self, code: &str, name: &str) -> Result<Option<Summary>> {
        let code = parse_code(code)?;
        self.store
            .read(&code, |doc| {
                doc.students
                    .get(name)
                    .map(|s| s.summary.clone())
                    .ok_or_else(|| EngineErr::NotFound(format!("student {name}")))
            })
            .await?
    }
}

fn parse_code(code: &str) -> Result<SessionCode> {
    code.parse()
        .map_err(|_| EngineErr::Validation(format!("malformed session code: {code:?}")))
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineErr::Validation("name must not be empty".to_string()));
    }
    if name.len() > 100 {
        return Err(EngineErr::Validation("name is too long".to_string()));
    }
    Ok(name.to_string())
}

fn require_binding(ctx: &EndpointCtx) -> Result<Binding> {
    ctx.binding
        .clone()
        .ok_or_else(|| EngineErr::Validation("join a session first".to_string()))
}

fn require_teacher(ctx: &EndpointCtx) -> Result<Binding> {
    let binding = require_binding(ctx)?;
    if binding.role != Role::Teacher {
        return Err(EngineErr::Forbidden(
            "only the teacher may do that".to_string(),
        ));
    }
    Ok(binding)
}

fn slide_change_event(doc: &SessionDoc) -> ServerEvent {
    let index = doc.current_slide;
    ServerEvent::SlideChange(SlideChangeEvent {
        index,
        has_code_editor: doc.has_coding_task(index),
        prompt: doc.slide_prompt(index),
        timestamp: Utc::now(),
    })
}
