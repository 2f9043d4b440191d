//! REST surface for projects, tasks, worktrees, sessions, commands, the
//! orchestrator, and the demand pool. Single bearer token auth; 201 on
//! create, 200 on get/update, 204 on delete, 400 on validation, 404 on
//! missing, 409 on conflict, 422 on policy violation.

use std::convert::Infallible;
use std::time::Duration;

use agenterm_core::error::{AgentTermError, ErrorCategory};
use agenterm_types::{
    Command, CommandOp, DemandItem, Event, Exception, OrchestratorProfile, Project, ProjectStatus,
    Session, SessionRole, Task, Worktree, WorktreeStatus,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::progress;
use crate::AppState;

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Input => StatusCode::BAD_REQUEST,
        ErrorCategory::Policy => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Capacity => StatusCode::CONFLICT,
        ErrorCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Blocker => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn err_response(err: AgentTermError) -> Response {
    let category = err.category();
    let status = if matches!(err, AgentTermError::NotFound(_)) {
        StatusCode::NOT_FOUND
    } else if matches!(err, AgentTermError::Conflict(_)) {
        StatusCode::CONFLICT
    } else {
        status_for(category)
    };
    (status, Json(err)).into_response()
}

type ApiResult<T> = Result<T, Response>;

fn map_err<T>(r: Result<T, AgentTermError>) -> ApiResult<T> {
    r.map_err(err_response)
}

// ---------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------

async fn auth_middleware(State(state): State<AppState>, request: axum::extract::Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let Some(expected) = state.api_token.clone() else {
        return next.run(request).await;
    };
    if extract_token(request.headers()).as_deref() == Some(&*expected) {
        return next.run(request).await;
    }
    tracing::warn!(path = %request.uri().path(), "rejected request with missing or invalid bearer token");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized", "code": "AUTH_REQUIRED"})),
    )
        .into_response()
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get("x-agenterm-token").and_then(|v| v.to_str().ok()) {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())?;
    let trimmed = auth.trim();
    let bearer = trimmed.strip_prefix("Bearer ").or_else(|| trimmed.strip_prefix("bearer "))?;
    let token = bearer.trim();
    (!token.is_empty()).then(|| token.to_string())
}

// ---------------------------------------------------------------------
// Cross-entity lookup helpers (entities are scoped under a project
// directory; most REST paths only carry the child id, so we scan the
// (typically small, local-single-user) project list).
// ---------------------------------------------------------------------

async fn find_task(state: &AppState, task_id: Uuid) -> Result<(Uuid, Task), AgentTermError> {
    for project in state.store.list_projects().await? {
        if let Some(task) = state.store.list_tasks(project.id).await?.into_iter().find(|t| t.id == task_id) {
            return Ok((project.id, task));
        }
    }
    Err(AgentTermError::NotFound(format!("task {task_id}")))
}

async fn find_worktree(state: &AppState, worktree_id: Uuid) -> Result<(Uuid, Worktree), AgentTermError> {
    for project in state.store.list_projects().await? {
        if let Some(w) = state
            .store
            .list_worktrees(project.id)
            .await?
            .into_iter()
            .find(|w| w.id == worktree_id)
        {
            return Ok((project.id, w));
        }
    }
    Err(AgentTermError::NotFound(format!("worktree {worktree_id}")))
}

async fn find_session(state: &AppState, session_id: Uuid) -> Result<(Uuid, Session), AgentTermError> {
    for project in state.store.list_projects().await? {
        if let Some(s) = state
            .store
            .list_sessions(project.id)
            .await?
            .into_iter()
            .find(|s| s.id == session_id)
        {
            return Ok((project.id, s));
        }
    }
    Err(AgentTermError::NotFound(format!("session {session_id}")))
}

// ---------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateProjectInput {
    name: String,
    repo_path: String,
    #[serde(default)]
    playbook_id: Option<String>,
    orchestrator_profile: OrchestratorProfile,
}

async fn create_project(State(state): State<AppState>, Json(input): Json<CreateProjectInput>) -> ApiResult<impl IntoResponse> {
    let mut project = Project::new(input.name, input.repo_path, input.orchestrator_profile);
    project.playbook_id = input.playbook_id;
    map_err(state.store.create_project(&project).await)?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(map_err(state.store.list_projects().await)?))
}

async fn get_project(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(map_err(state.store.get_project(id).await)?))
}

#[derive(Debug, Deserialize)]
struct PatchProjectInput {
    #[serde(default)]
    status: Option<ProjectStatus>,
    #[serde(default)]
    playbook_id: Option<String>,
    #[serde(default)]
    orchestrator_profile: Option<OrchestratorProfile>,
}

async fn patch_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PatchProjectInput>,
) -> ApiResult<impl IntoResponse> {
    let mut project = map_err(state.store.get_project(id).await)?;
    if let Some(status) = input.status {
        project.status = status;
    }
    if input.playbook_id.is_some() {
        project.playbook_id = input.playbook_id;
    }
    if let Some(profile) = input.orchestrator_profile {
        project.orchestrator_profile = profile;
    }
    project.updated_at = chrono::Utc::now();
    map_err(state.store.update_project(&project).await)?;
    Ok(Json(project))
}

/// Projects carry no tombstone, so DELETE archives instead of removing the row.
async fn delete_project(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let mut project = map_err(state.store.get_project(id).await)?;
    project.status = ProjectStatus::Archived;
    project.updated_at = chrono::Utc::now();
    map_err(state.store.update_project(&project).await)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateTaskInput {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends_on: Vec<Uuid>,
}

async fn create_task(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(input): Json<CreateTaskInput>,
) -> ApiResult<impl IntoResponse> {
    let mut task = Task::new(project_id, input.title, input.description);
    task.depends_on = input.depends_on;
    map_err(state.store.create_task(&task).await)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(State(state): State<AppState>, Path(project_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(map_err(state.store.list_tasks(project_id).await)?))
}

// ---------------------------------------------------------------------
// Worktrees
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateWorktreeInput {
    branch: String,
    slug: String,
    #[serde(default)]
    task_id: Option<Uuid>,
}

async fn create_worktree(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(input): Json<CreateWorktreeInput>,
) -> ApiResult<impl IntoResponse> {
    let project = map_err(state.store.get_project(project_id).await)?;
    if !agenterm_types::is_valid_branch_name(&input.branch) {
        return Err(err_response(AgentTermError::Input(format!("invalid branch name {}", input.branch))));
    }
    let manager = map_err(agenterm_runtime::WorktreeManager::new(project.repo_path.as_str()).await)?;
    let created_path = map_err(manager.create(&input.branch, &input.slug).await)?;
    let mut worktree = Worktree::new(project_id, input.branch, created_path);
    worktree.task_id = input.task_id;
    map_err(state.store.create_worktree(&worktree).await)?;
    if let Some(task_id) = input.task_id {
        if let Ok(mut tasks) = state.store.list_tasks(project_id).await {
            if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                t.worktree_id = Some(worktree.id);
                t.updated_at = chrono::Utc::now();
                let _ = state.store.update_task(t).await;
            }
        }
    }
    Ok((StatusCode::CREATED, Json(worktree)))
}

async fn worktree_git_status(State(state): State<AppState>, Path(worktree_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let (project_id, worktree) = map_err(find_worktree(&state, worktree_id).await)?;
    let project = map_err(state.store.get_project(project_id).await)?;
    let status = map_err(
        state
            .engine
            .worktree_status(project_id, &project.repo_path, &worktree.path)
            .await,
    )?;
    Ok(Json(json!({"worktree_id": worktree_id, "status": status})))
}

#[derive(Debug, Deserialize)]
struct GitLogQuery {
    #[serde(default = "default_log_n")]
    n: u32,
}

fn default_log_n() -> u32 {
    20
}

async fn worktree_git_log(
    State(state): State<AppState>,
    Path(worktree_id): Path<Uuid>,
    Query(query): Query<GitLogQuery>,
) -> ApiResult<impl IntoResponse> {
    let (project_id, worktree) = map_err(find_worktree(&state, worktree_id).await)?;
    let project = map_err(state.store.get_project(project_id).await)?;
    let log = map_err(
        state
            .engine
            .worktree_log(project_id, &project.repo_path, &worktree.path, query.n)
            .await,
    )?;
    Ok(Json(json!({"worktree_id": worktree_id, "log": log})))
}

async fn delete_worktree(State(state): State<AppState>, Path(worktree_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let (project_id, mut worktree) = map_err(find_worktree(&state, worktree_id).await)?;
    let project = map_err(state.store.get_project(project_id).await)?;
    map_err(
        state
            .engine
            .worktree_remove(project_id, &project.repo_path, &worktree.path, &worktree.branch)
            .await,
    )?;
    worktree.status = WorktreeStatus::Abandoned;
    map_err(state.store.update_worktree(&worktree).await)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSessionInput {
    agent_id: String,
    role: SessionRole,
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

async fn create_session_for_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(input): Json<CreateSessionInput>,
) -> ApiResult<impl IntoResponse> {
    let (project_id, task) = map_err(find_task(&state, task_id).await)?;
    let project = map_err(state.store.get_project(project_id).await)?;
    let worktree_path = if let Some(wid) = task.worktree_id {
        state
            .store
            .list_worktrees(project_id)
            .await
            .ok()
            .and_then(|ws| ws.into_iter().find(|w| w.id == wid).map(|w| w.path))
            .unwrap_or_else(|| project.repo_path.clone())
    } else {
        project.repo_path.clone()
    };
    let short_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let target = Session::target_name(
        &project_id.simple().to_string()[..8],
        &task_id.simple().to_string()[..8],
        input.role,
        &short_id,
    );
    let session = map_err(
        state
            .sessions
            .create(
                project_id,
                Some(task_id),
                task.worktree_id,
                &worktree_path,
                &input.agent_id,
                input.role,
                &input.command,
                &input.args,
                target,
            )
            .await,
    )?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    project_id: Option<Uuid>,
}

async fn list_sessions(State(state): State<AppState>, Query(query): Query<ListSessionsQuery>) -> ApiResult<impl IntoResponse> {
    if let Some(project_id) = query.project_id {
        return Ok(Json(map_err(state.store.list_sessions(project_id).await)?));
    }
    let mut all = Vec::new();
    for project in map_err(state.store.list_projects().await)? {
        all.extend(state.store.list_sessions(project.id).await.unwrap_or_default());
    }
    Ok(Json(all))
}

async fn get_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let (_, session) = map_err(find_session(&state, session_id).await)?;
    Ok(Json(session))
}

// ---------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EnqueueCommandInput {
    op: CommandOp,
    #[serde(default)]
    payload: Value,
}

async fn enqueue_command(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(input): Json<EnqueueCommandInput>,
) -> ApiResult<impl IntoResponse> {
    let (project_id, _) = map_err(find_session(&state, session_id).await)?;
    let command = map_err(state.sessions.dispatch(project_id, session_id, input.op, input.payload).await)?;
    Ok((StatusCode::CREATED, Json(command)))
}

async fn get_command(
    State(state): State<AppState>,
    Path((session_id, command_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let (project_id, _) = map_err(find_session(&state, session_id).await)?;
    let commands: Vec<Command> = map_err(state.store.list_commands(project_id, session_id).await)?;
    commands
        .into_iter()
        .find(|c| c.id == command_id)
        .map(Json)
        .ok_or_else(|| err_response(AgentTermError::NotFound(format!("command {command_id}"))))
}

async fn list_commands(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let (project_id, _) = map_err(find_session(&state, session_id).await)?;
    Ok(Json(map_err(state.store.list_commands(project_id, session_id).await)?))
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: u64,
}

async fn session_output(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<impl IntoResponse> {
    map_err(find_session(&state, session_id).await)?;
    let lines = map_err(state.sessions.read_output(session_id, query.since).await)?;
    Ok(Json(
        lines.into_iter().map(|l| json!({"seq": l.seq, "text": l.text})).collect::<Vec<_>>(),
    ))
}

async fn session_ready(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let (_, session) = map_err(find_session(&state, session_id).await)?;
    Ok(Json(json!({"session_id": session_id, "status": session.status})))
}

// ---------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatInput {
    project_id: Uuid,
    message: String,
}

async fn orchestrator_chat(State(state): State<AppState>, Json(input): Json<ChatInput>) -> ApiResult<impl IntoResponse> {
    let reply = map_err(state.engine.invoke(input.project_id, &input.message).await)?;
    Ok(Json(json!({"reply": reply})))
}

#[derive(Debug, Deserialize)]
struct ProjectScopedQuery {
    project_id: Uuid,
}

async fn orchestrator_report(State(state): State<AppState>, Query(query): Query<ProjectScopedQuery>) -> ApiResult<impl IntoResponse> {
    Ok(Json(map_err(progress::generate(&state.store, query.project_id).await)?))
}

async fn orchestrator_exceptions(State(state): State<AppState>, Query(query): Query<ProjectScopedQuery>) -> ApiResult<impl IntoResponse> {
    let exceptions: Vec<Exception> = map_err(state.store.list_exceptions(query.project_id).await)?;
    Ok(Json(exceptions))
}

#[derive(Debug, Deserialize)]
struct ResolveExceptionInput {
    project_id: Uuid,
}

async fn resolve_exception(
    State(state): State<AppState>,
    Path(exception_id): Path<Uuid>,
    Json(input): Json<ResolveExceptionInput>,
) -> ApiResult<impl IntoResponse> {
    map_err(state.store.resolve_exception(input.project_id, exception_id).await)?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------
// Demand pool
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateDemandInput {
    title: String,
    #[serde(default)]
    description: String,
}

async fn create_demand_item(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(input): Json<CreateDemandInput>,
) -> ApiResult<impl IntoResponse> {
    let item = DemandItem::new(project_id, input.title, input.description);
    map_err(state.store.create_demand_item(&item).await)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn list_demand_items(State(state): State<AppState>, Path(project_id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(map_err(state.store.list_demand_items(project_id).await)?))
}

#[derive(Debug, Deserialize)]
struct PromoteInput {
    project_id: Uuid,
    #[serde(default)]
    approved: bool,
}

async fn promote_demand_item(
    State(state): State<AppState>,
    Path(demand_id): Path<Uuid>,
    Json(input): Json<PromoteInput>,
) -> ApiResult<impl IntoResponse> {
    let task = map_err(state.engine.promote_demand_item(input.project_id, demand_id, input.approved).await)?;
    Ok((StatusCode::CREATED, Json(task)))
}

// ---------------------------------------------------------------------
// Event stream (replay-then-live subscribe, keyed off a per-project cursor)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeQuery {
    #[serde(default)]
    cursor: u64,
}

async fn project_events(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<SubscribeQuery>,
) -> ApiResult<impl IntoResponse> {
    let (backlog, live, _watermark) = map_err(state.store.subscribe(project_id, query.cursor).await)?;

    let backlog_stream = futures::stream::iter(backlog.into_iter().map(event_to_sse));
    let live_stream = BroadcastStream::new(live).filter_map(move |msg| match msg {
        Ok(event) => Some(event_to_sse(event)),
        Err(lagged) => {
            tracing::warn!(%project_id, %lagged, "SSE subscriber lagged; client must resume from its cursor");
            Some(Ok(SseEvent::default().event("lagged").data("{}")))
        }
    });

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>> =
        Box::pin(backlog_stream.chain(live_stream));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10))))
}

fn event_to_sse(event: Event) -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default()
        .id(event.seq.to_string())
        .event(format!("{:?}", event.kind))
        .data(serde_json::to_string(&event).unwrap_or_default()))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/{id}", get(get_project).patch(patch_project).delete(delete_project))
        .route("/projects/{id}/tasks", post(create_task).get(list_tasks))
        .route("/projects/{id}/worktrees", post(create_worktree))
        .route("/projects/{id}/events", get(project_events))
        .route("/projects/{id}/demand-pool", post(create_demand_item).get(list_demand_items))
        .route("/worktrees/{id}/git-status", get(worktree_git_status))
        .route("/worktrees/{id}/git-log", get(worktree_git_log))
        .route("/worktrees/{id}", delete(delete_worktree))
        .route("/tasks/{id}/sessions", post(create_session_for_task))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/commands", post(enqueue_command).get(list_commands))
        .route("/sessions/{id}/commands/{cid}", get(get_command))
        .route("/sessions/{id}/output", get(session_output))
        .route("/sessions/{id}/ready", get(session_ready))
        .route("/orchestrator/chat", post(orchestrator_chat))
        .route("/orchestrator/report", get(orchestrator_report))
        .route("/orchestrator/exceptions", get(orchestrator_exceptions))
        .route("/orchestrator/exceptions/{id}/resolve", post(resolve_exception))
        .route("/demand-pool/{id}/promote", post(promote_demand_item))
        .layer(cors)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
