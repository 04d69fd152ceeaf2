//! Wire vocabulary shared by every hookbridge crate: the typed hook event,
//! worker/breaker/cache/connection state, and the orchestration Plan model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque correlation id carried end-to-end from Ingress to Dispatcher/
/// Orchestrator and back, so a response can always be matched to its
/// request even when responses complete out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six hook lifecycle moments the Ingress can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    PreTool,
    PostTool,
    Notification,
    SessionStop,
    SubagentStop,
    PreCompact,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::PreTool => "pre_tool",
            HookKind::PostTool => "post_tool",
            HookKind::Notification => "notification",
            HookKind::SessionStop => "session_stop",
            HookKind::SubagentStop => "subagent_stop",
            HookKind::PreCompact => "pre_compact",
        }
    }

    /// Whether a successful dispatch of this kind is safe to memoize.
    pub fn is_cacheable(self) -> bool {
        matches!(self, HookKind::PreTool)
    }
}

/// A single inbound tool-invocation hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub id: RequestId,
    pub kind: HookKind,
    pub session_id: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: RequestId,
}

impl HookEvent {
    pub fn new(kind: HookKind, session_id: impl Into<String>, tool: impl Into<String>) -> Self {
        let id = RequestId::new();
        Self {
            id,
            kind,
            session_id: session_id.into(),
            tool: tool.into(),
            args: serde_json::Value::Null,
            result: None,
            error: None,
            timestamp: Utc::now(),
            correlation_id: id,
        }
    }
}

/// The terminal outcome the Dispatcher hands back to Ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResponse {
    pub id: RequestId,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    pub performance: PerformanceMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub correlation_id: RequestId,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceMeta {
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

/// Failover policy applied once a worker's `consecutiveFailures` crosses
/// its threshold (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailoverPolicy {
    Restart,
    Replace,
    CircuitBreaker,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerBudget {
    pub max_exec_ms: u64,
    pub max_concurrent: u32,
}

/// A registered worker's static definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDef {
    pub name: String,
    pub kind: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub probe_interval_ms: u64,
    pub failover_policy: FailoverPolicy,
    #[serde(default)]
    pub fallback_worker: Option<String>,
    pub failure_threshold: u32,
    pub budget: WorkerBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
    Stopped,
}

/// A registered worker's mutable runtime state, owned exclusively by the
/// Worker Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    pub status: WorkerStatus,
    pub inflight: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            status: WorkerStatus::Starting,
            inflight: 0,
            last_probe_at: None,
            consecutive_failures: 0,
            restart_count: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// A Connection opened over the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: uuid::Uuid,
    pub principal: String,
    pub permissions: Vec<String>,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// The four orchestration patterns (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Wave,
    Delegation,
    Loop,
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub workers: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub parallel: bool,
    pub timeout_ms: u64,
    pub status: PhaseStatus,
    pub optional: bool,
    /// How many times a failed phase rolls back to its last checkpoint and
    /// re-executes before falling through to `optional`/fail (§4.7.1).
    #[serde(default)]
    pub retry_cap: u32,
}

/// The mutable record of flags/scope/metadata carried between Phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub command: String,
    pub flags: Vec<String>,
    pub scope: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Context {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            flags: Vec::new(),
            scope: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    Sequential,
    Cumulative,
    Selective,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: uuid::Uuid,
    pub kind: PlanKind,
    pub phases: Vec<Phase>,
    pub context: Context,
    pub status: PlanStatus,
    /// `(completed, total)`
    pub progress: (u32, u32),
}
