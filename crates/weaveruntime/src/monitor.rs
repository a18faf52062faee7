//! Rolling execution metrics and system health.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use weavecore::{Execution, ExecutionId, ExecutionStatus, WorkflowId};

/// Error rate at or below which the system counts as healthy
const HEALTHY_MAX_ERROR_RATE: f64 = 0.1;
/// Error rate at or below which the system counts as degraded
const DEGRADED_MAX_ERROR_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    /// Mean wall-clock duration in milliseconds over recorded executions
    pub average_execution_time: f64,
    /// Newest first
    pub recent_errors: Vec<RecentError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub error_rate: f64,
    pub total_executions: u64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Default)]
struct MonitorState {
    total: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
    total_duration_ms: u64,
    recent_errors: VecDeque<RecentError>,
}

/// Aggregates terminal executions into metrics.
///
/// Owned by the runtime and handed to the engine as a handle.
pub struct Monitor {
    state: RwLock<MonitorState>,
    recent_errors_limit: usize,
}

impl Monitor {
    pub fn new(recent_errors_limit: usize) -> Self {
        Self {
            state: RwLock::new(MonitorState::default()),
            recent_errors_limit: recent_errors_limit.max(1),
        }
    }

    /// Fold one terminal execution into the metrics. Non-terminal records are ignored.
    pub async fn record(&self, execution: &Execution) {
        if !execution.status.is_terminal() {
            return;
        }
        let mut state = self.state.write().await;
        state.total += 1;
        state.total_duration_ms += execution.duration_ms.unwrap_or(0);

        match execution.status {
            ExecutionStatus::Completed => state.successful += 1,
            ExecutionStatus::Cancelled => state.cancelled += 1,
            _ => {
                state.failed += 1;
                state.recent_errors.push_front(RecentError {
                    execution_id: execution.id,
                    workflow_id: execution.workflow_id,
                    message: execution
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Execution failed".to_string()),
                    timestamp: execution.completed_at.unwrap_or_else(Utc::now),
                });
                state.recent_errors.truncate(self.recent_errors_limit);
            }
        }
    }

    pub async fn get_metrics(&self) -> ExecutionMetrics {
        let state = self.state.read().await;
        let average = if state.total == 0 {
            0.0
        } else {
            state.total_duration_ms as f64 / state.total as f64
        };
        ExecutionMetrics {
            total_executions: state.total,
            successful_executions: state.successful,
            failed_executions: state.failed,
            cancelled_executions: state.cancelled,
            average_execution_time: average,
            recent_errors: state.recent_errors.iter().cloned().collect(),
        }
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        let state = self.state.read().await;
        let error_rate = if state.total == 0 {
            0.0
        } else {
            state.failed as f64 / state.total as f64
        };
        let status = if error_rate <= HEALTHY_MAX_ERROR_RATE {
            HealthStatus::Healthy
        } else if error_rate <= DEGRADED_MAX_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        SystemHealth {
            status,
            error_rate,
            total_executions: state.total,
            checked_at: Utc::now(),
        }
    }

    pub async fn reset(&self) {
        *self.state.write().await = MonitorState::default();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use weavecore::ValueMap;

    fn finished(status: ExecutionStatus, error: Option<&str>) -> Execution {
        let mut execution = Execution::new(Uuid::new_v4(), ValueMap::new(), "tester");
        execution.mark_running();
        execution.finish(status, error.map(str::to_string));
        execution
    }

    #[tokio::test]
    async fn empty_monitor_is_healthy() {
        let monitor = Monitor::default();
        let health = monitor.get_system_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.error_rate, 0.0);
        assert_eq!(monitor.get_metrics().await.average_execution_time, 0.0);
    }

    #[tokio::test]
    async fn counts_outcomes_and_keeps_recent_errors_bounded() {
        let monitor = Monitor::new(2);
        monitor.record(&finished(ExecutionStatus::Completed, None)).await;
        monitor.record(&finished(ExecutionStatus::Failed, Some("first"))).await;
        monitor.record(&finished(ExecutionStatus::Failed, Some("second"))).await;
        monitor.record(&finished(ExecutionStatus::Failed, Some("third"))).await;

        let metrics = monitor.get_metrics().await;
        assert_eq!(metrics.total_executions, 4);
        assert_eq!(metrics.successful_executions, 1);
        assert_eq!(metrics.failed_executions, 3);
        let messages: Vec<_> = metrics.recent_errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second"]);

        let health = monitor.get_system_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!((health.error_rate - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn running_executions_are_ignored() {
        let monitor = Monitor::default();
        let mut running = Execution::new(Uuid::new_v4(), ValueMap::new(), "tester");
        running.mark_running();
        monitor.record(&running).await;
        assert_eq!(monitor.get_metrics().await.total_executions, 0);
    }

    #[tokio::test]
    async fn moderate_error_rate_is_degraded() {
        let monitor = Monitor::default();
        for _ in 0..3 {
            monitor.record(&finished(ExecutionStatus::Completed, None)).await;
        }
        monitor.record(&finished(ExecutionStatus::Failed, Some("x"))).await;
        assert_eq!(monitor.get_system_health().await.status, HealthStatus::Degraded);
    }
}
