//! Entity types shared by the orchestrator, workers, and the store.

pub mod execution;
pub mod item;
pub mod node_execution;
pub mod queue_item;
pub mod task;
pub mod workflow;

pub use execution::{Execution, ExecutionError, ExecutionStatus};
pub use item::ExtractedItem;
pub use node_execution::{NodeExecution, NodeExecutionStatus};
pub use queue_item::{NewQueueItem, QueueItemStatus, UrlQueueItem};
pub use task::{TaskMessage, TaskMetadata, WorkflowDefaults};
pub use workflow::{
    NodeConfig, Phase, PhaseKind, Transition, TransitionCondition, UrlFilter, Workflow,
    WorkflowConfig, WorkflowStatus,
};
