pub mod action;
pub mod action_type;
pub mod dependency;
pub mod requests;
pub mod result;
pub mod setting;
pub mod statistics;
pub mod status;

pub use action::{ActionDetail, ActionPatch, Completion, NewAction, QueuedAction, RetrySchedule};
pub use action_type::{ActionPriority, ActionType};
pub use dependency::{closes_cycle, ActionDependency, NewDependency};
pub use requests::{
    BulkActionRequest, BulkEnqueueResult, BulkFailure, ClearRequest, CreateActionRequest,
    OrderBy, OrderDirection, ProcessRequest, ProcessSummary, QueueFilter, UpdateActionRequest,
};
pub use result::{ActionResult, NewActionResult};
pub use setting::QueueSetting;
pub use statistics::{QueueCounts, QueueHealth, QueueStatistics, WorkerState, WorkerStatus};
pub use status::{ActionStatus, DependencyType, UnknownVariant};
