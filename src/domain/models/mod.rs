pub mod config;
pub mod event;
pub mod job;
pub mod subscription;
pub mod trigger;
pub mod value;

pub use config::{
    Config, ConnectionConfig, ExecutionConfig, IngestionConfig, LoggingConfig, QueueBackendKind,
    QueueConfig,
};
pub use event::{CanonicalEvent, EventType};
pub use job::{Job, JobStatus, INTERRUPTED_ERROR};
pub use subscription::Subscription;
pub use trigger::{Condition, ConditionOperator, LogicalOperator, OwnerTriggers, Trigger};
pub use value::ConditionValue;
