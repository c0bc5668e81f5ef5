//! Job and queue model: the contract between producers and consumers.

pub mod flow;
pub mod metrics;
pub mod model;
pub mod name;
pub mod options;
pub mod payload;
pub mod progress;
pub mod result;
pub mod state;

pub use flow::{ChildrenValues, FlowHandle, FlowNode};
pub use metrics::QueueMetrics;
pub use model::{Job, JobStatus, ParentRef};
pub use name::{JobName, QueueName};
pub use options::{Backoff, BackoffKind, EnqueueOptions, JobOptions, KeepPolicy};
pub use payload::{
    CreateNotificationPayload, FinalizeCoursePayload, GenerateLessonPayload,
    GenerateSingleLessonPayload, JobPayload, MAX_COURSE_LESSONS, TriggerSource,
};
pub use progress::{GenerationStep, JobProgress, ProgressDetail};
pub use result::{CourseResult, LessonFragment, LessonResult, NotificationResult};
pub use state::JobState;
