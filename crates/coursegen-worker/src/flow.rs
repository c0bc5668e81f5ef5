//! Flow orchestrator: atomic registration of a parent job and its children.
//!
//! The orchestrator only registers. Keeping the parent unclaimable until
//! every child is terminal is the queue store's job. A child that exhausts
//! its retries still counts as terminal, so a partially failed flow reaches
//! its aggregator with fewer results instead of blocking forever.

use tracing::info;

use coursegen_core::error::AppError;
use coursegen_core::result::AppResult;
use coursegen_entity::job::{FlowHandle, FlowNode, Job};

use crate::queue::JobQueue;

/// Registers fan-out/fan-in flows.
#[derive(Debug, Clone)]
pub struct FlowProducer {
    queue: JobQueue,
}

impl FlowProducer {
    /// Create a producer that validates and defaults jobs like `queue`.
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    /// Register `parent` and all `children` in one store call.
    ///
    /// Rejects an empty child list; a single unit of work should be
    /// enqueued directly. Every payload is validated before anything is
    /// written. An id that is already registered, or a dedupe key held by
    /// an outstanding job, fails the whole flow with `Conflict`.
    pub async fn start_flow(
        &self,
        parent: FlowNode,
        children: Vec<FlowNode>,
    ) -> AppResult<FlowHandle> {
        if children.is_empty() {
            return Err(AppError::validation(
                "A flow needs at least one child; enqueue the job directly instead",
            ));
        }

        let parent_job = self.queue.prepare(parent.payload, &parent.options)?;
        let child_jobs = children
            .into_iter()
            .map(|child| self.queue.prepare(child.payload, &child.options))
            .collect::<AppResult<Vec<Job>>>()?;

        let handle = FlowHandle {
            parent_job_id: parent_job.id.clone(),
            child_job_ids: child_jobs.iter().map(|job| job.id.clone()).collect(),
            child_count: child_jobs.len(),
        };
        let parent_name = parent_job.name;

        self.queue
            .store()
            .add_flow(parent_job, child_jobs)
            .await?;

        info!(
            parent_job_id = %handle.parent_job_id,
            parent_name = %parent_name,
            child_count = handle.child_count,
            "Started flow"
        );

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use coursegen_core::error::ErrorKind;
    use coursegen_core::types::JobId;
    use coursegen_entity::content::Difficulty;
    use coursegen_entity::job::{
        EnqueueOptions, FinalizeCoursePayload, GenerateSingleLessonPayload, JobOptions, JobState,
        TriggerSource,
    };
    use coursegen_queue::MemoryQueueStore;

    fn producer() -> FlowProducer {
        FlowProducer::new(JobQueue::new(
            Arc::new(MemoryQueueStore::new()),
            JobOptions::default(),
        ))
    }

    fn parent(id: &str, lesson_count: u32) -> FlowNode {
        FlowNode::new(FinalizeCoursePayload {
            user_id: 1,
            title: "Rust Basics".to_string(),
            topic: "Rust".to_string(),
            description: None,
            difficulty: Difficulty::Beginner,
            language: "rust".to_string(),
            lesson_count,
            trigger: TriggerSource::Cli,
        })
        .with_options(EnqueueOptions::default().with_job_id(id))
    }

    fn child(index: u32, count: u32) -> FlowNode {
        FlowNode::new(GenerateSingleLessonPayload {
            user_id: 1,
            course_title: "Rust Basics".to_string(),
            topic: format!("Part {index}"),
            lesson_index: index,
            lesson_count: count,
            difficulty: Difficulty::Beginner,
            language: "rust".to_string(),
            paradigm: None,
        })
    }

    #[tokio::test]
    async fn test_flow_registers_parent_waiting_children() {
        let producer = producer();
        let handle = producer
            .start_flow(parent("course-1", 2), vec![child(0, 2), child(1, 2)])
            .await
            .expect("flow");

        assert_eq!(handle.child_count, 2);
        assert_eq!(handle.parent_job_id, JobId::from("course-1"));

        let status = producer
            .queue
            .get_status(&handle.parent_job_id)
            .await
            .expect("parent status");
        assert_eq!(status.state, JobState::WaitingChildren);

        for id in &handle.child_job_ids {
            let status = producer.queue.get_status(id).await.expect("child status");
            assert_eq!(status.state, JobState::Waiting);
        }
    }

    #[tokio::test]
    async fn test_empty_children_rejected() {
        let producer = producer();
        let err = producer
            .start_flow(parent("course-1", 1), Vec::new())
            .await
            .expect_err("empty flow");
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = producer
            .queue
            .get_status(&JobId::from("course-1"))
            .await
            .expect_err("nothing written");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_child_writes_nothing() {
        let producer = producer();
        let err = producer
            .start_flow(parent("course-1", 2), vec![child(0, 2), child(5, 2)])
            .await
            .expect_err("index out of range");
        assert_eq!(err.kind, ErrorKind::Validation);

        let metrics = producer
            .queue
            .get_metrics("course-generation")
            .await
            .expect("metrics");
        assert_eq!(metrics.waiting, 0);
        assert_eq!(metrics.waiting_children, 0);
    }

    #[tokio::test]
    async fn test_resubmitted_parent_conflicts() {
        let producer = producer();
        producer
            .start_flow(parent("course-1", 1), vec![child(0, 1)])
            .await
            .expect("first flow");
        let err = producer
            .start_flow(parent("course-1", 1), vec![child(0, 1)])
            .await
            .expect_err("same parent id");
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_outstanding_dedupe_key_rejects_flow() {
        let producer = producer();
        let keyed = |id: &str| {
            let node = parent(id, 1);
            let options = node.options.clone().with_dedupe_key("user-1:rust-course");
            node.with_options(options)
        };

        producer
            .start_flow(keyed("course-a"), vec![child(0, 1)])
            .await
            .expect("first flow");
        let err = producer
            .start_flow(keyed("course-b"), vec![child(0, 1)])
            .await
            .expect_err("dedupe key outstanding");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.to_string().contains("course-a"));

        let err = producer
            .queue
            .get_status(&JobId::from("course-b"))
            .await
            .expect_err("nothing written");
        assert_eq!(err.kind, ErrorKind::NotFound);
        let metrics = producer
            .queue
            .get_metrics("course-generation")
            .await
            .expect("metrics");
        assert_eq!(metrics.waiting_children, 1);
        assert_eq!(metrics.waiting, 1);
    }
}
