/*
 * 5D Labs Deployment Platform - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use kube::api::{WatchEvent, WatchParams};
use kube::{Api, ResourceExt};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::tasks::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Blocks until a build job reaches a terminal state.
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn wait_for_completion(&self, job_name: &str) -> Result<JobOutcome>;
}

/// Terminal outcome recorded in `status`, if any.
///
/// Conditions win over counters; a job with neither is still running.
#[must_use]
pub fn job_outcome(status: &JobStatus) -> Option<JobOutcome> {
    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.status != "True" {
                continue;
            }
            match condition.type_.as_str() {
                "Complete" => return Some(JobOutcome::Succeeded),
                "Failed" => return Some(JobOutcome::Failed),
                _ => {}
            }
        }
    }

    if status.succeeded.unwrap_or(0) > 0 {
        Some(JobOutcome::Succeeded)
    } else if status.failed.unwrap_or(0) > 0 {
        Some(JobOutcome::Failed)
    } else {
        None
    }
}

fn outcome_of(job: &Job) -> Option<JobOutcome> {
    job.status.as_ref().and_then(job_outcome)
}

/// Delay before a failed read or watch of the job is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Watches a single job by name through the API server.
///
/// Read and watch failures are retried after a delay; the job is never
/// abandoned while it may still be running.
pub struct KubeJobMonitor {
    api: Api<Job>,
    retry_delay: Duration,
}

impl KubeJobMonitor {
    #[must_use]
    pub fn new(api: Api<Job>) -> Self {
        Self {
            api,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Follow the job from `resource_version` until it is terminal.
    async fn follow(
        &self,
        job_name: &str,
        params: &WatchParams,
        resource_version: &mut String,
    ) -> kube::Result<JobOutcome> {
        loop {
            debug!(job = job_name, resource_version = %resource_version, "Opening job watch");
            let version = resource_version.clone();
            let mut stream = self.api.watch(params, &version).await?.boxed();

            while let Some(event) = stream.next().await {
                match event? {
                    WatchEvent::Added(job) | WatchEvent::Modified(job) => {
                        if let Some(rv) = job.resource_version() {
                            *resource_version = rv;
                        }
                        if let Some(outcome) = outcome_of(&job) {
                            info!(job = job_name, ?outcome, "Job finished");
                            return Ok(outcome);
                        }
                    }
                    WatchEvent::Deleted(_) => {
                        warn!(job = job_name, "Job deleted before finishing");
                        return Ok(JobOutcome::Failed);
                    }
                    WatchEvent::Bookmark(bookmark) => {
                        *resource_version = bookmark.metadata.resource_version;
                    }
                    WatchEvent::Error(e) if e.code == 410 => {
                        debug!(job = job_name, "Watch expired, restarting from current state");
                        *resource_version = "0".to_string();
                        break;
                    }
                    WatchEvent::Error(e) => return Err(kube::Error::Api(e)),
                }
            }
        }
    }
}

#[async_trait]
impl JobMonitor for KubeJobMonitor {
    async fn wait_for_completion(&self, job_name: &str) -> Result<JobOutcome> {
        let params = WatchParams::default().fields(&format!("metadata.name={job_name}"));

        loop {
            let mut resource_version = match self.api.get_opt(job_name).await {
                Ok(Some(job)) => {
                    if let Some(outcome) = outcome_of(&job) {
                        info!(job = job_name, ?outcome, "Job already finished");
                        return Ok(outcome);
                    }
                    job.resource_version().unwrap_or_else(|| "0".to_string())
                }
                Ok(None) => "0".to_string(),
                Err(e) => {
                    warn!(job = job_name, error = %e, "Failed to read job, retrying");
                    sleep(self.retry_delay).await;
                    continue;
                }
            };

            match self.follow(job_name, &params, &mut resource_version).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(job = job_name, error = %e, "Job watch interrupted, re-establishing");
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
