// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Waiting for long-running server tasks

use std::time::Duration;
use tokio::time::Instant;

use super::call::RemoteCaller;
use crate::errors::{ContentflowError, ContentflowResult};
use crate::remote::{RemoteClient, TaskHandle, TaskStatus};

/// How often and how long to poll a task
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Give up after this long
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(3600),
        }
    }
}

/// Poll `task` until it succeeds, fails or the deadline passes
pub async fn wait_for_task(
    client: &dyn RemoteClient,
    caller: &RemoteCaller,
    task: &TaskHandle,
    settings: &PollSettings,
) -> ContentflowResult<()> {
    let deadline = Instant::now() + settings.deadline;

    loop {
        match caller.call("poll", || client.poll(task)).await? {
            TaskStatus::Succeeded => {
                tracing::debug!(task = %task.label, "task finished");
                return Ok(());
            }
            TaskStatus::Failed(message) => {
                return Err(ContentflowError::TaskFailed {
                    task: task.label.clone(),
                    message,
                });
            }
            TaskStatus::Running => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ContentflowError::PollTimeout {
                        task: task.label.clone(),
                        after: settings.deadline,
                    });
                }
                tokio::time::sleep(settings.interval.min(deadline - now)).await;
            }
        }
    }
}
