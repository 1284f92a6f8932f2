use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::jobs::{HealthReporter, RetentionCleaner};
use crate::runner::BulkScrapeRunner;
use crate::utils::error::Result;

pub const SCRAPE_JOB: &str = "price_scraper";
pub const CLEANUP_JOB: &str = "cleanup";
pub const HEALTH_JOB: &str = "health_check";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub skipped_overlap: u64,
    pub skipped_misfire: u64,
}

/// What to do with a trigger that just fired.
pub enum FireDecision {
    /// Run the job body; the permit releases the identity on drop.
    Run(OwnedMutexGuard<()>),
    /// The previous run of this identity is still active; drop the trigger.
    Overlapped,
    /// The trigger was observed too long after its scheduled time; skip it.
    Misfired,
}

/// Per-job-identity execution policy: at most one concurrent run
/// (overlapping triggers are coalesced away, never queued) and a misfire
/// grace period beyond which a late trigger is skipped instead of run.
pub struct JobGuard {
    running: Arc<Mutex<()>>,
    misfire_grace: Duration,
    info: RwLock<JobInfo>,
}

impl JobGuard {
    pub fn new(name: &str, schedule: &str, misfire_grace: Duration) -> Self {
        Self {
            running: Arc::new(Mutex::new(())),
            misfire_grace,
            info: RwLock::new(JobInfo {
                name: name.to_string(),
                schedule: schedule.to_string(),
                last_run: None,
                next_run: None,
                run_count: 0,
                skipped_overlap: 0,
                skipped_misfire: 0,
            }),
        }
    }

    pub async fn on_trigger(&self, now: DateTime<Utc>) -> FireDecision {
        // Overlap is checked first: while a run holds the lock, next_run
        // is stale, so a concurrent trigger must not count as a misfire.
        let permit = match Arc::clone(&self.running).try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.info.write().await.skipped_overlap += 1;
                return FireDecision::Overlapped;
            }
        };

        {
            let info = self.info.read().await;
            if let Some(expected) = info.next_run {
                if now - expected > self.misfire_grace {
                    drop(info);
                    drop(permit);
                    self.info.write().await.skipped_misfire += 1;
                    return FireDecision::Misfired;
                }
            }
        }

        let mut info = self.info.write().await;
        info.last_run = Some(now);
        info.run_count += 1;
        FireDecision::Run(permit)
    }

    pub async fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        self.info.write().await.next_run = next;
    }

    pub async fn info(&self) -> JobInfo {
        self.info.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }
}

/// Runs the bulk scrape, retention cleanup and health report on
/// independent recurring triggers. Identities never overlap themselves;
/// distinct identities run concurrently.
pub struct PriceScheduler {
    scheduler: JobScheduler,
    guards: HashMap<&'static str, (Arc<JobGuard>, Uuid)>,
    runner: Arc<BulkScrapeRunner>,
    cleaner: Arc<RetentionCleaner>,
    health: Arc<HealthReporter>,
    config: SchedulerConfig,
}

impl PriceScheduler {
    pub async fn new(
        runner: Arc<BulkScrapeRunner>,
        cleaner: Arc<RetentionCleaner>,
        health: Arc<HealthReporter>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            guards: HashMap::new(),
            runner,
            cleaner,
            health,
            config,
        })
    }

    /// Register all jobs and start firing triggers. Failures here are
    /// fatal: a scheduler that cannot initialize its triggers has no safe
    /// degraded mode, so the caller is expected to terminate.
    pub async fn start(&mut self) -> Result<()> {
        let scrape_schedule = self.config.scrape_schedule.clone();
        let cleanup_schedule = self.config.cleanup_schedule.clone();
        let health_schedule = self.config.health_schedule.clone();

        let runner = Arc::clone(&self.runner);
        self.register(SCRAPE_JOB, &scrape_schedule, move || {
            let runner = Arc::clone(&runner);
            async move {
                runner.run_once().await;
            }
        })
        .await?;

        let cleaner = Arc::clone(&self.cleaner);
        self.register(CLEANUP_JOB, &cleanup_schedule, move || {
            let cleaner = Arc::clone(&cleaner);
            async move {
                if let Err(e) = cleaner.run_once().await {
                    tracing::error!(error = %e, "retention cleanup failed");
                }
            }
        })
        .await?;

        let health = Arc::clone(&self.health);
        self.register(HEALTH_JOB, &health_schedule, move || {
            let health = Arc::clone(&health);
            async move {
                if let Err(e) = health.report().await {
                    tracing::error!(error = %e, "health check failed");
                }
            }
        })
        .await?;

        self.scheduler.start().await?;

        // Seed the next-run times now that the triggers are live
        for (name, (guard, job_id)) in &self.guards {
            let next = self.scheduler.next_tick_for_job(*job_id).await.ok().flatten();
            guard.set_next_run(next).await;
            tracing::info!(job = name, next_run = ?next, "scheduled job");
        }

        tracing::info!("scheduler started");
        Ok(())
    }

    async fn register<F, Fut>(&mut self, name: &'static str, schedule: &str, body: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let grace = Duration::seconds(self.config.misfire_grace_secs as i64);
        let guard = Arc::new(JobGuard::new(name, schedule, grace));
        let guard_for_job = Arc::clone(&guard);

        let job = Job::new_async(schedule, move |uuid, mut sched| {
            let guard = Arc::clone(&guard_for_job);
            let body = body.clone();

            Box::pin(async move {
                match guard.on_trigger(Utc::now()).await {
                    FireDecision::Run(_permit) => {
                        tracing::debug!(job = name, "trigger fired, running");
                        body().await;
                    }
                    FireDecision::Overlapped => {
                        tracing::warn!(job = name, "previous run still active, dropping trigger");
                    }
                    FireDecision::Misfired => {
                        tracing::warn!(job = name, "trigger past misfire grace, skipping");
                    }
                }

                match sched.next_tick_for_job(uuid).await {
                    Ok(next) => guard.set_next_run(next).await,
                    Err(e) => tracing::debug!(job = name, error = %e, "could not query next tick"),
                }
            })
        })?;

        let job_id = self.scheduler.add(job).await?;
        self.guards.insert(name, (guard, job_id));
        Ok(())
    }

    /// Stop firing new triggers. In-flight job bodies run to completion on
    /// the runtime so their batch can commit cleanly.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        tracing::info!("scheduler shutdown");
        Ok(())
    }

    /// Wait until no job body is executing, up to `timeout`. Returns false
    /// when the timeout elapsed with a run still in flight. Callers use
    /// this after [`shutdown`](Self::shutdown) so exiting the runtime does
    /// not kill a batch mid-transaction.
    pub async fn wait_until_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.guards.values().any(|(guard, _)| guard.is_running()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    pub async fn job_info(&self, name: &str) -> Option<JobInfo> {
        match self.guards.get(name) {
            Some((guard, _)) => Some(guard.info().await),
            None => None,
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let mut infos = Vec::with_capacity(self.guards.len());
        for (guard, _) in self.guards.values() {
            infos.push(guard.info().await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn is_job_running(&self, name: &str) -> bool {
        self.guards
            .get(name)
            .map(|(guard, _)| guard.is_running())
            .unwrap_or(false)
    }
}
