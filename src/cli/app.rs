use super::{Cli, Command, ui};
use anyhow::{Context, Result};
use samstore::connection::{self, config::StoreConfig};
use samstore::{
    CleanupEngine, IndexKind, RebuildMode, ReconcileWorker, Reconciler, RedisStore, Scope,
    cancel_pair, check_index, check_related_links, populate_aspect_map_from_subject_map,
    rebuild_index, recent_samples,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct App {
    config: StoreConfig,
    json: bool,
}

impl App {
    /// Environment defaults overridden by the global flags.
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = StoreConfig::from_env().context("Failed to read configuration")?;
        if let Some(url) = &cli.redis_url {
            config = config.url(url);
        }
        Ok(Self {
            config,
            json: cli.json,
        })
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Cleanup { preview, scope } => {
                let scope = scope.resolve(&self.config.scope);
                self.cleanup(scope, preview).await
            }
            Command::Check { scope, index } => {
                let scope = scope.resolve(&self.config.scope);
                self.check(scope, index.into()).await
            }
            Command::Rebuild {
                scope,
                index,
                additive,
            } => {
                let scope = scope.resolve(&self.config.scope);
                let mode = if additive {
                    RebuildMode::Additive
                } else {
                    RebuildMode::Full
                };
                self.rebuild(scope, index.into(), mode).await
            }
            Command::RebuildAspectMapFromSubjects { scope } => {
                let scope = scope.resolve(&self.config.scope);
                self.rebuild_aspect_map(scope).await
            }
            Command::Reconcile {
                scope,
                index,
                interval_ms,
                once,
            } => {
                let scope = scope.resolve(&self.config.scope);
                let interval = interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.interval);
                self.reconcile(scope, index.into(), interval, once).await
            }
            Command::CheckRelatedLinks { scope } => {
                let scope = scope.resolve(&self.config.scope);
                self.related_links(scope).await
            }
            Command::RecentSamples { scope, within_ms } => {
                let scope = scope.resolve(&self.config.scope);
                self.recent_samples(scope, within_ms).await
            }
        }
    }

    async fn connect(&self) -> Result<RedisStore> {
        connection::connect(&self.config)
            .await
            .with_context(|| format!("Failed to connect to '{}'", self.config.redacted_url()))
    }

    fn emit(&self, text: String) {
        println!("{}", text);
    }

    async fn cleanup(&self, scope: Scope, preview: bool) -> Result<()> {
        let store = self.connect().await?;
        let engine = CleanupEngine::new(&store)
            .scope(scope)
            .options(self.config.repair_options());

        let report = if preview {
            engine.preview().await
        } else {
            engine.run().await
        }
        .context("Cleanup failed")?;

        self.emit(if self.json {
            ui::json("cleanup", &report)?
        } else {
            ui::cleanup(&report)
        });
        Ok(())
    }

    async fn check(&self, scope: Scope, index: IndexKind) -> Result<()> {
        let store = self.connect().await?;
        let report = check_index(&store, index, &scope, &self.config.repair_options())
            .await
            .context("Index check failed")?;

        self.emit(if self.json {
            ui::json("check", &report)?
        } else {
            ui::check(&report)
        });
        Ok(())
    }

    async fn rebuild(&self, scope: Scope, index: IndexKind, mode: RebuildMode) -> Result<()> {
        let store = self.connect().await?;
        let report = rebuild_index(&store, index, &scope, mode, &self.config.repair_options())
            .await
            .with_context(|| format!("Rebuilding index {} failed", index))?;

        self.emit(if self.json {
            ui::json("rebuild", &report)?
        } else {
            ui::rebuild(&report)
        });
        Ok(())
    }

    async fn rebuild_aspect_map(&self, scope: Scope) -> Result<()> {
        let started = Instant::now();
        let store = self.connect().await?;
        let added = populate_aspect_map_from_subject_map(&store, &scope, &self.config.repair_options())
            .await
            .context("Deriving the aspect map failed")?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.emit(if self.json {
            ui::json(
                "rebuild-aspect-map-from-subjects",
                &serde_json::json!({ "scope": scope, "added": added, "elapsed_ms": elapsed_ms }),
            )?
        } else {
            format!("Added {} aspect map entries\n{}", added, ui::success(elapsed_ms))
        });
        Ok(())
    }

    async fn related_links(&self, scope: Scope) -> Result<()> {
        let store = self.connect().await?;
        let report = check_related_links(&store, &scope, &self.config.repair_options())
            .await
            .context("Related links check failed")?;

        self.emit(if self.json {
            ui::json("check-related-links", &report)?
        } else {
            ui::related_links(&report)
        });
        Ok(())
    }

    async fn recent_samples(&self, scope: Scope, within_ms: u64) -> Result<()> {
        let store = self.connect().await?;
        let since = window_start(Utc::now(), within_ms);
        let report = recent_samples(&store, &scope, since, &self.config.repair_options())
            .await
            .context("Recent sample scan failed")?;

        self.emit(if self.json {
            ui::json("recent-samples", &report)?
        } else {
            ui::recent_samples(&report)
        });
        Ok(())
    }

    async fn reconcile(
        &self,
        scope: Scope,
        index: IndexKind,
        interval: Duration,
        once: bool,
    ) -> Result<()> {
        let store = Arc::new(self.connect().await?);
        let (cancel, signal) = cancel_pair();
        let reconciler = Arc::new(
            Reconciler::new(store)
                .index(index)
                .scope(scope)
                .options(self.config.repair_options().cancel_on(signal)),
        );

        if once {
            let outcome = reconciler.reconcile_once().await.context("Reconcile failed")?;
            self.emit(if self.json {
                ui::json("reconcile", &outcome)?
            } else {
                ui::reconcile(&outcome)
            });
            return Ok(());
        }

        let worker = ReconcileWorker::spawn(reconciler.clone(), interval);
        info!(interval_ms = interval.as_millis() as u64, "reconciling until interrupted");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        warn!("interrupt received, stopping after the current pass");

        cancel.cancel();
        worker.stop().await.context("Stopping the reconcile worker failed")?;
        info!(passes = reconciler.passes(), "reconcile stopped");
        Ok(())
    }
}

/// Start of a window of `within_ms` ending at `now`, clamped to the earliest time.
fn window_start(now: DateTime<Utc>, within_ms: u64) -> DateTime<Utc> {
    i64::try_from(within_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
