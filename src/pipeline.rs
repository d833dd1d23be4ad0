use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogGateway;
use crate::cleanup;
use crate::config::{ASSET_EXTENSION, AppConfig, PipelineConfig};
use crate::driver::{self, OsaScriptDriver, SessionDriver, SessionHandle};
use crate::fetch::{self, AssetFetcher, FetchError, HttpFetcher};
use crate::models::{RunOutcome, RunReport, StepReport, StepStatus, sanitize_stem};
use crate::poll::{self, Clock, PollOutcome, TokioClock, poll_until};
use crate::remote::{self, ActionOutcome, CostReading, FeatureState};
use crate::retriever::{self, ExportWatch};
use crate::supabase::SupabaseCatalog;

/// Pause between dialog interactions so the remote UI can re-render.
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LookupItem,
    DownloadImage,
    OpenSession,
    UploadImage,
    ConfigureGeneration,
    TriggerGeneration,
    AwaitGeneration,
    ExportAndDownload,
    PersistAsset,
    RemoteCleanup,
}

impl Step {
    pub const COUNT: u8 = 10;

    pub const fn index(self) -> u8 {
        match self {
            Step::LookupItem => 1,
            Step::DownloadImage => 2,
            Step::OpenSession => 3,
            Step::UploadImage => 4,
            Step::ConfigureGeneration => 5,
            Step::TriggerGeneration => 6,
            Step::AwaitGeneration => 7,
            Step::ExportAndDownload => 8,
            Step::PersistAsset => 9,
            Step::RemoteCleanup => 10,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Step::LookupItem => "lookup_item",
            Step::DownloadImage => "download_image",
            Step::OpenSession => "open_session",
            Step::UploadImage => "upload_image",
            Step::ConfigureGeneration => "configure_generation",
            Step::TriggerGeneration => "trigger_generation",
            Step::AwaitGeneration => "await_generation",
            Step::ExportAndDownload => "export_and_download",
            Step::PersistAsset => "persist_asset",
            Step::RemoteCleanup => "remote_cleanup",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Step::LookupItem => "Looking up catalog item",
            Step::DownloadImage => "Downloading source image",
            Step::OpenSession => "Opening generator session",
            Step::UploadImage => "Uploading image",
            Step::ConfigureGeneration => "Configuring generation",
            Step::TriggerGeneration => "Checking cost and starting generation",
            Step::AwaitGeneration => "Waiting for generation",
            Step::ExportAndDownload => "Exporting model",
            Step::PersistAsset => "Saving model",
            Step::RemoteCleanup => "Deleting remote copy",
        }
    }
}

/// Per-run switches from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub skip_catalog: bool,
    pub keep_session: bool,
    pub keep_temp: bool,
    pub keep_remote: bool,
    pub dry_run: bool,
}

/// Everything one conversion run owns. Resources recorded here are released
/// by [`Pipeline::run`] whatever happens to the steps.
#[derive(Debug)]
pub struct ConversionJob {
    pub run_id: Uuid,
    pub item: String,
    pub stem: String,
    pub image_url: Option<String>,
    pub temp_image: Option<PathBuf>,
    pub session: Option<SessionHandle>,
    pub artifact: Option<PathBuf>,
    pub asset: Option<PathBuf>,
}

impl ConversionJob {
    fn new(item: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            item: item.trim().to_string(),
            stem: sanitize_stem(item),
            image_url: None,
            temp_image: None,
            session: None,
            artifact: None,
            asset: None,
        }
    }
}

enum LookupDecision {
    Convert(String),
    AlreadyConverted(String),
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    catalog: Arc<dyn CatalogGateway>,
    fetcher: Arc<dyn AssetFetcher>,
    driver: Arc<dyn SessionDriver>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<dyn CatalogGateway>,
        fetcher: Arc<dyn AssetFetcher>,
        driver: Arc<dyn SessionDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            fetcher,
            driver,
            clock,
        }
    }

    /// Production wiring: Supabase catalog, HTTP image fetcher, the scripted
    /// desktop browser and the tokio clock.
    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        let driver = OsaScriptDriver::new(
            config.driver.browser.clone(),
            config.driver.geometry,
            config.driver.script_timeout,
        );
        Ok(Self::new(
            config.pipeline.clone(),
            Arc::new(SupabaseCatalog::new(&config.catalog)),
            Arc::new(HttpFetcher::new()?),
            Arc::new(driver),
            Arc::new(TokioClock),
        ))
    }

    /// Converts one catalog item. Never returns early without releasing the
    /// session and temp image; a panic inside a step is re-raised only after
    /// that release.
    pub async fn run(&self, item: &str, options: &RunOptions) -> RunReport {
        let started = Instant::now();
        let mut job = ConversionJob::new(item);
        let mut steps = Vec::new();
        info!(
            target = "stager.pipeline",
            run_id = %job.run_id,
            item = %job.item,
            stem = %job.stem,
            "conversion_started"
        );

        let result = AssertUnwindSafe(self.execute(&mut job, options, &mut steps))
            .catch_unwind()
            .await;
        self.release(&mut job, options).await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => RunOutcome::Failed {
                step: err.stage().to_string(),
                kind: err.kind(),
                error: err.detail().to_string(),
            },
            Err(panic) => std::panic::resume_unwind(panic),
        };
        crate::metrics::run_finished(outcome.label(), started.elapsed().as_millis());
        info!(
            target = "stager.pipeline",
            run_id = %job.run_id,
            outcome = outcome.label(),
            image_url = ?job.image_url,
            artifact = ?job.artifact,
            asset = ?job.asset,
            "conversion_finished"
        );

        RunReport {
            run_id: job.run_id,
            item: job.item,
            stem: job.stem,
            outcome,
            steps,
        }
    }

    /// Writes the catalog reference for an asset that is already in storage.
    pub async fn record_existing_asset(&self, item: &str) -> Result<usize, PipelineError> {
        const STAGE: &str = Step::PersistAsset.name();
        let stem = sanitize_stem(item);
        let reference = format!("{stem}.{ASSET_EXTENSION}");
        let path = self.config.asset_dir.join(&reference);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(PipelineError::persist(
                STAGE,
                format!("{} does not exist", path.display()),
            ));
        }
        let updated = self
            .catalog
            .set_asset_reference(item.trim(), &reference)
            .await
            .map_err(|err| PipelineError::catalog(STAGE, err.to_string()))?;
        if updated == 0 {
            warn!(target = "stager.catalog", item = %item, "catalog_update_zero_rows");
        }
        Ok(updated)
    }

    async fn execute(
        &self,
        job: &mut ConversionJob,
        options: &RunOptions,
        steps: &mut Vec<StepReport>,
    ) -> Result<RunOutcome, PipelineError> {
        let decision = self
            .capture_step(Step::LookupItem, steps, self.lookup_item(job))
            .await?;
        let image_url = match decision {
            LookupDecision::AlreadyConverted(reference) => {
                return Ok(RunOutcome::Skipped {
                    reason: format!("already converted ({reference})"),
                });
            }
            LookupDecision::Convert(url) => url,
        };
        job.image_url = Some(image_url.clone());

        let temp_image = self
            .capture_step(
                Step::DownloadImage,
                steps,
                self.download_image(job, &image_url),
            )
            .await?;

        let handle = self
            .capture_step(Step::OpenSession, steps, self.open_session(job))
            .await?;

        self.capture_step(
            Step::UploadImage,
            steps,
            self.upload_image(&handle, &temp_image),
        )
        .await?;

        self.capture_step(
            Step::ConfigureGeneration,
            steps,
            self.configure_generation(&handle),
        )
        .await?;

        let observed_cost = self
            .capture_step(
                Step::TriggerGeneration,
                steps,
                self.trigger_generation(&handle, options.dry_run),
            )
            .await?;
        if options.dry_run {
            return Ok(RunOutcome::Previewed { observed_cost });
        }

        self.capture_step(Step::AwaitGeneration, steps, self.await_generation(&handle))
            .await?;

        let artifact = self
            .capture_step(
                Step::ExportAndDownload,
                steps,
                self.export_and_download(&handle, &job.stem),
            )
            .await?;
        job.artifact = Some(artifact.clone());

        let asset = self
            .capture_step(
                Step::PersistAsset,
                steps,
                self.persist_asset(job, &artifact, options.skip_catalog),
            )
            .await?;

        self.capture_step(
            Step::RemoteCleanup,
            steps,
            self.remote_cleanup(&handle, options.keep_remote),
        )
        .await?;

        Ok(RunOutcome::Succeeded { asset })
    }

    async fn capture_step<T, Fut>(
        &self,
        step: Step,
        steps: &mut Vec<StepReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StepOutcome<T>, PipelineError>>,
    {
        println!("[{}/{}] {}", step.index(), Step::COUNT, step.label());
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::step_elapsed(step.name(), elapsed_ms);

        match result {
            Ok(outcome) => {
                let status = match &outcome.warning {
                    Some(warning) => {
                        println!("      WARNING: {warning}");
                        warn!(target = "stager.pipeline", step = step.name(), warning = %warning, "step_warning");
                        StepStatus::CompletedWithWarning
                    }
                    None => StepStatus::Completed,
                };
                steps.push(
                    StepReport::new(step.index(), step.name(), status, elapsed_ms, outcome.output)
                        .with_warning(outcome.warning),
                );
                Ok(outcome.value)
            }
            Err(err) => {
                println!(
                    "ERROR: [{}/{}] {} failed: {}",
                    step.index(),
                    Step::COUNT,
                    step.name(),
                    err.detail()
                );
                error!(
                    target = "stager.pipeline",
                    step = step.name(),
                    kind = ?err.kind(),
                    error = %err.detail(),
                    "step_failed"
                );
                steps.push(StepReport::new(
                    step.index(),
                    step.name(),
                    StepStatus::FailedFatal,
                    elapsed_ms,
                    json!({ "kind": err.kind(), "error": err.detail() }),
                ));
                Err(err)
            }
        }
    }

    /// Closes the session and removes the temp image, each at most once.
    async fn release(&self, job: &mut ConversionJob, options: &RunOptions) {
        if let Some(handle) = job.session.take() {
            if options.keep_session {
                println!("Session {} left open for inspection", handle.id());
                info!(target = "stager.pipeline", session = %handle.id(), "session_kept_open");
            } else {
                self.driver.close(&handle).await;
            }
        }
        if let Some(path) = job.temp_image.take() {
            if options.keep_temp {
                println!("Temp image kept at {}", path.display());
                info!(target = "stager.pipeline", path = %path.display(), "temp_image_kept");
            } else {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(target = "stager.pipeline", path = %path.display(), "temp_image_removed")
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!(target = "stager.pipeline", path = %path.display(), error = %err, "temp_image_remove_failed")
                    }
                }
            }
        }
    }

    async fn evaluate(
        &self,
        stage: &'static str,
        handle: &SessionHandle,
        script: &str,
    ) -> Result<String, PipelineError> {
        self.driver
            .evaluate(handle, script)
            .await
            .map_err(|err| PipelineError::driver(stage, err.to_string()))
    }

    async fn lookup_item(
        &self,
        job: &ConversionJob,
    ) -> Result<StepOutcome<LookupDecision>, PipelineError> {
        const STAGE: &str = Step::LookupItem.name();
        if job.stem.is_empty() {
            return Err(PipelineError::input(STAGE, "empty item identifier"));
        }
        let record = self
            .catalog
            .lookup(&job.item)
            .await
            .map_err(|err| PipelineError::catalog(STAGE, err.to_string()))?
            .ok_or_else(|| {
                PipelineError::input(STAGE, format!("item `{}` not found in catalog", job.item))
            })?;

        if let Some(reference) = record.asset_reference() {
            info!(target = "stager.pipeline", item = %job.item, reference = %reference, "already_converted");
            return Ok(StepOutcome::new(
                LookupDecision::AlreadyConverted(reference.to_string()),
                json!({ "asset_reference": reference, "skipped": true }),
            ));
        }

        let url = record.source_image().ok_or_else(|| {
            PipelineError::input(
                STAGE,
                format!("item `{}` has no Resized_Image or Image URL", job.item),
            )
        })?;
        Ok(StepOutcome::new(
            LookupDecision::Convert(url.to_string()),
            json!({ "image_url": url }),
        ))
    }

    async fn download_image(
        &self,
        job: &mut ConversionJob,
        url: &str,
    ) -> Result<StepOutcome<PathBuf>, PipelineError> {
        const STAGE: &str = Step::DownloadImage.name();
        tokio::fs::create_dir_all(&self.config.asset_dir)
            .await
            .map_err(|err| {
                PipelineError::fetch(
                    STAGE,
                    format!("creating {}: {err}", self.config.asset_dir.display()),
                )
            })?;
        let dest = self
            .config
            .asset_dir
            .join(format!("{}.{}", job.stem, fetch::image_extension(url)));
        let bytes = self
            .fetcher
            .fetch(url, &dest)
            .await
            .map_err(|err| PipelineError::fetch(STAGE, err.to_string()))?;
        job.temp_image = Some(dest.clone());
        Ok(StepOutcome::new(
            dest.clone(),
            json!({ "path": dest.display().to_string(), "bytes": bytes }),
        ))
    }

    async fn open_session(
        &self,
        job: &mut ConversionJob,
    ) -> Result<StepOutcome<SessionHandle>, PipelineError> {
        const STAGE: &str = Step::OpenSession.name();
        let handle = self
            .driver
            .open(&self.config.target_url)
            .await
            .map_err(|err| PipelineError::driver(STAGE, err.to_string()))?;
        job.session = Some(handle.clone());

        let ready = driver::await_ready(
            self.driver.as_ref(),
            &handle,
            self.clock.as_ref(),
            self.config.readiness,
        )
        .await;
        let mut outcome = StepOutcome::new(
            handle.clone(),
            json!({ "session": handle.id(), "ready": ready }),
        );
        if !ready {
            outcome.warn("page never reported ready; continuing");
        }
        Ok(outcome)
    }

    async fn upload_image(
        &self,
        handle: &SessionHandle,
        image: &Path,
    ) -> Result<StepOutcome<()>, PipelineError> {
        const STAGE: &str = Step::UploadImage.name();
        self.driver
            .upload_file(handle, image)
            .await
            .map_err(|err| PipelineError::driver(STAGE, err.to_string()))?;

        let driver = self.driver.as_ref();
        let script = remote::upload_received();
        let script = script.as_str();
        let (confirmed, checks) = poll_until(
            self.clock.as_ref(),
            self.config.upload_check,
            move || async move {
                matches!(driver.evaluate(handle, script).await.as_deref(), Ok("received"))
                    .then_some(())
            },
        )
        .await;

        let mut outcome = StepOutcome::new(
            (),
            json!({ "confirmed": confirmed.is_some(), "checks": checks }),
        );
        if confirmed.is_none() {
            outcome.warn("could not verify the upload preview, continuing");
        }
        Ok(outcome)
    }

    async fn configure_generation(
        &self,
        handle: &SessionHandle,
    ) -> Result<StepOutcome<()>, PipelineError> {
        const STAGE: &str = Step::ConfigureGeneration.name();
        let profile = &self.config.profile;
        let mut warnings = Vec::new();

        let quality =
            remote::parse_action(&self.evaluate(STAGE, handle, &profile.select_quality()).await?);
        if !matches!(quality, ActionOutcome::Done | ActionOutcome::AlreadySatisfied) {
            warnings.push(format!(
                "quality tier `{}` not selected ({quality:?})",
                profile.quality_tier
            ));
        }
        self.clock.sleep(SETTLE).await;

        let toggle =
            remote::parse_action(&self.evaluate(STAGE, handle, &profile.toggle_off()).await?);
        if toggle == ActionOutcome::Done {
            self.clock.sleep(SETTLE).await;
        }
        let state = remote::parse_feature_state(
            &self.evaluate(STAGE, handle, &profile.feature_state()).await?,
        );
        match &state {
            FeatureState::Off => {}
            FeatureState::On => warnings.push(format!(
                "`{}` is still on after toggling",
                profile.costly_feature
            )),
            FeatureState::NotFound => {
                warnings.push(format!("`{}` switch not found", profile.costly_feature))
            }
            FeatureState::Unknown(raw) => warnings.push(format!(
                "`{}` switch reported `{raw}`",
                profile.costly_feature
            )),
        }

        let mut outcome = StepOutcome::new(
            (),
            json!({
                "quality": format!("{quality:?}"),
                "toggle": format!("{toggle:?}"),
                "feature_state": format!("{state:?}"),
            }),
        );
        for warning in warnings {
            outcome.warn(warning);
        }
        Ok(outcome)
    }

    /// Cost gate: generation is only started when the button shows exactly the
    /// expected cost.
    async fn trigger_generation(
        &self,
        handle: &SessionHandle,
        dry_run: bool,
    ) -> Result<StepOutcome<String>, PipelineError> {
        const STAGE: &str = Step::TriggerGeneration.name();
        let profile = &self.config.profile;
        let expected = &self.config.expected_cost;

        let raw = self.evaluate(STAGE, handle, &profile.read_cost()).await?;
        let observed = match remote::parse_cost(&raw) {
            CostReading::Found(cost) => cost,
            CostReading::NotFound => {
                return Err(PipelineError::safety_gate(
                    STAGE,
                    format!("generation cost not found (expected {expected}); not generating"),
                ));
            }
        };
        if &observed != expected {
            return Err(PipelineError::safety_gate(
                STAGE,
                format!("observed cost {observed}, expected {expected}; not generating"),
            ));
        }

        if dry_run {
            info!(target = "stager.pipeline", cost = %observed, "dry_run_stop_before_generate");
            return Ok(StepOutcome::new(
                observed.clone(),
                json!({ "observed_cost": observed, "triggered": false }),
            ));
        }

        match remote::parse_action(&self.evaluate(STAGE, handle, &profile.click_generate()).await?)
        {
            ActionOutcome::Done => {}
            other => {
                return Err(PipelineError::driver(
                    STAGE,
                    format!("`{}` button not clickable ({other:?})", profile.generate_label),
                ));
            }
        }
        info!(target = "stager.pipeline", cost = %observed, "generation_triggered");
        Ok(StepOutcome::new(
            observed.clone(),
            json!({ "observed_cost": observed, "triggered": true }),
        ))
    }

    async fn await_generation(
        &self,
        handle: &SessionHandle,
    ) -> Result<StepOutcome<()>, PipelineError> {
        const STAGE: &str = Step::AwaitGeneration.name();
        let policy = self.config.generation;
        let outcome = poll::poll_generation(
            self.driver.as_ref(),
            handle,
            &self.config.profile.generation_status(),
            policy,
            self.clock.as_ref(),
        )
        .await;
        match outcome {
            PollOutcome::Done => Ok(StepOutcome::new((), json!({ "outcome": outcome }))),
            PollOutcome::Failed => Err(PipelineError::new(
                PipelineErrorKind::PollFailed,
                STAGE,
                "remote page reported a failed generation",
            )),
            PollOutcome::Pending | PollOutcome::TimedOut => Err(PipelineError::new(
                PipelineErrorKind::PollTimeout,
                STAGE,
                format!(
                    "no completion marker within {}s",
                    policy.timeout.as_secs()
                ),
            )),
        }
    }

    /// Generation has been paid for by now, so dialog hiccups only warn; the
    /// step fails only when no exported file turns up.
    async fn export_and_download(
        &self,
        handle: &SessionHandle,
        stem: &str,
    ) -> Result<StepOutcome<PathBuf>, PipelineError> {
        const STAGE: &str = Step::ExportAndDownload.name();
        let profile = &self.config.profile;
        let since = SystemTime::now()
            .checked_sub(Duration::from_secs(2))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut warnings = Vec::new();
        let actions = [
            ("export button", profile.open_export()),
            ("filename field", profile.set_export_filename(stem)),
            ("download button", profile.confirm_export()),
        ];
        for (what, script) in actions {
            match self.driver.evaluate(handle, &script).await {
                Ok(raw) => match remote::parse_action(&raw) {
                    ActionOutcome::Done => {}
                    other => warnings.push(format!("{what}: {other:?}")),
                },
                Err(err) => warnings.push(format!("{what}: {err}")),
            }
            self.clock.sleep(SETTLE).await;
        }

        let watch = ExportWatch {
            dirs: &self.config.download_dirs,
            stem,
            extension: ASSET_EXTENSION,
            min_bytes: self.config.min_asset_bytes,
            since,
        };
        let path = retriever::await_export(&watch, self.config.download, self.clock.as_ref())
            .await
            .map_err(|err| PipelineError::retrieval(STAGE, err.to_string()))?;

        let mut outcome =
            StepOutcome::new(path.clone(), json!({ "path": path.display().to_string() }));
        for warning in warnings {
            outcome.warn(warning);
        }
        Ok(outcome)
    }

    async fn persist_asset(
        &self,
        job: &mut ConversionJob,
        artifact: &Path,
        skip_catalog: bool,
    ) -> Result<StepOutcome<String>, PipelineError> {
        const STAGE: &str = Step::PersistAsset.name();
        let dest = retriever::persist(artifact, &self.config.asset_dir, &job.stem, ASSET_EXTENSION)
            .await
            .map_err(|err| PipelineError::persist(STAGE, err.to_string()))?;
        job.asset = Some(dest.clone());
        let reference = format!("{}.{}", job.stem, ASSET_EXTENSION);

        let mut warning = None;
        let updated = if skip_catalog {
            info!(target = "stager.catalog", item = %job.item, "catalog_write_skipped");
            None
        } else {
            match self
                .catalog
                .set_asset_reference(&job.item, &reference)
                .await
            {
                Ok(0) => {
                    warning = Some(format!(
                        "catalog update matched no rows for `{}`",
                        job.item
                    ));
                    Some(0)
                }
                Ok(count) => {
                    info!(target = "stager.catalog", item = %job.item, rows = count, "asset_reference_recorded");
                    Some(count)
                }
                Err(err) => {
                    warning = Some(format!(
                        "catalog write failed ({err}); asset is saved at {}",
                        dest.display()
                    ));
                    None
                }
            }
        };

        let mut outcome = StepOutcome::new(
            reference.clone(),
            json!({
                "path": dest.display().to_string(),
                "reference": reference,
                "catalog_rows_updated": updated,
            }),
        );
        if let Some(warning) = warning {
            outcome.warn(warning);
        }
        Ok(outcome)
    }

    async fn remote_cleanup(
        &self,
        handle: &SessionHandle,
        keep_remote: bool,
    ) -> Result<StepOutcome<()>, PipelineError> {
        if keep_remote {
            let mut outcome = StepOutcome::new((), json!({ "deleted": false }));
            outcome.warn("remote copy kept (--keep-remote)");
            return Ok(outcome);
        }
        let result = cleanup::delete_latest_generation(
            self.driver.as_ref(),
            handle,
            &self.config.profile,
            &self.config.listing_url,
            self.clock.as_ref(),
        )
        .await;
        let mut outcome = StepOutcome::new((), json!({ "deleted": result.is_ok() }));
        if let Err(err) = result {
            outcome.warn(format!("remote cleanup failed: {err}"));
        }
        Ok(outcome)
    }
}

#[derive(Debug, Error)]
#[error("step `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    Input,
    Catalog,
    Fetch,
    Driver,
    SafetyGate,
    PollTimeout,
    PollFailed,
    Retrieval,
    Persist,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Input, stage, message)
    }

    pub fn catalog(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Catalog, stage, message)
    }

    pub fn fetch(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Fetch, stage, message)
    }

    pub fn driver(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Driver, stage, message)
    }

    pub fn safety_gate(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::SafetyGate, stage, message)
    }

    pub fn retrieval(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Retrieval, stage, message)
    }

    pub fn persist(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Persist, stage, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StepOutcome<T> {
    pub value: T,
    pub output: Value,
    pub warning: Option<String>,
}

impl<T> StepOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self {
            value,
            output,
            warning: None,
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.warning = Some(match self.warning.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message,
        });
    }
}
