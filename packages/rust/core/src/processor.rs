//! One end-to-end enrichment run: load → scrape → dedup → describe → embed → persist.
//!
//! [`NodeProcessor::run`] always ends in [`Stage::Persisted`] or
//! [`Stage::Failed`]. A fatal error at any stage triggers exactly one
//! mark-error call against the node the run was working on; non-fatal
//! errors (dedup search, embedding) are logged and the run continues.

use std::time::Instant;

use chrono::Utc;
use enricher_client::CallStatsSnapshot;
use enricher_scrape::{Profile, detect_changes, scrape};
use enricher_shared::{
    EnricherError, InvocationEvent, InvocationResponse, Node, NodeId, NodePatch, NodeStatus,
    ResponseBody, Result, RunDetails, RunId, WebpageId,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::dedup::{DedupOutcome, DedupResolver};
use crate::describe::{Described, DescriptionGenerator};
use crate::embedding::EmbeddingMaintainer;
use crate::fetcher::ContentFetcher;
use crate::services::Services;

/// Fields cleared when a node completes.
const ERROR_FIELDS: &[&str] = &["error", "errorMessage", "errorAt"];

/// Message of a run that found nothing to regenerate.
pub const UP_TO_DATE_MESSAGE: &str = "Node already up to date";

/// Message of a successful run.
pub const SUCCESS_MESSAGE: &str = "Node processed successfully";

/// Pipeline position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Loaded,
    Deduped,
    Described,
    Embedded,
    Persisted,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Loaded => "loaded",
            Self::Deduped => "deduped",
            Self::Described => "described",
            Self::Embedded => "embedded",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback for reporting run progress.
pub trait PipelineObserver: Send + Sync {
    /// Called when the run enters `stage`.
    fn stage(&self, stage: Stage);
    /// Called when the run moves to another node, e.g. the canonical record
    /// a duplicate was folded into.
    fn retarget(&self, node_id: &NodeId);
    /// Called when a non-fatal error degrades the run.
    fn degraded(&self, error: &EnricherError);
    /// Called once with the final outcome.
    fn done(&self, outcome: &RunOutcome);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn stage(&self, _stage: Stage) {}
    fn retarget(&self, _node_id: &NodeId) {}
    fn degraded(&self, _error: &EnricherError) {}
    fn done(&self, _outcome: &RunOutcome) {}
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub stage: Stage,
    /// Last stage reached before failing.
    pub failed_at: Option<Stage>,
    pub body: ResponseBody,
    pub elapsed_ms: u64,
    pub calls: CallStatsSnapshot,
}

impl RunOutcome {
    pub fn response(&self) -> InvocationResponse {
        InvocationResponse::completed(self.body.clone())
    }
}

/// Mutable bookkeeping of a run in flight.
struct Progress<'o> {
    stage: Stage,
    /// Node a failure is reported against; moves to the canonical node
    /// after dedup.
    target: NodeId,
    degraded: Vec<String>,
    observer: &'o dyn PipelineObserver,
}

impl Progress<'_> {
    fn advance(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "stage");
        self.stage = stage;
        self.observer.stage(stage);
    }

    fn degrade(&mut self, error: EnricherError) {
        warn!(stage = %self.stage, error = %error, "continuing without this step");
        self.observer.degraded(&error);
        self.degraded.push(error.to_string());
    }
}

/// Orchestrates the enrichment components for one node.
pub struct NodeProcessor<'a> {
    services: &'a Services,
    observer: &'a dyn PipelineObserver,
}

impl<'a> NodeProcessor<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self {
            services,
            observer: &SilentObserver,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn PipelineObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Handle a raw invocation event.
    ///
    /// A payload without ids answers 500; every other outcome, including a
    /// failed run, answers 200 with `success` set accordingly.
    pub async fn handle_event(&self, event: &Value) -> InvocationResponse {
        match InvocationEvent::from_value(event) {
            Ok(event) => self.run(&event).await.response(),
            Err(e) => {
                warn!(error = %e, "rejecting malformed event");
                let message = match e {
                    EnricherError::Payload(message) => message,
                    other => other.to_string(),
                };
                InvocationResponse::malformed(event, message)
            }
        }
    }

    /// Run the pipeline for one node.
    pub async fn run(&self, event: &InvocationEvent) -> RunOutcome {
        let run_id = RunId::new();
        let span = info_span!(
            "run",
            run_id = %run_id,
            node_id = %event.node_id,
            user_id = %event.user_id
        );
        self.run_inner(run_id, event).instrument(span).await
    }

    async fn run_inner(&self, run_id: RunId, event: &InvocationEvent) -> RunOutcome {
        let started = Instant::now();
        info!("run started");

        let mut progress = Progress {
            stage: Stage::Start,
            target: event.node_id.clone(),
            degraded: Vec::new(),
            observer: self.observer,
        };

        let (body, failed_at) = match self.execute(event, &mut progress).await {
            Ok(body) => (body, None),
            Err(e) => {
                let failed_at = progress.stage;
                error!(stage = %failed_at, error = %e, "run failed");
                progress.advance(Stage::Failed);
                let message = e.to_string();
                // Failure to record the failure is logged; the caller still
                // gets the structured response.
                let _ = self.mark_failed(&progress.target, &message).await;
                let body = ResponseBody {
                    node_id: event.node_id.to_string(),
                    user_id: event.user_id.to_string(),
                    success: false,
                    message,
                    effective_node_id: (progress.target != event.node_id)
                        .then(|| progress.target.clone()),
                    ..Default::default()
                };
                (body, Some(failed_at))
            }
        };

        let outcome = RunOutcome {
            run_id,
            stage: progress.stage,
            failed_at,
            body,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            calls: self.services.stats.snapshot(),
        };
        info!(
            stage = %outcome.stage,
            elapsed_ms = outcome.elapsed_ms,
            calls = outcome.calls.calls,
            retries = outcome.calls.retries,
            failures = outcome.calls.failures,
            latency_ms = outcome.calls.total_latency_ms,
            "run finished"
        );
        self.observer.done(&outcome);
        outcome
    }

    /// Record a failure on `node_id`.
    ///
    /// Used by the run itself and by callers that abandon a run, e.g. on
    /// timeout, so the node never stays `processing`.
    pub async fn mark_failed(&self, node_id: &NodeId, message: &str) -> Result<()> {
        match self.services.api.mark_error(node_id, message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(node_id = %node_id, error = %e, "failed to mark node as error");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        event: &InvocationEvent,
        progress: &mut Progress<'_>,
    ) -> Result<ResponseBody> {
        let api = &self.services.api;

        // Start → Loaded
        let mut node = api.get_node(&event.node_id, &event.user_id).await?;
        if node.user_id.is_empty() {
            node.user_id = event.user_id.clone();
        }
        let loaded_status = node.status;
        api.update_node(&node.id, &NodePatch::status(NodeStatus::Processing))
            .await?;

        let profile = self.load_profile(&node).await?;
        if node.profile_url.is_none() {
            node.profile_url = profile.profile_url.clone();
        }
        profile.check_not_empty()?;
        progress.advance(Stage::Loaded);

        // Loaded → Deduped
        let dedup = match DedupResolver::new(api).resolve(&node).await {
            Ok(outcome) => outcome,
            Err(e) if !e.is_fatal() => {
                progress.degrade(e);
                DedupOutcome::unchanged(&node)
            }
            Err(e) => return Err(e),
        };
        let canonical = dedup.canonical.clone();
        progress.target = canonical.id.clone();
        progress.advance(Stage::Deduped);

        let merged_from = (canonical.id != node.id).then(|| node.id.clone());
        if merged_from.is_some() {
            self.observer.retarget(&canonical.id);
        }

        // A merge rewrites the canonical's fields, so it always regenerates.
        let changes = detect_changes(&profile, &canonical);
        if !dedup.is_deduplicated()
            && !changes.has_changes()
            && loaded_status != NodeStatus::Error
        {
            info!(node_id = %canonical.id, "no profile changes, skipping generation");
            api.update_node(&canonical.id, &NodePatch::status(NodeStatus::Complete))
                .await?;
            progress.advance(Stage::Persisted);
            let mut body = response_body(event, &dedup, merged_from, Vec::new(), Vec::new(), progress);
            body.skipped = Some(true);
            body.message = UP_TO_DATE_MESSAGE.into();
            return Ok(body);
        }
        debug!(changed = ?changes.changed_fields, "profile changed");

        // Deduped → Described
        let described = DescriptionGenerator::new(api, &self.services.generator)
            .generate(&canonical, &profile)
            .await?;
        progress.advance(Stage::Described);

        // Described → Embedded
        let maintainer = EmbeddingMaintainer::new(
            &self.services.vectors,
            &self.services.cache,
            &self.services.embedder,
        );
        if let Err(e) = maintainer
            .upsert(&canonical, &described.generated.skills)
            .await
        {
            progress.degrade(e);
        }
        progress.advance(Stage::Embedded);

        // Embedded → Persisted
        let patch = completion_patch(&profile, &described)?;
        api.update_node(&canonical.id, &patch).await?;
        progress.advance(Stage::Persisted);
        info!(node_id = %canonical.id, "node persisted");

        Ok(response_body(
            event,
            &dedup,
            merged_from,
            described.webpage_ids,
            changes.changed_fields,
            progress,
        ))
    }

    /// Profile of `node`: its own fields when API-scraped, else its HTML.
    async fn load_profile(&self, node: &Node) -> Result<Profile> {
        if node.api_scraped {
            debug!("API-scraped node, using record fields");
            return Ok(Profile::from_node(node));
        }
        let (html, source) = ContentFetcher::new(&self.services.objects)
            .fetch(node)
            .await?;
        debug!(?source, "content resolved");
        scrape(&html)
    }
}

fn response_body(
    event: &InvocationEvent,
    dedup: &DedupOutcome,
    merged_from: Option<NodeId>,
    webpage_ids: Vec<WebpageId>,
    changed_fields: Vec<String>,
    progress: &Progress<'_>,
) -> ResponseBody {
    let details = RunDetails {
        changed_fields,
        merged_from_node_id: merged_from,
        note: (!progress.degraded.is_empty())
            .then(|| format!("degraded: {}", progress.degraded.join("; "))),
    };
    ResponseBody {
        node_id: event.node_id.to_string(),
        user_id: event.user_id.to_string(),
        success: true,
        message: SUCCESS_MESSAGE.into(),
        effective_node_id: Some(dedup.canonical.id.clone()),
        deduplicated: Some(dedup.is_deduplicated()),
        skipped: None,
        webpage_ids,
        details: (!details.is_empty()).then_some(details),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| EnricherError::parse(format!("failed to encode field: {e}")))
}

/// Node update written when a run completes.
fn completion_patch(profile: &Profile, described: &Described) -> Result<NodePatch> {
    let generated = &described.generated;
    let mut patch = NodePatch::status(NodeStatus::Complete);
    patch
        .set_field("description", Value::String(generated.description.clone()))
        .set_field("skills", encode(&generated.skills)?)
        .set_field("organizations", encode(&generated.organizations)?)
        .set_field("descriptionGenerated", Value::Bool(true))
        .set_field("descriptionGeneratedAt", Value::String(Utc::now().to_rfc3339()));

    if !described.work_experience.is_empty() {
        patch.set_field("workExperience", encode(&described.work_experience)?);
    }
    if !profile.education.is_empty() {
        patch.set_field("education", encode(&profile.education)?);
    }
    for (field, value) in [
        ("name", &profile.name),
        ("about", &profile.about),
        ("bio", &profile.bio),
        ("linkedinHeadline", &profile.headline),
        ("currentLocation", &profile.location),
        ("profileUrl", &profile.profile_url),
    ] {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            patch.set_field(field, Value::String(value.to_string()));
        }
    }
    for field in ERROR_FIELDS {
        patch.unset_field(*field);
    }
    Ok(patch)
}
