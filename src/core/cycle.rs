//! One polling pass: fetch, record, evaluate, execute.

use crate::api::client::Downloader;
use crate::api::notifier::{Notice, Notifier};
use crate::core::config::Config;
use crate::core::error::ClientError;
use crate::metrics::collector::{Metrics, PassTotals};
use crate::models::action::{Action, Decision, Outcome};
use crate::models::sample::SpeedSample;
use crate::models::torrent::{FileEntry, TorrentSnapshot};
use crate::policy::engine::{PassInput, PolicyEngine};
use crate::policy::health::SAMPLE_WINDOW;
use crate::stores::sample_store::SampleStore;
use crate::utils::time::current_timestamp;
use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Summary of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub torrents: usize,
    pub decisions: usize,
    /// Decisions the downloader accepted
    pub executed: usize,
    pub failed: usize,
    /// Decisions dropped after an earlier call for the same torrent failed
    pub skipped: usize,
    pub admitted: usize,
    pub evicted: usize,
    pub partially_selected: usize,
    pub pending: usize,
    pub free_space: i64,
    pub dry_run: bool,
}

/// Log in, retrying up to `client.login_attempts` times.
///
/// A rejected password is not retried. Giving up is reported through the notifier.
pub async fn login_with_retries<D, N>(config: &Config, client: &mut D, notifier: &N) -> Result<()>
where
    D: Downloader,
    N: Notifier,
{
    let attempts = config.client.login_attempts;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match client.login().await {
            Ok(()) => {
                info!(downloader = %config.client.name, attempt = attempt, "Logged in");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    downloader = %config.client.name,
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Login failed"
                );
                let retryable = e.is_retryable();
                last_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt made".to_string());
    notifier
        .notify(Notice::general(
            &config.client.name,
            format!("login failed, check the credentials ({})", reason),
        ))
        .await;

    bail!(
        "Could not log in to {} at {}: {}",
        config.client.name,
        config.client.url,
        reason
    );
}

/// Run one pass against the downloader. Only a failed torrent listing aborts the pass.
pub async fn run_pass<D, S, N>(
    config: &Config,
    client: &D,
    store: &mut S,
    notifier: &N,
    metrics: &Metrics,
    dry_run: bool,
) -> Result<PassReport>
where
    D: Downloader,
    S: SampleStore,
    N: Notifier,
{
    let now = current_timestamp();

    let mut torrents = match client.list_torrents().await {
        Ok(torrents) => torrents,
        Err(e) => {
            metrics.record_failed_pass(now);
            return Err(e).context("Failed to list torrents");
        }
    };

    for torrent in &mut torrents {
        let category_domain = config
            .category(&torrent.category)
            .and_then(|category| category.domain.as_deref());
        torrent.resolve_domain(category_domain);
    }

    let samples = collect_samples(&torrents, store, now, dry_run);

    let mut transport_errors = 0;
    let mut files: HashMap<String, Vec<FileEntry>> = HashMap::new();
    for torrent in torrents.iter().filter(|t| t.state.is_paused()) {
        match client.list_files(&torrent.hash).await {
            Ok(list) => {
                files.insert(torrent.hash.clone(), list);
            }
            Err(e) => {
                transport_errors += 1;
                warn!(hash = %torrent.hash, error = %e, "Failed to list files, torrent stays paused");
            }
        }
    }

    let plan = PolicyEngine::new(config).evaluate(PassInput {
        torrents: &torrents,
        files: &files,
        samples: &samples,
        now,
    });

    let by_hash: HashMap<&str, &TorrentSnapshot> =
        torrents.iter().map(|t| (t.hash.as_str(), t)).collect();

    let mut report = PassReport {
        torrents: torrents.len(),
        decisions: plan.decisions.len(),
        admitted: plan.count(Outcome::Admitted),
        evicted: plan.count(Outcome::Evicted),
        partially_selected: plan.count(Outcome::PartiallySelected),
        pending: plan.count(Outcome::Pending),
        free_space: plan.state.free_space,
        dry_run,
        ..Default::default()
    };
    let mut totals = PassTotals {
        free_space: plan.state.free_space,
        ..Default::default()
    };
    let mut failed_hashes: HashSet<&str> = HashSet::new();

    for decision in &plan.decisions {
        let blocked = failed_hashes.contains(decision.hash.as_str())
            || decision
                .reason
                .beneficiary()
                .is_some_and(|hash| failed_hashes.contains(hash));
        if blocked {
            debug!(hash = %decision.hash, action = decision.action.name(), "Skipped after earlier failure");
            report.skipped += 1;
            continue;
        }

        if dry_run {
            info!(
                hash = %decision.hash,
                name = %decision.name,
                action = decision.action.name(),
                reason = %decision.reason,
                "Dry run, not executed"
            );
            count_action(&mut totals, &decision.action);
            continue;
        }

        if decision.action.is_delete() {
            if let Some(torrent) = by_hash.get(decision.hash.as_str()) {
                notifier
                    .notify(Notice::torrent(
                        &config.client.name,
                        torrent,
                        decision.reason.to_string(),
                    ))
                    .await;
            }
        }

        match execute(client, decision).await {
            Ok(()) => {
                report.executed += 1;
                count_action(&mut totals, &decision.action);
            }
            Err(e) => {
                warn!(
                    hash = %decision.hash,
                    name = %decision.name,
                    action = decision.action.name(),
                    error = %e,
                    "Action failed, remaining actions for this torrent skipped"
                );
                report.failed += 1;
                transport_errors += 1;
                failed_hashes.insert(decision.hash.as_str());
                // The admission this deletion made room for no longer fits
                if let Some(beneficiary) = decision.reason.beneficiary() {
                    failed_hashes.insert(beneficiary);
                }
            }
        }
    }

    totals.decisions = plan.decisions.len() as u64;
    totals.transport_errors = transport_errors;
    metrics.record_pass(totals, now);

    info!(
        downloader = %config.client.name,
        torrents = report.torrents,
        decisions = report.decisions,
        executed = report.executed,
        failed = report.failed,
        admitted = report.admitted,
        evicted = report.evicted,
        pending = report.pending,
        free_space = report.free_space,
        dry_run = dry_run,
        "Pass complete"
    );

    Ok(report)
}

/// Record a sample for every active torrent, then read back the trailing windows.
fn collect_samples<S: SampleStore>(
    torrents: &[TorrentSnapshot],
    store: &mut S,
    now: i64,
    dry_run: bool,
) -> HashMap<String, Vec<SpeedSample>> {
    let mut samples = HashMap::new();

    for torrent in torrents.iter().filter(|t| t.state.is_active()) {
        if !dry_run {
            let sample = SpeedSample::from_snapshot(torrent, now);
            if let Err(e) = store.append(&torrent.hash, torrent, sample) {
                warn!(hash = %torrent.hash, error = %e, "Failed to record sample");
            }
        }

        match store.last_n(&torrent.hash, SAMPLE_WINDOW) {
            Ok(window) => {
                samples.insert(torrent.hash.clone(), window);
            }
            Err(e) => warn!(hash = %torrent.hash, error = %e, "Failed to read samples"),
        }
    }

    samples
}

async fn execute<D: Downloader>(client: &D, decision: &Decision) -> Result<(), ClientError> {
    let hash = decision.hash.as_str();
    match &decision.action {
        Action::Resume => client.resume(hash).await,
        Action::Pause => client.pause(hash).await,
        Action::Delete { delete_files } => client.delete(hash, *delete_files).await,
        Action::SetFilePriority { indices, priority } => {
            client.set_file_priority(hash, indices, *priority).await
        }
    }
}

fn count_action(totals: &mut PassTotals, action: &Action) {
    match action {
        Action::Resume => totals.admissions += 1,
        Action::Delete { .. } => totals.evictions += 1,
        Action::SetFilePriority { .. } => totals.partial_selections += 1,
        Action::Pause => {}
    }
}
