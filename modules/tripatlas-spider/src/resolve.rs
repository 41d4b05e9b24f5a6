//! Seed-URL resolution through the portal search box.
//!
//! For each bare city name: drive the portal search, capture the URL of the
//! popup result tab, derive the listing URL from it, checkpoint, move on.
//! The derived artifact feeds the next pipeline stage as its seed input; on
//! resume, entries already resolved by an earlier pass are kept.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};

use tripatlas_common::{Outcome, PipelinePolicy, Seed};

use crate::checkpoint::CheckpointStore;
use crate::retry::{jitter, with_retry, RetryPolicy};
use crate::seeds::{load_url_seeds, write_url_seeds};
use crate::sources::ResolveSpec;
use crate::traits::{BrowserSession, SessionProvider};

/// Bounded wait for the site to open its search-result tab.
const POPUP_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn resolve_seeds(
    provider: Arc<dyn SessionProvider>,
    spec: &ResolveSpec,
    names: &[Seed],
    data_dir: &Path,
    out_path: &Path,
    policy: &PipelinePolicy,
    shutdown: Arc<AtomicBool>,
) -> Result<usize> {
    let checkpoints =
        CheckpointStore::new(data_dir.join(format!("{}_progress.json", spec.name)));
    let mut checkpoint = checkpoints.load();

    // Keep what an earlier partial pass already resolved.
    let mut resolved: Vec<(String, String)> = if out_path.exists() {
        load_url_seeds(out_path, spec.derived_field)
            .map(|seeds| {
                seeds
                    .into_iter()
                    .filter_map(|s| s.url.map(|u| (s.name, u)))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let session = provider
        .acquire()
        .await
        .map_err(|e| anyhow!("acquiring browser session: {e}"))?;
    let retry = RetryPolicy::from_pipeline(policy);
    let mut since_rotate = 0u32;
    let mut failures = 0u64;

    for (idx, seed) in names.iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown requested, stopping seed resolution");
            break;
        }
        if idx < checkpoint.resume_index || checkpoint.is_done(&seed.name) {
            continue;
        }

        if since_rotate >= spec.rotate_every {
            info!("Rotating browser session");
            provider.recycle().await;
            since_rotate = 0;
        }
        since_rotate += 1;

        let provider_hook = Arc::clone(&provider);
        let outcome = with_retry(
            &retry,
            &seed.name,
            || resolve_one(session.as_ref(), spec, &seed.name),
            || {
                let provider = Arc::clone(&provider_hook);
                async move { provider.recycle().await }
            },
        )
        .await;

        match outcome {
            Outcome::Ok(url) => {
                info!(city = %seed.name, url = %url, "Resolved listing URL");
                if !resolved.iter().any(|(name, _)| name == &seed.name) {
                    resolved.push((seed.name.clone(), url));
                }
            }
            Outcome::Empty => {
                warn!(city = %seed.name, "Search produced no result tab");
            }
            Outcome::Retryable(e) => {
                failures += 1;
                error!(city = %seed.name, "Resolution failed, skipping: {e:#}");
            }
            Outcome::Fatal(e) => {
                checkpoints.save(&checkpoint)?;
                provider.release().await;
                return Err(e.context(format!("fatal error resolving {}", seed.name)));
            }
        }

        checkpoint.complete(idx, &seed.name);
        checkpoints.save(&checkpoint)?;
        tokio::time::sleep(jitter(policy.seed_delay_secs)).await;
    }

    provider.release().await;
    write_url_seeds(out_path, &resolved, spec.derived_field)?;
    info!(
        resolved = resolved.len(),
        failures,
        artifact = %out_path.display(),
        "Seed resolution complete"
    );
    Ok(resolved.len())
}

async fn resolve_one(
    session: &dyn BrowserSession,
    spec: &ResolveSpec,
    city: &str,
) -> Outcome<String> {
    if let Err(e) = session.navigate(spec.portal_url).await {
        return transient(e);
    }

    let query = format!("{city}{}", spec.query_suffix);
    match session.type_into(&spec.search_box, &query).await {
        Ok(true) => {}
        Ok(false) => return Outcome::Retryable(anyhow!("search box not present")),
        Err(e) => return transient(e),
    }
    match session.click(&spec.search_button).await {
        Ok(true) => {}
        Ok(false) => return Outcome::Retryable(anyhow!("search button not present")),
        Err(e) => return transient(e),
    }

    match session.capture_popup(spec.popup_pattern, POPUP_TIMEOUT).await {
        Ok(Some(url)) => Outcome::Ok((spec.derive)(&url)),
        Ok(None) => Outcome::Retryable(anyhow!(
            "no result tab matching {} appeared",
            spec.popup_pattern
        )),
        Err(e) => transient(e),
    }
}

fn transient<T>(e: chromium_client::SessionError) -> Outcome<T> {
    if e.is_transient() {
        Outcome::Retryable(anyhow!(e))
    } else {
        Outcome::Fatal(anyhow!(e))
    }
}
