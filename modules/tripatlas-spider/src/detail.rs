//! Detail-page extraction in a short-lived sub-context.
//!
//! Every field lookup is independently bounded and falls back to a sentinel,
//! so one missing block never costs the whole record. The sub-context is
//! closed before this module returns, whatever happened inside it.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use chromium_client::SessionError;
use tripatlas_common::text::clean_field;
use tripatlas_common::PipelinePolicy;

use crate::sources::DetailSpec;
use crate::traits::{BrowserSession, DetailContext};

/// Sentinel stored when a detail field cannot be read.
pub const NO_INFO: &str = "无信息";

/// Open a sub-context on `url`, read the module's detail fields, close the
/// sub-context. The close runs on the error path too — the session's open
/// context count is the same after this call as before it.
pub async fn extract_detail(
    session: &dyn BrowserSession,
    url: &str,
    spec: &DetailSpec,
    policy: &PipelinePolicy,
) -> Result<BTreeMap<String, String>, SessionError> {
    let ctx = session.open_context(url).await?;
    let fields = read_fields(ctx.as_ref(), spec, policy).await;
    ctx.close().await;
    Ok(fields)
}

/// Read each declared field with its own bounded lookup. Read errors default
/// the field rather than failing the record; a dead sub-context simply yields
/// a record full of sentinels, which ingest treats like any other.
async fn read_fields(
    ctx: &dyn DetailContext,
    spec: &DetailSpec,
    policy: &PipelinePolicy,
) -> BTreeMap<String, String> {
    let marker_timeout = Duration::from_secs(policy.detail_marker_timeout_secs);
    let field_timeout = Duration::from_secs(policy.detail_field_timeout_secs);

    let mut out = BTreeMap::new();

    let marker_present = match ctx.wait_for(&spec.marker, marker_timeout).await {
        Ok(present) => present,
        Err(e) => {
            warn!(marker = %spec.marker, "Detail marker wait failed: {e}");
            false
        }
    };

    if !marker_present {
        // No point in per-field waits on a page that never rendered.
        for (key, _) in spec.fields {
            out.insert((*key).to_string(), NO_INFO.to_string());
        }
        return out;
    }

    for (key, loc) in spec.fields {
        let value = match ctx.read_text(loc, field_timeout).await {
            Ok(Some(text)) => {
                let cleaned = clean_field(key, &text);
                if cleaned.is_empty() {
                    NO_INFO.to_string()
                } else {
                    cleaned
                }
            }
            Ok(None) => NO_INFO.to_string(),
            Err(e) => {
                warn!(field = key, "Detail field read failed: {e}");
                NO_INFO.to_string()
            }
        };
        out.insert((*key).to_string(), value);
    }

    out
}
