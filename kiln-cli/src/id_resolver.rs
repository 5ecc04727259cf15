//! Job id resolution
//!
//! Lets users type a short, unambiguous prefix instead of a full job id.

use anyhow::{Context, Result, anyhow};
use kiln_client::OrchestratorClient;
use kiln_core::dto::job::JobSummary;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job id or prefix to a full UUID
///
/// Full ids are returned as-is without a request. Prefixes are matched
/// case-insensitively against `GET /jobs`.
pub async fn resolve_job_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(&jobs, &id_or_prefix.as_str())
}

fn match_prefix(jobs: &[JobSummary], prefix: &str) -> Result<Uuid> {
    let prefix = prefix.to_lowercase();
    let matches: Vec<_> = jobs
        .iter()
        .filter(|j| j.id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [only] => Ok(only.id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|j| j.id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
