//! Background draft generation: one completion call, recovered into a
//! structured document and written to the job store.

use std::sync::Arc;

use grantscribe_engine::{Job, JobId, JobStore, extract_or_placeholder};
use snafu::ResultExt;
use tokio::task::JoinHandle;

use crate::provider::{GenerationRequest, JobStoreSnafu, LlmProvider, ProviderResult};

/// Instruction asking for a JSON object with exactly `fields` as keys.
pub fn draft_preamble<S>(fields: &[S]) -> String
where
    S: AsRef<str>,
{
    let keys = fields
        .iter()
        .map(|field| format!("\"{}\"", field.as_ref()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are drafting sections of a grant proposal. Respond with a single JSON object \
         whose keys are {keys}. Each value is the full text of that section."
    )
}

/// Runs one job to its terminal record. Provider failures become an
/// upstream error on the job; only store failures surface as `Err`.
pub async fn run_generation_job(
    provider: &dyn LlmProvider,
    store: &dyn JobStore,
    job_id: JobId,
    request: GenerationRequest,
    fields: &[String],
    excerpt_chars: usize,
) -> ProviderResult<Job> {
    let model_id = request.model_id.clone();
    let reply = provider
        .complete(request)
        .await
        .map_err(|error| error.to_string());
    match reply {
        Ok(text) => {
            let document = extract_or_placeholder(&text, fields, excerpt_chars);
            store
                .complete_job(job_id, document)
                .await
                .context(JobStoreSnafu {
                    stage: "generation-complete-job",
                })
        }
        Err(message) => {
            tracing::warn!(
                job_id = %job_id,
                model_id = %model_id,
                error = %message,
                "generation call failed"
            );
            store
                .fail_job(job_id, message)
                .await
                .context(JobStoreSnafu {
                    stage: "generation-fail-job",
                })
        }
    }
}

pub struct DispatchedJob {
    pub job_id: JobId,
    pub worker: JoinHandle<ProviderResult<Job>>,
}

/// Records a pending job, then runs the generation on a spawned task.
pub async fn dispatch_generation_job(
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn JobStore>,
    request: GenerationRequest,
    fields: Vec<String>,
    excerpt_chars: usize,
) -> ProviderResult<DispatchedJob> {
    let job_id = JobId::new_v7();
    store.create_job(job_id).await.context(JobStoreSnafu {
        stage: "generation-create-job",
    })?;
    tracing::info!(job_id = %job_id, field_count = fields.len(), "dispatched generation job");

    let worker = tokio::spawn(async move {
        run_generation_job(
            provider.as_ref(),
            store.as_ref(),
            job_id,
            request,
            &fields,
            excerpt_chars,
        )
        .await
    });

    Ok(DispatchedJob { job_id, worker })
}
