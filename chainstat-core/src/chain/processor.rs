use std::sync::Arc;

use tracing::{info, instrument};

use crate::agg;
use crate::agg::history::StoreHistory;
use crate::connect::ConnectionCache;
use crate::creds::CredentialsProvider;
use crate::types::{BuildId, ChainOutcome};

use super::walker;

/// Public entry point: one chain-status request from access check to
/// aggregate.
#[derive(Debug)]
pub struct ChainProcessor {
    cache: Arc<ConnectionCache>,
}

impl ChainProcessor {
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Summarize the chain rooted at `root` on `server_code`.
    ///
    /// Order of checks: access is evaluated before any handle is
    /// constructed; a missing root short-circuits to `ChainNotFound` with no
    /// partial aggregate. `branch`, when given, names the logical branch the
    /// caller asked about and overrides the branch recorded on the root
    /// build (chains triggered externally sometimes run under a resolved
    /// internal branch name).
    #[instrument(skip(self, creds), fields(server = %server_code, root = %root))]
    pub async fn chain_status(
        &self,
        root: BuildId,
        branch: Option<&str>,
        server_code: &str,
        creds: Arc<dyn CredentialsProvider>,
    ) -> crate::error::Result<ChainOutcome> {
        if !self.cache.has_access(server_code, creds.as_ref())? {
            info!("access denied");
            return Ok(ChainOutcome::AccessDenied);
        }

        let handle = self.cache.handle(server_code, creds).await?;
        let Some(expansion) = walker::expand(&handle, root).await? else {
            return Ok(ChainOutcome::ChainNotFound);
        };

        let history = StoreHistory::new(Arc::clone(handle.store()), Arc::clone(handle.interner()));
        let mut status = agg::summarize(
            &expansion,
            handle.interner(),
            handle.codes(),
            &history,
            &self.cache.config().aggregation,
        )
        .await?;
        if let Some(branch) = branch {
            status.branch = branch.to_string();
        }

        info!(
            builds = expansion.records.len(),
            failed_tests = status.failed_tests,
            failed_to_finish = status.failed_to_finish,
            "chain summarized"
        );
        Ok(ChainOutcome::Status(Box::new(status)))
    }
}
