use super::{FetchOptions, Fetcher};
use crate::pkg::cache::FetchResult;
use crate::pkg::error::PkgError;
use crate::pkg::ident::Locator;
use crate::pkg::resolver::WORKSPACE_PROTOCOL;
use async_trait::async_trait;

/// Workspaces are served in place from the project tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceFetcher;

#[async_trait]
impl Fetcher for WorkspaceFetcher {
    fn supports(&self, locator: &Locator, _opts: &FetchOptions) -> bool {
        locator.reference().starts_with(WORKSPACE_PROTOCOL)
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        let relative = &locator.reference()[WORKSPACE_PROTOCOL.len()..];
        let cwd = opts.project_cwd.join(relative);

        if !cwd.is_dir() {
            return Err(PkgError::fetch_failed(format!(
                "{locator}: workspace directory {} does not exist",
                cwd.display()
            )));
        }
        Ok(FetchResult::from_directory(&cwd))
    }
}
