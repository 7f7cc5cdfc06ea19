use crate::storage::constants::MAX_LIST_RESULTS;
use crate::storage::error::{invalid_argument, StorageResult};
use crate::storage::reference::StorageReference;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Page size, `1..=1000`. Backends pick their own default when unset.
    pub max_results: Option<u32>,
    /// Opaque token from a previous [`ListResult::next_page_token`].
    pub page_token: Option<String>,
}

impl ListOptions {
    pub fn with_max_results(max_results: u32) -> Self {
        Self {
            max_results: Some(max_results),
            page_token: None,
        }
    }

    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    pub(crate) fn validate(&self) -> StorageResult<()> {
        match self.max_results {
            Some(max) if max == 0 || max > MAX_LIST_RESULTS => Err(invalid_argument(format!(
                "max_results must be between 1 and {MAX_LIST_RESULTS}, got {max}"
            ))),
            _ => Ok(()),
        }
    }
}

/// One page of a listing. No `next_page_token` means this is the final page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListResult {
    pub prefixes: Vec<StorageReference>,
    pub items: Vec<StorageReference>,
    pub next_page_token: Option<String>,
}

impl ListResult {
    pub(crate) fn extend(&mut self, page: ListResult) {
        self.prefixes.extend(page.prefixes);
        self.items.extend(page.items);
    }
}
