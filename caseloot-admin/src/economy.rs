//! Case economy admin endpoints (§4.9): preview a single case's validation
//! report, or reload the whole config file from disk (§4.6).

use std::{path::PathBuf, sync::Arc};

use caseloot_cases::{load_file, CasesRegistry, CasesSnapshot};
use caseloot_types::CaseValidationReport;

use crate::error::AdminError;

pub struct EconomyService {
    cases: Arc<CasesRegistry>,
    cases_path: PathBuf,
}

impl EconomyService {
    pub fn new(cases: Arc<CasesRegistry>, cases_path: PathBuf) -> Self {
        Self { cases, cases_path }
    }

    pub fn preview(&self, case_id: &str) -> Result<CaseValidationReport, AdminError> {
        let snapshot = self.cases.load();
        snapshot.report_for(case_id).cloned().ok_or_else(|| AdminError::UnknownCase(case_id.to_string()))
    }

    /// Re-reads the case config file and swaps the registry's snapshot. A
    /// case that now fails validation is dropped from the new snapshot, but
    /// cases that still pass are not rolled back (§4.6).
    pub async fn reload(&self) -> Result<(), AdminError> {
        let root = load_file(&self.cases_path).await?;
        self.cases.reload(CasesSnapshot::from_root(root));
        Ok(())
    }
}
