//! C8: case config loader, validator, and hot-reloadable snapshot (§4.6).

use std::{path::Path, sync::Arc};

use arc_swap::ArcSwap;
use caseloot_types::{CasePublicView, CaseValidationReport, CasesRoot};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read case config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse case config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A loaded-and-validated snapshot: only cases that passed validation are
/// exposed, but the full validation report (including failures) is kept
/// alongside for the admin preview endpoint.
#[derive(Debug, Clone, Default)]
pub struct CasesSnapshot {
    root: CasesRoot,
    reports: Vec<CaseValidationReport>,
}

impl CasesSnapshot {
    pub fn from_root(root: CasesRoot) -> Self {
        let reports = root.cases.iter().map(|c| c.validate()).collect();
        Self { root, reports }
    }

    pub fn reports(&self) -> &[CaseValidationReport] {
        &self.reports
    }

    pub fn report_for(&self, case_id: &str) -> Option<&CaseValidationReport> {
        self.reports.iter().find(|r| r.case_id == case_id)
    }

    /// Public view of every case that passed validation.
    pub fn public_cases(&self) -> Vec<CasePublicView> {
        self.root
            .cases
            .iter()
            .filter(|c| self.report_for(&c.id).is_some_and(|r| r.is_ok))
            .map(|c| c.public_view())
            .collect()
    }

    /// Full internal view of a single case, if it passed validation.
    pub fn internal_case(&self, case_id: &str) -> Option<&caseloot_types::CaseConfig> {
        let case = self.root.cases.iter().find(|c| c.id == case_id)?;
        self.report_for(case_id).filter(|r| r.is_ok)?;
        Some(case)
    }
}

/// Thread-safe, copy-on-write snapshot of the current case economics,
/// exchanged on reload via an atomic pointer swap (§5): in-flight requests
/// keep reading the snapshot they observed on entry.
#[derive(Default)]
pub struct CasesRegistry {
    current: ArcSwap<CasesSnapshot>,
}

impl CasesRegistry {
    pub fn new(snapshot: CasesSnapshot) -> Self {
        Self { current: ArcSwap::new(Arc::new(snapshot)) }
    }

    pub fn load(&self) -> Arc<CasesSnapshot> {
        self.current.load_full()
    }

    /// Reload always swaps to the newly parsed snapshot; cases that fail
    /// validation are excluded from the public/internal views but do not
    /// roll back the whole reload (§4.6).
    pub fn reload(&self, snapshot: CasesSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

/// Parse a YAML case-config file into a root, without validating.
pub async fn load_file(path: impl AsRef<Path>) -> Result<CasesRoot, LoadError> {
    let text = tokio::fs::read_to_string(path).await?;
    let root: CasesRoot = serde_yaml::from_str(&text)?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use caseloot_types::{CaseConfig, PrizeItem, PrizeKind};

    use super::*;

    fn valid_case(id: &str) -> CaseConfig {
        CaseConfig {
            id: id.into(),
            title: "Test Case".into(),
            price_stars: 100,
            rtp_ext_min: 0.0,
            rtp_ext_max: 1.0,
            jackpot_alpha: 0.05,
            items: vec![PrizeItem {
                id: "gift-a".into(),
                kind: PrizeKind::Gift,
                star_cost: Some(50),
                probability_ppm: 500_000,
            }],
        }
    }

    fn broken_case(id: &str) -> CaseConfig {
        CaseConfig {
            id: id.into(),
            title: "Broken Case".into(),
            price_stars: 100,
            rtp_ext_min: 0.0,
            rtp_ext_max: 0.1,
            jackpot_alpha: 0.05,
            items: vec![PrizeItem {
                id: "gift-a".into(),
                kind: PrizeKind::Gift,
                star_cost: Some(5000),
                probability_ppm: 500_000,
            }],
        }
    }

    #[test]
    fn failed_case_is_excluded_but_does_not_roll_back_others() {
        let root = CasesRoot { cases: vec![valid_case("good"), broken_case("bad")] };
        let snapshot = CasesSnapshot::from_root(root);

        assert!(snapshot.report_for("good").unwrap().is_ok);
        assert!(!snapshot.report_for("bad").unwrap().is_ok);

        let public = snapshot.public_cases();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].id, "good");
    }

    #[test]
    fn registry_reload_swaps_snapshot_atomically() {
        let registry = CasesRegistry::new(CasesSnapshot::from_root(CasesRoot { cases: vec![valid_case("v1")] }));
        let observed = registry.load();
        assert_eq!(observed.public_cases()[0].id, "v1");

        registry.reload(CasesSnapshot::from_root(CasesRoot { cases: vec![valid_case("v2")] }));
        // the handle obtained before reload still observes the old snapshot.
        assert_eq!(observed.public_cases()[0].id, "v1");
        assert_eq!(registry.load().public_cases()[0].id, "v2");
    }

    #[tokio::test]
    async fn load_file_parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        tokio::fs::write(
            &path,
            r#"
cases:
  - id: classic
    title: Classic Case
    price_stars: 100
    rtp_ext_min: 0.0
    rtp_ext_max: 1.0
    jackpot_alpha: 0.05
    items:
      - id: gift-a
        kind: GIFT
        star_cost: 50
        probability_ppm: 500000
"#,
        )
        .await
        .unwrap();

        let root = load_file(&path).await.unwrap();
        assert_eq!(root.cases.len(), 1);
        assert_eq!(root.cases[0].id, "classic");
    }
}
