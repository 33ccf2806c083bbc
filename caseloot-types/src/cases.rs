//! §3 / §4.6: case economics — the prize table a case draws from, and the
//! validation report produced when a case config is loaded or reloaded.

use serde::{Deserialize, Serialize};

pub const PPM_SCALE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrizeKind {
    Premium3M,
    Premium6M,
    Premium12M,
    Gift,
    Internal,
}

impl PrizeKind {
    /// External prize kinds require a `star_cost` (§3); `Internal` does not
    /// since it credits an internal ledger rather than costing the house
    /// anything external.
    pub fn is_external(self) -> bool {
        !matches!(self, PrizeKind::Internal)
    }

    /// Fixed month counts for premium grants, and the informational cost
    /// table from §4.8 (not charged again at award time).
    pub fn premium_months(self) -> Option<u32> {
        match self {
            PrizeKind::Premium3M => Some(3),
            PrizeKind::Premium6M => Some(6),
            PrizeKind::Premium12M => Some(12),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeItem {
    pub id: String,
    pub kind: PrizeKind,
    pub star_cost: Option<i64>,
    pub probability_ppm: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    pub id: String,
    pub title: String,
    pub price_stars: i64,
    pub rtp_ext_min: f64,
    pub rtp_ext_max: f64,
    pub jackpot_alpha: f64,
    pub items: Vec<PrizeItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseEconomyPreview {
    pub ev_ext: f64,
    pub rtp_ext: f64,
    pub sum_ppm: i64,
    pub alpha: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseValidationReport {
    pub case_id: String,
    pub is_ok: bool,
    pub problems: Vec<String>,
    pub preview: CaseEconomyPreview,
}

impl CaseConfig {
    /// Validate every invariant from §3 and compute the economy preview,
    /// whether or not the config turns out to be valid.
    pub fn validate(&self) -> CaseValidationReport {
        let mut problems = Vec::new();

        let sum_ppm: i64 = self.items.iter().map(|i| i.probability_ppm).sum();
        let ev_ext: f64 = self
            .items
            .iter()
            .map(|i| i.star_cost.unwrap_or(0) as f64 * (i.probability_ppm as f64 / PPM_SCALE as f64))
            .sum();
        let rtp_ext = if self.price_stars > 0 { ev_ext / self.price_stars as f64 } else { 0.0 };

        for item in &self.items {
            if !(0..=PPM_SCALE).contains(&item.probability_ppm) {
                problems.push(format!(
                    "item {}: probability_ppm={} not in [0, 1_000_000]",
                    item.id, item.probability_ppm
                ));
            }
            match item.star_cost {
                Some(cost) if cost < 0 => {
                    problems.push(format!("starCost={cost} < 0 (item {})", item.id));
                }
                None if item.kind.is_external() => {
                    problems.push(format!(
                        "item {}: star_cost required for external prize kind {:?}",
                        item.id, item.kind
                    ));
                }
                _ => {}
            }
        }

        if sum_ppm > PPM_SCALE {
            problems.push(format!("sumPpm={sum_ppm} > 1_000_000"));
        }

        if !(0.0..=0.2).contains(&self.jackpot_alpha) {
            problems.push(format!("jackpotAlpha={:.6} вне диапазона [0.0, 0.2]", self.jackpot_alpha));
        }

        if !(self.rtp_ext_min..=self.rtp_ext_max).contains(&rtp_ext) {
            problems.push(format!(
                "rtpExt={rtp_ext:.6} вне коридора [{:.6}, {:.6}]",
                self.rtp_ext_min, self.rtp_ext_max
            ));
        }

        CaseValidationReport {
            case_id: self.id.clone(),
            is_ok: problems.is_empty(),
            problems,
            preview: CaseEconomyPreview { ev_ext, rtp_ext, sum_ppm, alpha: self.jackpot_alpha },
        }
    }

    /// Public view: the fields safe to expose to the mini-app.
    pub fn public_view(&self) -> CasePublicView {
        CasePublicView { id: self.id.clone(), title: self.title.clone(), price_stars: self.price_stars }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasePublicView {
    pub id: String,
    pub title: String,
    pub price_stars: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CasesRoot {
    pub cases: Vec<CaseConfig>,
}
