use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::calibrate::Calibration;
use super::signal::SignalCheck;

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// VendorConfigReport
// ---------------------------------------------------------------------------

/// Everything a vendor configuration run did, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VendorConfigReport {
    /// Lease owner token of the run.
    pub owner: String,
    /// Vendors the run took through calibration.
    pub in_use_vendors: Vec<i64>,
    /// Busy LSU cells seen before calibration, keyed by LSU id.
    pub in_use_cells: BTreeMap<i64, Vec<u32>>,
    pub calibrations: Vec<Calibration>,
    pub signal_checks: Vec<SignalCheck>,
    pub steps: Vec<StepRecord>,
}

impl VendorConfigReport {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, step: String, verdict: Verdict, detail: Option<String>) {
        match verdict {
            Verdict::Pass => tracing::info!(%step, detail = detail.as_deref(), "PASS"),
            Verdict::Fail => tracing::error!(%step, detail = detail.as_deref(), "FAIL"),
        }
        self.steps.push(StepRecord {
            step,
            verdict,
            detail,
            at: Utc::now(),
        });
    }

    pub fn pass(&mut self, step: impl Into<String>) {
        self.record(step.into(), Verdict::Pass, None);
    }

    pub fn pass_with(&mut self, step: impl Into<String>, detail: impl Into<String>) {
        self.record(step.into(), Verdict::Pass, Some(detail.into()));
    }

    pub fn fail(&mut self, step: impl Into<String>, detail: impl Into<String>) {
        self.record(step.into(), Verdict::Fail, Some(detail.into()));
    }

    pub fn passed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.verdict == Verdict::Pass)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// One line per step followed by the totals.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for s in &self.steps {
            out.push_str(&format!("[{}] {}", s.verdict, s.step));
            if let Some(d) = &s.detail {
                out.push_str(&format!(": {d}"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "{} passed, {} failed",
            self.passed(),
            self.failed()
        ));
        out
    }
}
