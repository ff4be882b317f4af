//! Analyzer calibration: route a vendor radio to the MXA, read its EVM and
//! RS power, and move the vendor's attenuator so the power lands where the
//! inventory expects it.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::{MxaConfig, WorkflowConfig};
use crate::devices::{Analyzer, Attenuator, CellId, EvmResult, RfSwitch, SyncType};
use crate::error::{Result, SautoError};
use crate::inventory::{Inventory, VendorPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationKind {
    /// Decoded with PSS sync.
    Primary,
    /// Only decoded with RS sync on the vendor's PCI, i.e. a secondary port.
    Secondary,
}

#[derive(Debug, Clone, Serialize)]
pub struct Calibration {
    pub vendor_id: i64,
    pub vendor_name: String,
    pub kind: CalibrationKind,
    pub measurement: EvmResult,
    /// `(recorded, measured)` when the analyzer decoded a different PCI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pci_changed: Option<(i64, i64)>,
    pub delta_db: f64,
    pub start_atten_db: f64,
    pub adjust_atten_db: f64,
}

/// The devices one calibration drives.
pub struct Rig<'d> {
    pub analyzer: &'d mut dyn Analyzer,
    pub attenuator: &'d mut dyn Attenuator,
    pub switch: &'d mut dyn RfSwitch,
    pub mxa: &'d MxaConfig,
}

/// Power error in dB: positive means the radio arrives hotter than expected.
pub fn power_delta(exp_atten: f64, cable_loss: f64, rs_power: f64) -> f64 {
    (exp_atten - cable_loss) + rs_power
}

/// New attenuation after moving `current` by `delta`.
///
/// Small deltas are ignored. Slightly negative results clamp to 0; anything
/// below the slack is `None`.
pub fn adjusted_attenuation(current: f64, delta: f64, wf: &WorkflowConfig) -> Option<f64> {
    if delta.abs() <= wf.adjust_threshold_db {
        return Some(current);
    }
    let next = current + delta;
    if next >= 0.0 {
        Some(next)
    } else if next >= -wf.min_atten_slack_db {
        tracing::warn!(requested = next, "attenuation slightly below minimum, using 0");
        Some(0.0)
    } else {
        None
    }
}

/// Recall the per-duplex setup and point the analyzer at the vendor.
pub fn configure_analyzer(analyzer: &mut dyn Analyzer, plan: &VendorPlan) -> Result<()> {
    tracing::info!(vendor = %plan.name, freq_mhz = plan.freq, tech = %plan.tech, "configuring MXA");
    analyzer.recall(plan.tech.recall_register())?;
    analyzer.set_frequency_mhz(plan.freq)?;
    analyzer.set_range(0.0)?;
    analyzer.set_sync_type(SyncType::Pss)?;
    analyzer.set_cell_id(CellId::Auto)?;
    Ok(())
}

/// Patch the vendor input through to the analyzer at a safe level.
fn route_to_analyzer(rig: &mut Rig<'_>, plan: &VendorPlan, atten: f64, wf: &WorkflowConfig) -> Result<()> {
    let mxa_port = rig.mxa.mxa_port.to_string();
    if rig.switch.is_qrb() {
        // The RBM path to the analyzer shares the MXA input; mute it.
        rig.attenuator
            .set_attenuation(rig.mxa.jfw_port, wf.disconnect_atten_db)?;
        rig.switch.reset_output(&mxa_port)?;
        rig.switch.connect(
            &plan.rf_matrix_input_port,
            &mxa_port,
            Some(wf.qrb_safe_atten_db),
        )?;
    } else {
        rig.attenuator.set_attenuation(rig.mxa.jfw_port, atten)?;
        rig.switch
            .connect(&plan.rf_matrix_input_port, &mxa_port, None)?;
    }
    Ok(())
}

fn no_sync(plan: &VendorPlan, reason: String) -> SautoError {
    SautoError::NoSync {
        vendor: plan.name.clone(),
        reason,
    }
}

/// Read EVM, falling back once to RS sync for secondary ports.
fn measure(rig: &mut Rig<'_>, plan: &VendorPlan, wf: &WorkflowConfig) -> Result<(CalibrationKind, EvmResult)> {
    let mut kind = CalibrationKind::Primary;
    loop {
        let r = rig.analyzer.evm_result(wf.evm_samples)?;
        tracing::info!(vendor = %plan.name, evm = r.evm_avg, rs_power = r.rs_power_avg, pci = r.pci, "EVM read");
        if r.evm_avg > wf.sync_loss_evm {
            return Err(no_sync(plan, format!("EVM {:.1} above {}", r.evm_avg, wf.sync_loss_evm)));
        }
        if r.pci >= 0 && r.evm_avg <= wf.secondary_evm {
            return Ok((kind, r));
        }
        if kind == CalibrationKind::Secondary || rig.analyzer.sync_type()? == SyncType::Rs {
            if let Ok(table) = rig.analyzer.result_table() {
                tracing::debug!(vendor = %plan.name, ?table, "MXA result table");
            }
            return Err(no_sync(
                plan,
                format!("PCI {} EVM {:.1} with RS sync", r.pci, r.evm_avg),
            ));
        }
        tracing::warn!(vendor = %plan.name, "cannot decode signal, trying as a secondary port");
        rig.analyzer.set_sync_type(SyncType::Rs)?;
        rig.analyzer.set_cell_id(CellId::Id(plan.pci))?;
        rig.analyzer.set_crs_ports(2)?;
        rig.analyzer.set_reference_crs_port(1)?;
        kind = CalibrationKind::Secondary;
    }
}

/// Run one calibration for `plan`. The analyzer must already be leased and
/// configured.
pub fn calibrate(
    rig: &mut Rig<'_>,
    plan: &VendorPlan,
    wf: &WorkflowConfig,
    inventory: &Inventory,
) -> Result<Calibration> {
    let start = plan.atten.unwrap_or(wf.safe_atten_db);
    route_to_analyzer(rig, plan, start, wf)?;
    let (kind, m) = measure(rig, plan, wf)?;

    if m.evm_avg <= 0.0 {
        if let Some(port) = plan.jfw_port {
            rig.attenuator
                .set_attenuation(port, wf.disconnect_atten_db)?;
        }
        return Err(no_sync(plan, "MXA returned no EVM reading".into()));
    }

    let pci_changed = (m.pci != plan.pci).then(|| (plan.pci, m.pci));
    if let Some((recorded, measured)) = pci_changed {
        tracing::warn!(vendor = %plan.name, recorded, measured, "PCI differs from inventory, updating");
        inventory.update_vendor_pci(&plan.name, measured)?;
    }

    let delta = power_delta(plan.exp_atten, wf.cable_loss_db, m.rs_power_avg);
    let adjust = adjusted_attenuation(start, delta, wf).ok_or_else(|| {
        SautoError::ExceedMinimumAttenuation {
            vendor: plan.name.clone(),
            value: start + delta,
        }
    })?;
    tracing::info!(
        vendor = %plan.name,
        expected = -plan.exp_atten,
        measured = m.rs_power_avg,
        delta,
        start,
        adjust,
        "attenuation computed"
    );
    if let Some(port) = plan.jfw_port {
        rig.attenuator.set_attenuation(port, adjust)?;
    }

    Ok(Calibration {
        vendor_id: plan.id,
        vendor_name: plan.name.clone(),
        kind,
        measurement: m,
        pci_changed,
        delta_db: delta,
        start_atten_db: start,
        adjust_atten_db: adjust,
    })
}

// ---------------------------------------------------------------------------
// RadioBalance
// ---------------------------------------------------------------------------

/// Radios sharing a name must calibrate to within a tolerance of the first.
#[derive(Debug, Default)]
pub struct RadioBalance {
    first: HashMap<String, f64>,
}

impl RadioBalance {
    pub fn check(&mut self, name: &str, atten: f64, tolerance: f64) -> Result<()> {
        match self.first.get(name) {
            Some(reference) => {
                let difference = (atten - reference).abs();
                if difference > tolerance {
                    return Err(SautoError::Unbalanced {
                        name: name.to_string(),
                        difference,
                    });
                }
                Ok(())
            }
            None => {
                self.first.insert(name.to_string(), atten);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inventory::tests::seeded;
    use crate::inventory::VendorSelector;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    pub(crate) type Log = Arc<Mutex<Vec<String>>>;

    /// Analyzer replaying canned EVM results.
    pub(crate) struct FakeAnalyzer {
        pub log: Log,
        pub results: VecDeque<EvmResult>,
        pub sync: SyncType,
    }

    impl FakeAnalyzer {
        pub(crate) fn new(log: Log, results: Vec<EvmResult>) -> Self {
            Self {
                log,
                results: results.into(),
                sync: SyncType::Pss,
            }
        }

        fn push(&self, s: String) {
            self.log.lock().unwrap().push(s);
        }
    }

    impl Analyzer for FakeAnalyzer {
        fn recall(&mut self, register: u32) -> Result<()> {
            self.push(format!("mxa recall {register}"));
            Ok(())
        }
        fn set_frequency_mhz(&mut self, mhz: f64) -> Result<()> {
            self.push(format!("mxa freq {mhz}"));
            Ok(())
        }
        fn set_range(&mut self, range: f64) -> Result<()> {
            self.push(format!("mxa range {range}"));
            Ok(())
        }
        fn sync_type(&mut self) -> Result<SyncType> {
            Ok(self.sync)
        }
        fn set_sync_type(&mut self, sync: SyncType) -> Result<()> {
            self.sync = sync;
            self.push(format!("mxa sync {}", sync.as_str()));
            Ok(())
        }
        fn set_cell_id(&mut self, cid: CellId) -> Result<()> {
            self.push(format!("mxa cid {cid}"));
            Ok(())
        }
        fn set_crs_ports(&mut self, count: u32) -> Result<()> {
            self.push(format!("mxa crs {count}"));
            Ok(())
        }
        fn set_reference_crs_port(&mut self, port: u32) -> Result<()> {
            self.push(format!("mxa refcrs {port}"));
            Ok(())
        }
        fn evm_result(&mut self, _samples: u32) -> Result<EvmResult> {
            self.push("mxa evm".into());
            Ok(self.results.pop_front().unwrap_or(EvmResult {
                evm_avg: 9.9e37,
                rs_power_avg: 0.0,
                pci: -1,
            }))
        }
        fn result_table(&mut self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    pub(crate) struct FakeAttenuator {
        pub log: Log,
    }

    impl Attenuator for FakeAttenuator {
        fn set_attenuation(&mut self, port: u32, db: f64) -> Result<()> {
            self.log.lock().unwrap().push(format!("jfw {port} {db}"));
            Ok(())
        }
    }

    pub(crate) struct FakeSwitch {
        pub log: Log,
        pub qrb: bool,
    }

    impl RfSwitch for FakeSwitch {
        fn is_qrb(&self) -> bool {
            self.qrb
        }
        fn connect(&mut self, input: &str, output: &str, atten_db: Option<f64>) -> Result<()> {
            let line = match atten_db {
                Some(db) => format!("switch {input}->{output} @{db}"),
                None => format!("switch {input}->{output}"),
            };
            self.log.lock().unwrap().push(line);
            Ok(())
        }
        fn reset_output(&mut self, output: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("switch reset {output}"));
            Ok(())
        }
    }

    pub(crate) fn evm(evm_avg: f64, rs_power_avg: f64, pci: i64) -> EvmResult {
        EvmResult {
            evm_avg,
            rs_power_avg,
            pci,
        }
    }

    fn run(
        inv: &Inventory,
        plan: &VendorPlan,
        results: Vec<EvmResult>,
        qrb: bool,
    ) -> (Result<Calibration>, Vec<String>) {
        let log = Log::default();
        let mut analyzer = FakeAnalyzer::new(log.clone(), results);
        let mut attenuator = FakeAttenuator { log: log.clone() };
        let mut switch = FakeSwitch {
            log: log.clone(),
            qrb,
        };
        let mxa = inv.mxa(plan.mxa_id).unwrap();
        let mut rig = Rig {
            analyzer: &mut analyzer,
            attenuator: &mut attenuator,
            switch: &mut switch,
            mxa: &mxa,
        };
        let result = calibrate(&mut rig, plan, &WorkflowConfig::immediate(), inv);
        let lines = log.lock().unwrap().clone();
        (result, lines)
    }

    fn plan(inv: &Inventory, id: i64) -> VendorPlan {
        inv.vendor_plans(&VendorSelector::Id(id))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn delta_and_adjustment_arithmetic() {
        let wf = WorkflowConfig::default();
        assert_eq!(power_delta(62.0, 3.0, -65.0), -6.0);
        assert_eq!(adjusted_attenuation(20.0, -6.0, &wf), Some(14.0));
        assert_eq!(adjusted_attenuation(20.0, 0.5, &wf), Some(20.0));
        assert_eq!(adjusted_attenuation(2.0, -6.0, &wf), Some(0.0));
        assert_eq!(adjusted_attenuation(2.0, -7.0, &wf), Some(0.0));
        assert_eq!(adjusted_attenuation(2.0, -7.5, &wf), None);
    }

    #[test]
    fn primary_calibration_moves_vendor_port() {
        let inv = seeded();
        let p = plan(&inv, 1);
        // Expected -62 + 3 dB cable; measured -65 means 6 dB too weak.
        let (result, log) = run(&inv, &p, vec![evm(2.5, -65.0, 101)], false);
        let cal = result.unwrap();
        assert_eq!(cal.kind, CalibrationKind::Primary);
        assert_eq!(cal.start_atten_db, 20.0);
        assert_eq!(cal.adjust_atten_db, 14.0);
        assert_eq!(cal.pci_changed, None);
        assert_eq!(log[0], "jfw 24 20");
        assert_eq!(log[1], "switch A->1");
        assert_eq!(log.last().unwrap(), "jfw 3 14");
    }

    #[test]
    fn missing_atten_uses_safe_default() {
        let inv = seeded();
        let p = plan(&inv, 2);
        let (result, log) = run(&inv, &p, vec![evm(1.0, -55.5, 202)], false);
        let cal = result.unwrap();
        assert_eq!(cal.start_atten_db, 15.0);
        assert_eq!(cal.adjust_atten_db, 15.0);
        assert_eq!(log[0], "jfw 24 15");
    }

    #[test]
    fn qrb_route_mutes_rbm_path() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (_, log) = run(&inv, &p, vec![evm(2.5, -59.0, 101)], true);
        assert_eq!(&log[..3], ["jfw 24 127", "switch reset 1", "switch A->1 @15"]);
    }

    #[test]
    fn sync_loss_is_no_sync() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (result, _) = run(&inv, &p, vec![evm(9000.0, -50.0, 101)], false);
        assert!(matches!(result, Err(SautoError::NoSync { .. })));
    }

    #[test]
    fn undecoded_pci_retries_as_secondary() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (result, log) = run(
            &inv,
            &p,
            vec![evm(12.0, -60.0, -1), evm(3.0, -59.0, 101)],
            false,
        );
        let cal = result.unwrap();
        assert_eq!(cal.kind, CalibrationKind::Secondary);
        for expected in ["mxa sync RS", "mxa cid 101", "mxa crs 2", "mxa refcrs 1"] {
            assert!(log.iter().any(|l| l == expected), "missing {expected}");
        }
        assert_eq!(log.iter().filter(|l| *l == "mxa evm").count(), 2);
    }

    #[test]
    fn secondary_failure_is_no_sync() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (result, _) = run(
            &inv,
            &p,
            vec![evm(400.0, -60.0, 101), evm(350.0, -60.0, 101)],
            false,
        );
        assert!(matches!(result, Err(SautoError::NoSync { .. })));
    }

    #[test]
    fn pci_change_updates_inventory() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (result, _) = run(&inv, &p, vec![evm(2.0, -59.0, 105)], false);
        assert_eq!(result.unwrap().pci_changed, Some((101, 105)));
        assert!(inv
            .vendor_plans(&VendorSelector::Name("ERIC-B41".into()))
            .unwrap()
            .iter()
            .all(|v| v.pci == 105));
    }

    #[test]
    fn exceeding_minimum_attenuation_fails() {
        let inv = seeded();
        let p = plan(&inv, 1);
        // 20 dB start, 40 dB too weak.
        let (result, _) = run(&inv, &p, vec![evm(2.0, -99.0, 101)], false);
        match result {
            Err(SautoError::ExceedMinimumAttenuation { value, .. }) => assert_eq!(value, -20.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_evm_disconnects_vendor() {
        let inv = seeded();
        let p = plan(&inv, 1);
        let (result, log) = run(&inv, &p, vec![evm(0.0, 0.0, 101)], false);
        assert!(matches!(result, Err(SautoError::NoSync { .. })));
        assert_eq!(log.last().unwrap(), "jfw 3 127");
    }

    #[test]
    fn balance_is_relative_to_first_radio() {
        let mut b = RadioBalance::default();
        b.check("ERIC-B41", 14.0, 3.0).unwrap();
        b.check("NOK-B25", 30.0, 3.0).unwrap();
        b.check("ERIC-B41", 16.5, 3.0).unwrap();
        let err = b.check("ERIC-B41", 18.0, 3.0).unwrap_err();
        assert!(matches!(err, SautoError::Unbalanced { difference, .. } if difference == 4.0));
    }
}
