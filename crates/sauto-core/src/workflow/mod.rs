//! Vendor configuration: calibrate each radio on the shared analyzer, bring
//! up its LSU cell, patch it through the RF matrix, and confirm the cell
//! decodes it at the target RSRP.
//!
//! Devices are obtained through [`DeviceProvider`] so the recipe can run
//! against the bench (via [`InventoryDevices`]) or against fakes.

pub mod calibrate;
mod report;
pub mod signal;

use std::collections::BTreeMap;

use crate::config::{Config, LsuConfig, RfMatrixConfig, VendorRef, WorkflowConfig};
use crate::devices::{
    Analyzer, Attenuator, CellMode, CellPlan, CellSimulator, CellTiming, Jfw, Lsu, Mxa,
    RfMatrix, RfSwitch,
};
use crate::error::{Result, SautoError};
use crate::inventory::{Inventory, LeaseRegistry, MxaLease, VendorPlan, VendorSelector};

pub use calibrate::{Calibration, CalibrationKind, RadioBalance};
pub use report::{StepRecord, VendorConfigReport, Verdict};
pub use signal::SignalCheck;

/// JFW used when the patch panel row names none.
const DEFAULT_JFW_ID: i64 = 1;

// ---------------------------------------------------------------------------
// DeviceProvider
// ---------------------------------------------------------------------------

/// Builds device clients by inventory id.
pub trait DeviceProvider {
    fn analyzer(&self, mxa_id: i64) -> Result<Box<dyn Analyzer>>;
    fn attenuator(&self, jfw_id: i64) -> Result<Box<dyn Attenuator>>;
    fn rf_switch(&self, rf_matrix_id: i64) -> Result<Box<dyn RfSwitch>>;
    fn cell_simulator(&self, lsu_id: i64) -> Result<Box<dyn CellSimulator>>;
}

/// Real clients from inventory rows. Credentials and limits the inventory
/// does not store come from the device configuration file.
pub struct InventoryDevices<'a> {
    inventory: &'a Inventory,
    defaults: &'a Config,
}

impl<'a> InventoryDevices<'a> {
    pub fn new(inventory: &'a Inventory, defaults: &'a Config) -> Self {
        Self {
            inventory,
            defaults,
        }
    }
}

impl DeviceProvider for InventoryDevices<'_> {
    fn analyzer(&self, mxa_id: i64) -> Result<Box<dyn Analyzer>> {
        Ok(Box::new(Mxa::new(self.inventory.mxa(mxa_id)?)))
    }

    fn attenuator(&self, jfw_id: i64) -> Result<Box<dyn Attenuator>> {
        Ok(Box::new(Jfw::new(self.inventory.jfw(jfw_id)?)))
    }

    fn rf_switch(&self, rf_matrix_id: i64) -> Result<Box<dyn RfSwitch>> {
        let row = self.inventory.rf_matrix(rf_matrix_id)?;
        let d = &self.defaults.rf_matrix;
        Ok(Box::new(RfMatrix::new(RfMatrixConfig {
            buffer_size: d.buffer_size,
            ssh_user: d.ssh_user.clone(),
            ssh_password: d.ssh_password.clone(),
            max_atten: d.max_atten,
            ..row
        })))
    }

    fn cell_simulator(&self, lsu_id: i64) -> Result<Box<dyn CellSimulator>> {
        let row = self.inventory.lsu(lsu_id)?;
        let d = &self.defaults.lsu;
        Ok(Box::new(Lsu::new(LsuConfig {
            id: row.id,
            name: row.name,
            ip: row.ip,
            ..d.clone()
        })?))
    }
}

// ---------------------------------------------------------------------------
// Vendor selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum VendorSource {
    /// Vendor plans straight from the inventory.
    Inventory(VendorSelector),
    /// `VENDORS` section of the configuration file: cell key to vendor.
    Cells(BTreeMap<String, VendorRef>),
}

/// Cell number carried in a `VENDORS` key such as `cell3`.
fn cell_from_key(key: &str) -> Option<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub fn resolve_vendors(inventory: &Inventory, source: &VendorSource) -> Result<Vec<VendorPlan>> {
    match source {
        VendorSource::Inventory(selector) => {
            let plans = inventory.vendor_plans(selector)?;
            if plans.is_empty() {
                return Err(SautoError::VendorNotFound(selector.to_string()));
            }
            Ok(plans)
        }
        VendorSource::Cells(entries) => {
            let mut plans = Vec::with_capacity(entries.len());
            for (key, vendor) in entries {
                let cell = cell_from_key(key).ok_or_else(|| {
                    SautoError::InvalidConfig(format!("VENDORS key '{key}' carries no cell number"))
                })?;
                let selector = match vendor {
                    VendorRef::Id(id) => VendorSelector::Id(*id),
                    VendorRef::Name(name) => VendorSelector::Name(name.clone()),
                };
                let mut plan = inventory
                    .vendor_plans(&selector)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| SautoError::VendorNotFound(selector.to_string()))?;
                // The port mask follows the cell parity, not the patch row.
                plan.cell_id = cell;
                plan.port_mask = None;
                plans.push(plan);
            }
            Ok(plans)
        }
    }
}

// ---------------------------------------------------------------------------
// VendorConfigurator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub cell_mode: CellMode,
    /// Record per-vendor failures and carry on with the rest.
    pub lenient: bool,
    /// Leave configured vendors marked in use.
    pub hold: bool,
}

pub struct VendorConfigurator<'a, D> {
    inventory: &'a Inventory,
    devices: D,
    workflow: WorkflowConfig,
    options: RunOptions,
    owner: String,
    registry: Option<LeaseRegistry>,
}

impl<'a, D: DeviceProvider> VendorConfigurator<'a, D> {
    pub fn new(inventory: &'a Inventory, devices: D, workflow: WorkflowConfig) -> Self {
        Self {
            inventory,
            devices,
            workflow,
            options: RunOptions::default(),
            owner: uuid::Uuid::new_v4().to_string(),
            registry: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Track held leases in `registry` so an interrupt handler can free them.
    pub fn with_registry(mut self, registry: LeaseRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Lease owner token of this run.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Record a failed step; in strict mode also abort with the error.
    fn failed(&self, report: &mut VendorConfigReport, step: String, err: SautoError) -> Result<()> {
        report.fail(step, err.to_string());
        if self.options.lenient {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Run the whole recipe for `plans`, in order.
    pub fn run(&self, plans: &[VendorPlan]) -> Result<VendorConfigReport> {
        let mut report = VendorConfigReport::new(self.owner.clone());
        let mut balance = RadioBalance::default();
        let mut calibrated: Vec<(&VendorPlan, f64)> = Vec::new();

        for plan in plans {
            tracing::info!(vendor = %plan.name, id = plan.id, cell = plan.cell_id, "starting vendor configuration");
            let cal = match self.calibrate_vendor(plan, &mut report) {
                Ok(cal) => cal,
                Err(e) => {
                    self.failed(&mut report, format!("Vendor ID [{}] calibration", plan.id), e)?;
                    continue;
                }
            };
            let adjust = cal.adjust_atten_db;
            report.calibrations.push(cal);

            let step = format!("Vendor ID [{}] balance check", plan.id);
            match balance.check(&plan.name, adjust, self.workflow.balance_tolerance_db) {
                Ok(()) => report.pass(step),
                Err(e) => {
                    self.failed(&mut report, step, e)?;
                    continue;
                }
            }
            calibrated.push((plan, adjust));
        }

        let mut patched = Vec::new();
        for (plan, adjust) in calibrated {
            match self.bring_up_cell(plan, adjust, &mut report) {
                Ok(()) => patched.push((plan, adjust)),
                Err(e) => {
                    self.failed(&mut report, format!("LSU cell [{}] configuration", plan.cell_id), e)?
                }
            }
        }

        for (plan, adjust) in patched {
            let step = format!("Cell [{}] signal check", plan.cell_id);
            match self.verify_signal(plan, adjust) {
                Ok(check) => {
                    let detail = format!("RSRP {:.1} dBm at {:.1} dB", check.rsrp_dbm, check.final_atten_db);
                    report.pass_with(step, detail);
                    report.signal_checks.push(check);
                }
                Err(e) => {
                    self.failed(&mut report, step, e)?;
                    continue;
                }
            }
            if self.options.hold {
                self.inventory.set_vendor_in_use(plan.id, true)?;
                report.pass(format!("Vendor ID [{}] held", plan.id));
            }
        }

        tracing::info!(passed = report.passed(), failed = report.failed(), "vendor configuration finished");
        Ok(report)
    }

    /// Steps 1 to 6 for one vendor: devices, busy cells, lease, analyzer
    /// setup, calibration, lease release.
    fn calibrate_vendor(&self, plan: &VendorPlan, report: &mut VendorConfigReport) -> Result<Calibration> {
        let mxa = self.inventory.mxa(plan.mxa_id)?;
        let mut analyzer = self.devices.analyzer(plan.mxa_id)?;
        let mut attenuator = self.devices.attenuator(plan.jfw_id.unwrap_or(DEFAULT_JFW_ID))?;
        let mut switch = self.devices.rf_switch(plan.rf_matrix_id)?;
        let mut sim = self.devices.cell_simulator(plan.lsu_id)?;

        let busy = sim.busy_cells()?;
        report
            .in_use_cells
            .insert(plan.lsu_id, busy.all().into_iter().collect());

        let lease = self.acquire_resources(plan, sim.as_mut())?;
        report.pass(format!("Vendor ID [{}] resource dependency check", plan.id));
        if !report.in_use_vendors.contains(&plan.id) {
            report.in_use_vendors.push(plan.id);
        }

        calibrate::configure_analyzer(analyzer.as_mut(), plan)?;
        let mut rig = calibrate::Rig {
            analyzer: analyzer.as_mut(),
            attenuator: attenuator.as_mut(),
            switch: switch.as_mut(),
            mxa: &mxa,
        };
        let cal = calibrate::calibrate(&mut rig, plan, &self.workflow, self.inventory)?;
        lease.release()?;

        report.pass_with(
            format!("Vendor ID [{}] calibration", plan.id),
            format!("{:?}, attenuation {:.1} dB", cal.kind, cal.adjust_atten_db),
        );
        if let Some((recorded, measured)) = cal.pci_changed {
            report.pass_with(
                format!("Vendor ID [{}] PCI update", plan.id),
                format!("recorded {recorded}, measured {measured}"),
            );
        }
        Ok(cal)
    }

    /// Poll until the analyzer lease is ours and the vendor is free.
    fn acquire_resources(&self, plan: &VendorPlan, sim: &mut dyn CellSimulator) -> Result<MxaLease<'a>> {
        let attempts = self.workflow.mxa_wait_attempts.max(1);
        for attempt in 1..=attempts {
            let busy: Vec<u32> = sim.busy_cells()?.all().into_iter().collect();
            let on_busy_cell = self
                .inventory
                .vendors_on_cells(&busy)?
                .iter()
                .any(|v| v.id == plan.id);
            if on_busy_cell {
                tracing::warn!(vendor = %plan.name, attempt, attempts, "vendor is on a busy LSU cell");
            } else if self.inventory.is_vendor_busy(plan.id)? {
                tracing::warn!(vendor = %plan.name, attempt, attempts, "vendor in use");
            } else if let Some(lease) = MxaLease::try_acquire(
                self.inventory,
                plan.mxa_id,
                &self.owner,
                self.registry.as_ref(),
            )? {
                return Ok(lease);
            } else {
                tracing::warn!(mxa = plan.mxa_id, attempt, attempts, "MXA in use");
            }
            if attempt < attempts {
                std::thread::sleep(self.workflow.mxa_wait_interval());
            }
        }
        Err(SautoError::ResourceTimeout {
            resource: format!("MXA {} for vendor {}", plan.mxa_id, plan.name),
            waited_secs: self.workflow.mxa_wait_interval_secs * u64::from(attempts),
        })
    }

    /// Configure the vendor's LSU cell and patch the vendor onto it.
    fn bring_up_cell(&self, plan: &VendorPlan, adjust: f64, report: &mut VendorConfigReport) -> Result<()> {
        let mut sim = self.devices.cell_simulator(plan.lsu_id)?;
        let timing = CellTiming::from_workflow(&self.workflow);
        sim.configure_cell(&CellPlan::from_vendor(plan), self.options.cell_mode, &timing)?;
        report.pass(format!("LSU cell [{}] configuration", plan.cell_id));

        let mut switch = self.devices.rf_switch(plan.rf_matrix_id)?;
        let level = switch.is_qrb().then_some(adjust);
        switch.connect(&plan.rf_matrix_input_port, &plan.rf_matrix_output_port, level)?;
        report.pass(format!(
            "RF matrix path {} -> {}",
            plan.rf_matrix_input_port, plan.rf_matrix_output_port
        ));
        Ok(())
    }

    fn verify_signal(&self, plan: &VendorPlan, adjust: f64) -> Result<SignalCheck> {
        let mut sim = self.devices.cell_simulator(plan.lsu_id)?;
        let mut switch = self.devices.rf_switch(plan.rf_matrix_id)?;
        let mut attenuator = self.devices.attenuator(plan.jfw_id.unwrap_or(DEFAULT_JFW_ID))?;
        signal::check_signal(
            sim.as_mut(),
            switch.as_mut(),
            attenuator.as_mut(),
            plan,
            adjust,
            &self.workflow,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::calibrate::tests::{evm, FakeAnalyzer, FakeAttenuator, FakeSwitch, Log};
    use super::*;
    use crate::devices::{BusyCells, CellRsrp, EvmResult};
    use crate::inventory::tests::seeded;
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::{Arc, Mutex};

    struct FakeCells {
        log: Log,
        busy: BTreeSet<u32>,
        rsrp: BTreeMap<u32, CellRsrp>,
    }

    impl CellSimulator for FakeCells {
        fn busy_cells(&mut self) -> Result<BusyCells> {
            Ok(BusyCells {
                fdd: self.busy.clone(),
                tdd: BTreeSet::new(),
            })
        }
        fn cell_rsrp(&mut self) -> Result<BTreeMap<u32, CellRsrp>> {
            Ok(self.rsrp.clone())
        }
        fn configure_cell(&mut self, plan: &CellPlan, mode: CellMode, _: &CellTiming) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("lsu configure {} {mode}", plan.cell));
            Ok(())
        }
    }

    /// A bench whose analyzer answers one scripted EVM sequence per vendor.
    #[derive(Default)]
    struct FakeBench {
        log: Log,
        evm: Arc<Mutex<VecDeque<Vec<EvmResult>>>>,
        busy: BTreeSet<u32>,
        qrb: bool,
    }

    impl FakeBench {
        fn with_evm(results: Vec<Vec<EvmResult>>) -> Self {
            Self {
                evm: Arc::new(Mutex::new(results.into())),
                ..Self::default()
            }
        }
    }

    impl DeviceProvider for FakeBench {
        fn analyzer(&self, _: i64) -> Result<Box<dyn Analyzer>> {
            let results = self.evm.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::new(FakeAnalyzer::new(self.log.clone(), results)))
        }
        fn attenuator(&self, _: i64) -> Result<Box<dyn Attenuator>> {
            Ok(Box::new(FakeAttenuator {
                log: self.log.clone(),
            }))
        }
        fn rf_switch(&self, _: i64) -> Result<Box<dyn RfSwitch>> {
            Ok(Box::new(FakeSwitch {
                log: self.log.clone(),
                qrb: self.qrb,
            }))
        }
        fn cell_simulator(&self, _: i64) -> Result<Box<dyn CellSimulator>> {
            let level = CellRsrp { a0: -50.0, a1: -50.0 };
            Ok(Box::new(FakeCells {
                log: self.log.clone(),
                busy: self.busy.clone(),
                rsrp: BTreeMap::from([(3, level), (4, level), (6, level)]),
            }))
        }
    }

    fn plans(inv: &Inventory, ids: &[i64]) -> Vec<VendorPlan> {
        ids.iter()
            .flat_map(|id| inv.vendor_plans(&VendorSelector::Id(*id)).unwrap())
            .collect()
    }

    fn quick() -> WorkflowConfig {
        WorkflowConfig {
            mxa_wait_attempts: 2,
            ..WorkflowConfig::immediate()
        }
    }

    #[test]
    fn configures_every_vendor_end_to_end() {
        let inv = seeded();
        let bench = FakeBench::with_evm(vec![
            vec![evm(2.5, -59.0, 101)],
            vec![evm(1.0, -55.5, 202)],
        ]);
        let log = bench.log.clone();
        let registry = LeaseRegistry::default();
        let wf = VendorConfigurator::new(&inv, bench, quick()).with_registry(registry.clone());
        let report = wf.run(&plans(&inv, &[1, 2])).unwrap();

        assert!(report.is_success(), "{}", report.summary());
        assert_eq!(report.in_use_vendors, [1, 2]);
        assert_eq!(report.calibrations.len(), 2);
        assert_eq!(report.signal_checks.len(), 2);
        assert_eq!(report.in_use_cells[&1], Vec::<u32>::new());
        assert!(!inv.is_mxa_busy(1).unwrap());
        assert!(registry.held().is_empty());

        let log = log.lock().unwrap();
        assert!(log.contains(&"mxa recall 1".to_string()));
        assert!(log.contains(&"mxa recall 3".to_string()));
        assert!(log.contains(&"lsu configure 3 rest".to_string()));
        assert!(log.contains(&"lsu configure 4 rest".to_string()));
        assert!(log.contains(&"switch A->3".to_string()));
        assert!(log.contains(&"switch 5->4".to_string()));
    }

    #[test]
    fn strict_mode_aborts_and_frees_the_analyzer() {
        let inv = seeded();
        let bench = FakeBench::with_evm(vec![vec![evm(9000.0, 0.0, -1)]]);
        let err = VendorConfigurator::new(&inv, bench, quick())
            .run(&plans(&inv, &[1, 2]))
            .unwrap_err();
        assert!(matches!(err, SautoError::NoSync { .. }));
        assert!(!inv.is_mxa_busy(1).unwrap());
    }

    #[test]
    fn lenient_mode_records_failures_and_continues() {
        let inv = seeded();
        let bench = FakeBench::with_evm(vec![
            vec![evm(9000.0, 0.0, -1)],
            vec![evm(1.0, -55.5, 202)],
        ]);
        let report = VendorConfigurator::new(&inv, bench, quick())
            .with_options(RunOptions {
                lenient: true,
                ..RunOptions::default()
            })
            .run(&plans(&inv, &[1, 2]))
            .unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.calibrations.len(), 1);
        assert_eq!(report.signal_checks[0].vendor_id, 2);
        assert!(report
            .steps
            .iter()
            .any(|s| s.verdict == Verdict::Fail && s.step == "Vendor ID [1] calibration"));
    }

    #[test]
    fn analyzer_held_elsewhere_times_out() {
        let inv = seeded();
        assert!(inv.try_acquire_mxa(1, "someone-else").unwrap());
        let bench = FakeBench::with_evm(vec![vec![evm(2.5, -59.0, 101)]]);
        let err = VendorConfigurator::new(&inv, bench, quick())
            .run(&plans(&inv, &[1]))
            .unwrap_err();
        assert!(matches!(err, SautoError::ResourceTimeout { .. }));
        // Untouched: still the other owner's.
        assert!(inv.is_mxa_busy(1).unwrap());
    }

    #[test]
    fn vendor_on_busy_cell_is_not_touched() {
        let inv = seeded();
        let bench = FakeBench {
            busy: BTreeSet::from([3]),
            ..FakeBench::with_evm(vec![vec![evm(2.5, -59.0, 101)]])
        };
        let log = bench.log.clone();
        let err = VendorConfigurator::new(&inv, bench, quick())
            .run(&plans(&inv, &[1]))
            .unwrap_err();
        assert!(matches!(err, SautoError::ResourceTimeout { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unbalanced_radios_fail() {
        let inv = seeded();
        // Same radio name, calibrated 6 dB apart.
        let bench = FakeBench::with_evm(vec![
            vec![evm(2.5, -59.0, 101)],
            vec![evm(2.5, -53.0, 101)],
        ]);
        let err = VendorConfigurator::new(&inv, bench, quick())
            .run(&plans(&inv, &[1, 3]))
            .unwrap_err();
        assert!(matches!(err, SautoError::Unbalanced { .. }));
    }

    #[test]
    fn hold_marks_vendors_in_use() {
        let inv = seeded();
        let bench = FakeBench::with_evm(vec![vec![evm(1.0, -55.5, 202)]]);
        let report = VendorConfigurator::new(&inv, bench, quick())
            .with_options(RunOptions {
                hold: true,
                cell_mode: CellMode::File,
                ..RunOptions::default()
            })
            .run(&plans(&inv, &[2]))
            .unwrap();
        assert!(inv.is_vendor_busy(2).unwrap());
        assert!(report.steps.iter().any(|s| s.step == "Vendor ID [2] held"));
    }

    #[test]
    fn qrb_bench_patches_at_calibrated_level() {
        let inv = seeded();
        let bench = FakeBench {
            qrb: true,
            ..FakeBench::with_evm(vec![vec![evm(2.5, -59.0, 101)]])
        };
        let log = bench.log.clone();
        VendorConfigurator::new(&inv, bench, quick())
            .run(&plans(&inv, &[1]))
            .unwrap();
        assert!(log.lock().unwrap().contains(&"switch A->3 @20".to_string()));
    }

    #[test]
    fn cells_section_overrides_cell() {
        let inv = seeded();
        let source = VendorSource::Cells(BTreeMap::from([
            ("cell7".to_string(), VendorRef::Id(2)),
            ("cell8".to_string(), VendorRef::Name("ERIC-B41".into())),
        ]));
        let plans = resolve_vendors(&inv, &source).unwrap();
        assert_eq!(plans[0].id, 2);
        assert_eq!(plans[0].cell_id, 7);
        assert_eq!(plans[0].effective_port_mask(), 3);
        assert_eq!(plans[1].id, 1);
        assert_eq!(plans[1].cell_id, 8);
    }

    #[test]
    fn unresolvable_sources_are_errors() {
        let inv = seeded();
        let bad_key = VendorSource::Cells(BTreeMap::from([("cell".to_string(), VendorRef::Id(1))]));
        assert!(matches!(
            resolve_vendors(&inv, &bad_key),
            Err(SautoError::InvalidConfig(_))
        ));
        let missing = VendorSource::Inventory(VendorSelector::Name("NOPE".into()));
        assert!(matches!(
            resolve_vendors(&inv, &missing),
            Err(SautoError::VendorNotFound(_))
        ));
    }
}
