use serde::Serialize;

use crate::config::WorkflowConfig;
use crate::devices::{Attenuator, CellSimulator, RfSwitch};
use crate::error::{Result, SautoError};
use crate::inventory::VendorPlan;

/// Outcome of polling the LSU for a vendor's cell.
#[derive(Debug, Clone, Serialize)]
pub struct SignalCheck {
    pub vendor_id: i64,
    pub cell: u32,
    /// Last averaged RSRP seen, in dBm.
    pub rsrp_dbm: f64,
    pub within_tolerance: bool,
    pub final_atten_db: f64,
    pub adjustments: u32,
}

/// Push a path attenuation the way the vendor is patched: QRB units carry
/// it on the switch, RBM benches on the vendor's JFW port.
pub fn apply_path_attenuation(
    switch: &mut dyn RfSwitch,
    attenuator: &mut dyn Attenuator,
    plan: &VendorPlan,
    atten: f64,
) -> Result<()> {
    if switch.is_qrb() {
        switch.connect(
            &plan.rf_matrix_input_port,
            &plan.rf_matrix_output_port,
            Some(atten),
        )
    } else if let Some(port) = plan.jfw_port {
        attenuator.set_attenuation(port, atten)
    } else {
        tracing::warn!(vendor = %plan.name, "no JFW port patched, attenuation not applied");
        Ok(())
    }
}

/// Poll the cell's RSRP and trim the path until it sits within tolerance of
/// the target. Fails only when the cell never decodes the radio.
pub fn check_signal(
    sim: &mut dyn CellSimulator,
    switch: &mut dyn RfSwitch,
    attenuator: &mut dyn Attenuator,
    plan: &VendorPlan,
    start_atten: f64,
    wf: &WorkflowConfig,
) -> Result<SignalCheck> {
    let cell = plan.cell_id;
    let attempts = wf.rsrp_attempts.max(1);
    let mut atten = start_atten;
    let mut adjustments = 0;
    let mut last = None;

    for attempt in 1..=attempts {
        match sim.cell_rsrp()?.get(&cell) {
            Some(rsrp) => {
                let avg = rsrp.avg();
                let delta = avg - wf.target_rsrp_dbm;
                last = Some(avg);
                tracing::info!(cell, a0 = rsrp.a0, a1 = rsrp.a1, atten, delta, "cell RSRP");
                if delta.abs() <= wf.rsrp_tolerance_db {
                    return Ok(SignalCheck {
                        vendor_id: plan.id,
                        cell,
                        rsrp_dbm: avg,
                        within_tolerance: true,
                        final_atten_db: atten,
                        adjustments,
                    });
                }
                atten = (atten + delta).max(0.0);
                apply_path_attenuation(switch, attenuator, plan, atten)?;
                adjustments += 1;
            }
            None => tracing::warn!(cell, attempt, attempts, "LSU has not decoded the cell yet"),
        }
        if attempt < attempts {
            std::thread::sleep(wf.rsrp_interval());
        }
    }

    match last {
        Some(rsrp_dbm) => {
            tracing::warn!(cell, rsrp_dbm, "RSRP still outside tolerance");
            Ok(SignalCheck {
                vendor_id: plan.id,
                cell,
                rsrp_dbm,
                within_tolerance: false,
                final_atten_db: atten,
                adjustments,
            })
        }
        None => Err(SautoError::SignalNotDecoded(cell)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{BusyCells, CellMode, CellPlan, CellRsrp, CellTiming};
    use crate::inventory::tests::seeded;
    use crate::inventory::VendorSelector;
    use crate::workflow::calibrate::tests::{FakeAttenuator, FakeSwitch, Log};
    use std::collections::{BTreeMap, VecDeque};

    struct ScriptedCells {
        readings: VecDeque<Option<f64>>,
        cell: u32,
    }

    impl CellSimulator for ScriptedCells {
        fn busy_cells(&mut self) -> Result<BusyCells> {
            Ok(BusyCells::default())
        }
        fn cell_rsrp(&mut self) -> Result<BTreeMap<u32, CellRsrp>> {
            let mut out = BTreeMap::new();
            if let Some(Some(v)) = self.readings.pop_front() {
                out.insert(self.cell, CellRsrp { a0: v, a1: v });
            }
            Ok(out)
        }
        fn configure_cell(&mut self, _: &CellPlan, _: CellMode, _: &CellTiming) -> Result<()> {
            Ok(())
        }
    }

    fn run(readings: Vec<Option<f64>>, qrb: bool) -> (Result<SignalCheck>, Vec<String>) {
        let inv = seeded();
        let plan = inv.vendor_plans(&VendorSelector::Id(1)).unwrap().remove(0);
        let log = Log::default();
        let mut sim = ScriptedCells {
            readings: readings.into(),
            cell: plan.cell_id,
        };
        let mut switch = FakeSwitch {
            log: log.clone(),
            qrb,
        };
        let mut jfw = FakeAttenuator { log: log.clone() };
        let wf = WorkflowConfig {
            rsrp_attempts: 4,
            ..WorkflowConfig::immediate()
        };
        let r = check_signal(&mut sim, &mut switch, &mut jfw, &plan, 14.0, &wf);
        let lines = log.lock().unwrap().clone();
        (r, lines)
    }

    #[test]
    fn in_tolerance_needs_no_adjustment() {
        let (r, log) = run(vec![Some(-51.0)], false);
        let c = r.unwrap();
        assert!(c.within_tolerance);
        assert_eq!(c.adjustments, 0);
        assert!(log.is_empty());
    }

    #[test]
    fn hot_signal_raises_attenuation_on_jfw() {
        // -44 dBm is 6 dB hot.
        let (r, log) = run(vec![None, Some(-44.0), Some(-50.5)], false);
        let c = r.unwrap();
        assert!(c.within_tolerance);
        assert_eq!(c.final_atten_db, 20.0);
        assert_eq!(log, ["jfw 3 20"]);
    }

    #[test]
    fn qrb_adjusts_on_the_switch_and_floors_at_zero() {
        let (r, log) = run(vec![Some(-70.0), Some(-58.0)], true);
        let c = r.unwrap();
        assert_eq!(log[0], "switch A->3 @0");
        assert_eq!(c.adjustments, 2);
        assert!(!c.within_tolerance);
    }

    #[test]
    fn never_decoded_is_an_error() {
        let (r, _) = run(vec![None, None, None, None], false);
        assert!(matches!(r, Err(SautoError::SignalNotDecoded(3))));
    }
}
