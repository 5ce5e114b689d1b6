// rmmu_host/src/extras/rmmu_hub.rs

//! All RMMU units of a printer behind one logical tool index space.
//!
//! Units are concatenated in configuration order: with a 4-slot `rmmu_t0` and a 4-slot
//! `rmmu_t1`, logical tools 0..4 are `rmmu_t0` slots and 4..8 are `rmmu_t1` slots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::configfile::Configfile;
use crate::core_traits::{Notifier, PrintControl};

use super::rmmu::{
    Collaborators, LoadIntent, PrintJob, Rmmu, RmmuError, RmmuEvent, RmmuParams, RmmuResult, RmmuStatus, SensorReport,
    UnloadIntent,
};
use super::routing::Routing;

const JOIN_FAILURE_RETRACT: f64 = -100.0;
const JOIN_FAILURE_SPEED: f64 = 50.0;
const JOIN_FAILURE_ACCEL: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolMapping {
    pub tool: usize,
    pub toolhead: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStatus {
    pub total_tool_count: usize,
    pub initial_tool: Option<usize>,
    pub mapping: Vec<ToolMapping>,
    pub remap: Vec<Vec<usize>>,
    pub spool_joins: Vec<Vec<usize>>,
    pub substitutions: BTreeMap<usize, usize>,
    pub units: Vec<RmmuStatus>,
}

pub struct RmmuHub {
    units: Vec<Rmmu>,
    routing: Routing,
    active_print: Option<PrintJob>,
    notifier: Arc<dyn Notifier>,
    print: Arc<Mutex<dyn PrintControl>>,
}

impl RmmuHub {
    pub fn new(units: Vec<Rmmu>, notifier: Arc<dyn Notifier>, print: Arc<Mutex<dyn PrintControl>>) -> Self {
        let total = units.iter().map(|u| u.tool_count()).sum();
        RmmuHub { units, routing: Routing::new(total), active_print: None, notifier, print }
    }

    /// Builds one unit per `[rmmu <name>]` section, in file order. `collaborators` provides
    /// each unit's motion system, heater and shared services.
    pub fn from_config<F>(
        config: &Configfile,
        notifier: Arc<dyn Notifier>,
        print: Arc<Mutex<dyn PrintControl>>,
        mut collaborators: F,
    ) -> RmmuResult<Self>
    where
        F: FnMut(&RmmuParams) -> Collaborators,
    {
        let sections = config.get_prefix_sections("rmmu ");
        if sections.is_empty() {
            return Err(RmmuError::config(None, "no [rmmu <name>] section configured"));
        }
        let mut units = Vec::with_capacity(sections.len());
        for section in &sections {
            let params = RmmuParams::new(config, section)?;
            let io = collaborators(&params);
            log::info!("RMMU {}: {} tools, {:?} parking sensing", params.name, params.tool_count, params.parking_sensing);
            units.push(Rmmu::with_params(params, io));
        }
        Ok(Self::new(units, notifier, print))
    }

    pub fn total_tool_count(&self) -> usize {
        self.units.iter().map(|u| u.tool_count()).sum()
    }

    pub fn units(&self) -> &[Rmmu] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&Rmmu> {
        self.units.get(index)
    }

    pub fn unit_mut(&mut self, index: usize) -> Option<&mut Rmmu> {
        self.units.get_mut(index)
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn active_print(&self) -> Option<&PrintJob> {
        self.active_print.as_ref()
    }

    /// Logical tool -> (unit index, slot in that unit).
    pub fn locate(&self, tool: usize) -> RmmuResult<(usize, usize)> {
        let mut offset = 0;
        for (i, unit) in self.units.iter().enumerate() {
            if tool < offset + unit.tool_count() {
                return Ok((i, tool - offset));
            }
            offset += unit.tool_count();
        }
        Err(RmmuError::config(Some(tool), format!("only {} tools configured", offset)))
    }

    fn unit_for(&mut self, tool: usize) -> RmmuResult<(&mut Rmmu, usize)> {
        let (u, slot) = self.locate(tool)?;
        Ok((&mut self.units[u], slot))
    }

    fn targets(&self, tool: Option<usize>) -> RmmuResult<Vec<(usize, Option<usize>)>> {
        match tool {
            Some(t) => {
                let (u, slot) = self.locate(t)?;
                Ok(vec![(u, Some(slot))])
            }
            None => Ok((0..self.units.len()).map(|u| (u, None)).collect()),
        }
    }

    // --- device commands ---

    pub fn home(&mut self) -> RmmuResult<()> {
        self.units.iter_mut().try_for_each(|u| u.home())
    }

    pub fn reset(&mut self) {
        self.units.iter_mut().for_each(|u| u.reset());
    }

    pub fn select(&mut self, tool: Option<usize>) -> RmmuResult<()> {
        match tool {
            Some(t) => {
                let (unit, slot) = self.unit_for(t)?;
                unit.select(Some(slot))
            }
            None => self.units.iter_mut().try_for_each(|u| u.select(None)),
        }
    }

    /// Loads `tool` into its empty toolhead.
    pub fn load(&mut self, tool: usize) -> RmmuResult<()> {
        let (unit, slot) = self.unit_for(tool)?;
        if unit.toolhead_has_filament() {
            return Err(RmmuError::sensor(Some(tool), "another filament is already loaded"));
        }
        unit.load(slot, LoadIntent::Fresh)
    }

    /// Unloads `tool`, or whatever the first unit with a loaded filament holds.
    pub fn unload(&mut self, tool: Option<usize>) -> RmmuResult<()> {
        let (unit, slot) = match tool {
            Some(t) => self.unit_for(t)?,
            None => {
                let unit = self
                    .units
                    .iter_mut()
                    .find(|u| u.state().loaded_slot.is_some())
                    .ok_or_else(|| RmmuError::sensor(None, "can not unload unknown filament"))?;
                let slot = unit.state().loaded_slot.unwrap_or_default();
                (unit, slot)
            }
        };
        unit.unload(slot, UnloadIntent::Manual)
    }

    pub fn eject(&mut self, tool: Option<usize>) -> RmmuResult<()> {
        for (u, slot) in self.targets(tool)? {
            self.units[u].eject(slot)?;
        }
        Ok(())
    }

    pub fn home_filaments(&mut self, tool: Option<usize>) -> RmmuResult<()> {
        for (u, slot) in self.targets(tool)? {
            self.units[u].home_filaments(slot)?;
        }
        Ok(())
    }

    /// Calibrates every unit that has per-tool parking sensors.
    pub fn calibrate(&mut self) -> RmmuResult<Vec<f64>> {
        let mut lengths = Vec::new();
        for unit in self.units.iter_mut().filter(|u| u.params().has_tool_endstops()) {
            lengths.push(unit.calibrate()?);
        }
        if lengths.is_empty() {
            return Err(RmmuError::config(None, "no unit has per-tool parking sensors"));
        }
        Ok(lengths)
    }

    pub fn move_filament(&mut self, tool: usize, distance: f64, speed: f64, accel: f64, sync: bool) -> RmmuResult<()> {
        let (unit, slot) = self.unit_for(tool)?;
        unit.move_filament(slot, distance, speed, accel, sync)
    }

    pub fn query_sensors(&self) -> Vec<SensorReport> {
        self.units.iter().map(|u| u.query_sensors()).collect()
    }

    /// Checks every tool the print needs, after remapping, then the join groups.
    pub fn test_filaments(&mut self, required: &BTreeSet<usize>) -> RmmuResult<()> {
        log::info!("Testing needed filaments...");
        let result = self.test_required_filaments(required);
        for unit in self.units.iter_mut().filter(|u| u.state().selected_slot.is_some()) {
            unit.select(None)?;
        }
        result?;
        self.routing.validate_join_for(required)?;
        log::info!("All needed filaments available");
        Ok(())
    }

    fn test_required_filaments(&mut self, required: &BTreeSet<usize>) -> RmmuResult<()> {
        for &tool in required {
            let physical = self.routing.remapped(tool);
            let (unit, slot) = self.unit_for(physical)?;
            if !unit.test_filament(slot)? {
                return Err(RmmuError::sensor(Some(physical), "filament not available"));
            }
        }
        Ok(())
    }

    // --- routing ---

    /// Adds a remap pair, or clears the table for `None`.
    pub fn remap(&mut self, pair: Option<Vec<usize>>) -> RmmuResult<()> {
        let printing = self.active_print.is_some();
        match pair {
            Some(pair) => self.routing.remap(pair, printing)?,
            None => self.routing.clear_remap(printing)?,
        }
        self.notifier.notify(RmmuEvent::RemapChanged { groups: self.routing.remap_table().groups().to_vec() });
        Ok(())
    }

    /// Adds a spool join group, or clears every group for `None`.
    pub fn join(&mut self, group: Option<Vec<usize>>) -> RmmuResult<()> {
        match group {
            Some(group) => {
                let mut units = BTreeSet::new();
                for &tool in &group {
                    units.insert(self.locate(tool)?.0);
                }
                if units.len() > 1 {
                    return Err(RmmuError::routing(None, "joined spools must belong to the same unit"));
                }
                let required = self.active_print.as_ref().map(|p| &p.required_tools);
                self.routing.join(group, required)?;
            }
            None => self.routing.clear_join(),
        }
        self.notifier
            .notify(RmmuEvent::SpoolJoinChanged { groups: self.routing.join_table().groups().to_vec() });
        Ok(())
    }

    // --- print lifecycle ---

    /// Records the print, homes every unit and makes sure the initial toolhead holds either
    /// nothing or the initial tool.
    pub fn start_print(&mut self, job: PrintJob) -> RmmuResult<()> {
        let initial = self.routing.remapped(job.initial_tool);
        let (u, slot) = self.locate(initial)?;
        log::info!("Starting print with T{}", job.initial_tool);

        self.routing.clear_substitutions();
        for unit in self.units.iter_mut() {
            unit.start_print(job.clone());
        }
        self.active_print = Some(job);

        if let Err(e) = self.prepare_initial_toolhead(u, slot) {
            log::error!("Print start aborted: {}", e);
            self.active_print = None;
            self.units.iter_mut().for_each(|unit| unit.end_print());
            return Err(e);
        }
        Ok(())
    }

    fn prepare_initial_toolhead(&mut self, u: usize, slot: usize) -> RmmuResult<()> {
        self.home()?;
        let unit = &mut self.units[u];
        unit.set_needs_initial_purging(true);
        if !unit.toolhead_has_filament() {
            return Ok(());
        }
        match unit.saved_loaded_filament() {
            (Some(loaded), _) if loaded == slot => {
                unit.set_needs_initial_purging(false);
                Ok(())
            }
            (Some(loaded), Some(temperature)) if unit.can_extrude_at(temperature) => {
                log::info!("Wrong filament T{} in hotend, unloading it...", loaded);
                unit.preheat(temperature);
                self.notifier.notify(RmmuEvent::MoveToLoadingPosition { toolhead: unit.params().toolhead });
                unit.unload_at_temperature(loaded, temperature)
            }
            _ => Err(RmmuError::sensor(None, "unknown filament in toolhead, unload it and restart the print")),
        }
    }

    pub fn end_print(&mut self) {
        self.units.iter_mut().for_each(|u| u.end_print());
        self.routing.reset();
        self.active_print = None;
    }

    /// Tool change during a print.
    pub fn change_filament(&mut self, tool: usize) -> RmmuResult<()> {
        let physical = self.routing.resolve(tool);
        let (u, slot) = self.locate(physical)?;
        let unit = &mut self.units[u];
        self.notifier.notify(RmmuEvent::BeforeFilamentChange { toolhead: unit.params().toolhead, tool: slot });

        if !unit.toolhead_has_filament() {
            return Err(RmmuError::sensor(Some(physical), "toolhead sensor should be triggered but is not"));
        }
        let loaded = unit
            .state()
            .loaded_slot
            .ok_or_else(|| RmmuError::sensor(Some(physical), "filament in toolhead is unknown"))?;
        unit.unload(loaded, UnloadIntent::ToolChange)?;
        unit.load(slot, LoadIntent::Fresh)
    }

    // --- sensor events ---

    /// Runout on logical `tool`. Without a clog, tries the other spools joined with it.
    pub fn on_runout(&mut self, tool: usize, clogged: bool) -> RmmuResult<()> {
        let (u, slot) = self.locate(tool)?;
        self.units[u].on_runout(slot, clogged)?;
        if clogged {
            return Ok(());
        }

        for candidate in self.routing.join_candidates(tool) {
            // Join groups never span units.
            let (cu, cslot) = self.locate(candidate)?;
            debug_assert_eq!(cu, u);
            let unit = &mut self.units[u];
            if !unit.test_filament(cslot)? {
                log::warn!("Spool T{} not available", candidate);
                continue;
            }
            match unit.load(cslot, LoadIntent::Fresh) {
                Ok(()) => {
                    self.routing.substitute(tool, candidate);
                    self.notifier.notify(RmmuEvent::AfterInsert { toolhead: unit.params().toolhead, tool: cslot });
                    self.print.lock().resume();
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Can not join spool T{}: {}", candidate, e);
                    unit.move_filament(cslot, JOIN_FAILURE_RETRACT, JOIN_FAILURE_SPEED, JOIN_FAILURE_ACCEL, true)?;
                    if unit.toolhead_has_filament() {
                        return Err(RmmuError::sensor(
                            Some(candidate),
                            "toolhead sensor still triggered after a failed join",
                        ));
                    }
                }
            }
        }
        log::info!("Load new filament T{} into the hotend and resume the print", tool);
        Ok(())
    }

    pub fn on_insert(&mut self, tool: usize) -> RmmuResult<()> {
        let (unit, slot) = self.unit_for(tool)?;
        unit.on_insert(slot)
    }

    pub fn get_status(&self) -> HubStatus {
        let mut mapping = Vec::with_capacity(self.total_tool_count());
        for unit in &self.units {
            for slot in 0..unit.tool_count() {
                mapping.push(ToolMapping { tool: mapping.len(), toolhead: unit.params().toolhead, slot });
            }
        }
        HubStatus {
            total_tool_count: self.total_tool_count(),
            initial_tool: self.active_print.as_ref().map(|p| p.initial_tool),
            mapping,
            remap: self.routing.remap_table().groups().to_vec(),
            spool_joins: self.routing.join_table().groups().to_vec(),
            substitutions: self.routing.substitutions().clone(),
            units: self.units.iter().map(|u| u.get_status()).collect(),
        }
    }
}
