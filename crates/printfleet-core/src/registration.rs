// ── Capability-gated registration ──
//
// Optional features (entities) are declared as descriptors per platform.
// Whether a descriptor is representable depends on the device's current
// capability snapshot: unsupported features are dropped permanently,
// currently-unavailable ones are deferred and re-checked after every
// successful refresh, available ones are promoted exactly once.

use std::collections::HashMap;

use printfleet_api::{DeviceId, DeviceStatus, MaterialKind, StationSlot};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

/// Presentation platform a descriptor belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Sensor,
    BinarySensor,
    Button,
    Switch,
    Number,
    Select,
}

/// Declarative unit describing one optional capability-gated feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub key: String,
    /// Only representable on this process family, if set.
    pub material: Option<MaterialKind>,
    /// Requires this material-station bay to be connected, if set.
    pub station_slot: Option<StationSlot>,
    /// Requires a drying-capable station to be attached.
    pub needs_dryer: bool,
}

impl EntityDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            material: None,
            station_slot: None,
            needs_dryer: false,
        }
    }

    pub fn for_material(mut self, material: MaterialKind) -> Self {
        self.material = Some(material);
        self
    }

    pub fn requires_station(mut self, slot: StationSlot) -> Self {
        self.station_slot = Some(slot);
        self
    }

    pub fn requires_dryer(mut self) -> Self {
        self.needs_dryer = true;
        self
    }
}

/// The capability fields registration decisions read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub material_kind: MaterialKind,
    pub supports_station: bool,
    pub station_count: u8,
}

impl From<&DeviceStatus> for CapabilitySnapshot {
    fn from(status: &DeviceStatus) -> Self {
        Self {
            material_kind: status.material_kind,
            supports_station: status.supports_station,
            station_count: status.station_count,
        }
    }
}

/// Outcome of one exclusion rule for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// The feature can never exist on this device. Discard the descriptor.
    Drop,
    /// Supported but not currently available. Keep for the next evaluation.
    Defer,
    /// Not excluded by this rule.
    Allow,
}

/// One exclusion predicate. Rules run in a fixed declared order; the first
/// non-`Allow` verdict decides the descriptor's fate for this evaluation.
trait ExclusionRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, descriptor: &EntityDescriptor, caps: &CapabilitySnapshot) -> Verdict;
}

/// Wrong process family: a resin-only feature on an FDM machine (or vice
/// versa) can never materialize.
struct MaterialKindRule;

impl ExclusionRule for MaterialKindRule {
    fn name(&self) -> &'static str {
        "material_kind"
    }

    fn evaluate(&self, descriptor: &EntityDescriptor, caps: &CapabilitySnapshot) -> Verdict {
        match descriptor.material {
            Some(required) if required != caps.material_kind => Verdict::Drop,
            _ => Verdict::Allow,
        }
    }
}

/// Firmware without station support will never grow it.
struct StationSupportRule;

impl ExclusionRule for StationSupportRule {
    fn name(&self) -> &'static str {
        "station_support"
    }

    fn evaluate(&self, descriptor: &EntityDescriptor, caps: &CapabilitySnapshot) -> Verdict {
        let needs_station = descriptor.station_slot.is_some() || descriptor.needs_dryer;
        if needs_station && !caps.supports_station {
            Verdict::Drop
        } else {
            Verdict::Allow
        }
    }
}

/// The required bay is not connected right now -- it may be plugged in
/// later, so defer rather than drop.
struct StationCountRule;

impl ExclusionRule for StationCountRule {
    fn name(&self) -> &'static str {
        "station_count"
    }

    fn evaluate(&self, descriptor: &EntityDescriptor, caps: &CapabilitySnapshot) -> Verdict {
        match descriptor.station_slot {
            Some(slot) if caps.station_count < slot.required_units() => Verdict::Defer,
            _ => Verdict::Allow,
        }
    }
}

/// Drying needs at least one connected station unit.
struct DryerRule;

impl ExclusionRule for DryerRule {
    fn name(&self) -> &'static str {
        "dryer"
    }

    fn evaluate(&self, descriptor: &EntityDescriptor, caps: &CapabilitySnapshot) -> Verdict {
        if descriptor.needs_dryer && caps.station_count == 0 {
            Verdict::Defer
        } else {
            Verdict::Allow
        }
    }
}

/// Fixed evaluation order: permanent exclusions first, availability last.
fn exclusion_rules() -> &'static [&'static dyn ExclusionRule] {
    &[
        &MaterialKindRule,
        &StationSupportRule,
        &StationCountRule,
        &DryerRule,
    ]
}

/// A descriptor that became instantiable. Broadcast once; the presentation
/// layer constructs the concrete entity.
#[derive(Debug, Clone)]
pub struct EntityAddition {
    pub device: DeviceId,
    pub platform: Platform,
    pub descriptor: EntityDescriptor,
}

/// Tracks deferred descriptors per (device, platform) and re-evaluates
/// them against fresh capability snapshots.
#[derive(Debug, Default)]
pub(crate) struct RegistrationEngine {
    pending: HashMap<(DeviceId, Platform), Vec<EntityDescriptor>>,
}

impl RegistrationEngine {
    /// Queue a platform's descriptor list for every listed device.
    pub(crate) fn register(
        &mut self,
        devices: &[DeviceId],
        platform: Platform,
        descriptors: &[EntityDescriptor],
    ) {
        for &device in devices {
            self.pending
                .insert((device, platform), descriptors.to_vec());
        }
    }

    /// Evaluate all pending descriptors. `caps_of` resolves a device's
    /// current capability snapshot; unresolved devices stay pending whole.
    ///
    /// Returns the descriptors promoted by this pass. Running twice against
    /// unchanged capabilities promotes nothing the second time.
    pub(crate) fn evaluate<F>(&mut self, caps_of: F) -> Vec<EntityAddition>
    where
        F: Fn(DeviceId) -> Option<CapabilitySnapshot>,
    {
        let mut promoted = Vec::new();

        self.pending.retain(|&(device, platform), descriptors| {
            let Some(caps) = caps_of(device) else {
                // No data for this device yet; try again next refresh.
                return true;
            };

            descriptors.retain(|descriptor| {
                for rule in exclusion_rules() {
                    match rule.evaluate(descriptor, &caps) {
                        Verdict::Drop => {
                            debug!(
                                device = %device,
                                key = %descriptor.key,
                                rule = rule.name(),
                                "descriptor permanently ineligible"
                            );
                            return false;
                        }
                        Verdict::Defer => return true,
                        Verdict::Allow => {}
                    }
                }

                promoted.push(EntityAddition {
                    device,
                    platform,
                    descriptor: descriptor.clone(),
                });
                false
            });

            !descriptors.is_empty()
        });

        if !promoted.is_empty() {
            debug!(count = promoted.len(), "descriptors promoted");
        }
        promoted
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}
