// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::common::config::BridgeConfig;
use crate::engine::ffi::{
    Policy, PolicyConditionParams, POLICY_ACTION_NONE, POLICY_FAILURE_NONE,
    POLICY_ISOLATION_NONE, POLICY_MODE_AUTOMATED, POLICY_VALID_NONE,
};

/// The policy conditions the engine can watch (`DCGM_POLICY_COND_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PolicyCondition {
    /// Double-bit ECC errors
    DoubleBitError,
    /// PCIe replay errors
    Pcie,
    /// Retired memory pages above the threshold
    RetiredPages,
    /// Temperature above the threshold
    Thermal,
    /// Power draw above the threshold
    Power,
    /// NVLink errors
    Nvlink,
    /// XID errors
    Xid,
}

impl PolicyCondition {
    pub const ALL: [PolicyCondition; 7] = [
        PolicyCondition::DoubleBitError,
        PolicyCondition::Pcie,
        PolicyCondition::RetiredPages,
        PolicyCondition::Thermal,
        PolicyCondition::Power,
        PolicyCondition::Nvlink,
        PolicyCondition::Xid,
    ];

    /// Position in `dcgmPolicy_t::parms` (`DCGM_POLICY_COND_IDX_*`).
    pub const fn index(self) -> usize {
        match self {
            PolicyCondition::DoubleBitError => 0,
            PolicyCondition::Pcie => 1,
            PolicyCondition::RetiredPages => 2,
            PolicyCondition::Thermal => 3,
            PolicyCondition::Power => 4,
            PolicyCondition::Nvlink => 5,
            PolicyCondition::Xid => 6,
        }
    }

    /// The condition's bit in the engine's condition mask.
    pub const fn mask(self) -> u32 {
        1 << self.index()
    }

    /// Decode a mask with exactly one condition bit set.
    pub fn from_mask(bits: u32) -> Option<Self> {
        if bits.count_ones() != 1 {
            return None;
        }
        Self::ALL.into_iter().find(|c| c.mask() == bits)
    }

    /// Every condition whose bit is set in `mask`.
    pub fn in_mask(mask: u32) -> impl Iterator<Item = PolicyCondition> {
        Self::ALL.into_iter().filter(move |c| mask & c.mask() != 0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyCondition::DoubleBitError => "dbe",
            PolicyCondition::Pcie => "pcie",
            PolicyCondition::RetiredPages => "retired-pages",
            PolicyCondition::Thermal => "thermal",
            PolicyCondition::Power => "power",
            PolicyCondition::Nvlink => "nvlink",
            PolicyCondition::Xid => "xid",
        }
    }
}

impl fmt::Display for PolicyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbe" | "double-bit-error" => Ok(PolicyCondition::DoubleBitError),
            "pcie" | "pci" => Ok(PolicyCondition::Pcie),
            "retired-pages" | "mpr" | "max-pages-retired" => Ok(PolicyCondition::RetiredPages),
            "thermal" => Ok(PolicyCondition::Thermal),
            "power" => Ok(PolicyCondition::Power),
            "nvlink" => Ok(PolicyCondition::Nvlink),
            "xid" => Ok(PolicyCondition::Xid),
            other => Err(format!("unknown policy condition: {other}")),
        }
    }
}

/// Combined engine mask for a set of conditions.
pub fn condition_mask(conditions: &[PolicyCondition]) -> u32 {
    conditions.iter().fold(0, |mask, c| mask | c.mask())
}

/// Trigger levels for the threshold-based conditions. The remaining conditions
/// fire on any occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyThresholds {
    pub max_retired_pages: u64,
    pub max_temperature_c: u64,
    pub max_power_w: u64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            max_retired_pages: BridgeConfig::DEFAULT_MAX_RETIRED_PAGES,
            max_temperature_c: BridgeConfig::DEFAULT_MAX_TEMPERATURE_C,
            max_power_w: BridgeConfig::DEFAULT_MAX_POWER_W,
        }
    }
}

impl PolicyThresholds {
    fn params_for(&self, condition: PolicyCondition) -> PolicyConditionParams {
        match condition {
            PolicyCondition::RetiredPages => PolicyConditionParams::llong(self.max_retired_pages),
            PolicyCondition::Thermal => PolicyConditionParams::llong(self.max_temperature_c),
            PolicyCondition::Power => PolicyConditionParams::llong(self.max_power_w),
            PolicyCondition::DoubleBitError
            | PolicyCondition::Pcie
            | PolicyCondition::Nvlink
            | PolicyCondition::Xid => PolicyConditionParams::boolean(true),
        }
    }

    /// Take `other`'s limits for the threshold conditions in `conditions`,
    /// keeping the rest.
    pub(crate) fn merge(&mut self, other: &PolicyThresholds, conditions: &[PolicyCondition]) {
        for condition in conditions {
            match condition {
                PolicyCondition::RetiredPages => self.max_retired_pages = other.max_retired_pages,
                PolicyCondition::Thermal => self.max_temperature_c = other.max_temperature_c,
                PolicyCondition::Power => self.max_power_w = other.max_power_w,
                _ => {}
            }
        }
    }

    /// Build the `dcgmPolicy_t` watching `conditions`.
    pub(crate) fn to_policy(self, conditions: &[PolicyCondition]) -> Policy {
        let mut policy = Policy::zeroed();
        policy.condition = condition_mask(conditions);
        policy.mode = POLICY_MODE_AUTOMATED;
        policy.isolation = POLICY_ISOLATION_NONE;
        policy.action = POLICY_ACTION_NONE;
        policy.validation = POLICY_VALID_NONE;
        policy.response = POLICY_FAILURE_NONE;
        for condition in conditions {
            policy.parms[condition.index()] = self.params_for(*condition);
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ffi::{POLICY_PARAM_BOOL, POLICY_PARAM_LLONG};

    #[test]
    fn test_masks_match_engine_bits() {
        assert_eq!(PolicyCondition::DoubleBitError.mask(), 0x1);
        assert_eq!(PolicyCondition::Pcie.mask(), 0x2);
        assert_eq!(PolicyCondition::RetiredPages.mask(), 0x4);
        assert_eq!(PolicyCondition::Thermal.mask(), 0x8);
        assert_eq!(PolicyCondition::Power.mask(), 0x10);
        assert_eq!(PolicyCondition::Nvlink.mask(), 0x20);
        assert_eq!(PolicyCondition::Xid.mask(), 0x40);
    }

    #[test]
    fn test_from_mask() {
        for condition in PolicyCondition::ALL {
            assert_eq!(PolicyCondition::from_mask(condition.mask()), Some(condition));
        }
        assert_eq!(PolicyCondition::from_mask(0), None);
        assert_eq!(PolicyCondition::from_mask(0x3), None);
        assert_eq!(PolicyCondition::from_mask(0x80), None);
    }

    #[test]
    fn test_in_mask_and_condition_mask() {
        let conditions = [PolicyCondition::Xid, PolicyCondition::Thermal];
        let mask = condition_mask(&conditions);
        assert_eq!(mask, 0x48);
        let decoded: Vec<_> = PolicyCondition::in_mask(mask).collect();
        assert_eq!(decoded, vec![PolicyCondition::Thermal, PolicyCondition::Xid]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("XID".parse::<PolicyCondition>(), Ok(PolicyCondition::Xid));
        assert_eq!(
            "mpr".parse::<PolicyCondition>(),
            Ok(PolicyCondition::RetiredPages)
        );
        assert!("fan".parse::<PolicyCondition>().is_err());
        for condition in PolicyCondition::ALL {
            assert_eq!(condition.to_string().parse::<PolicyCondition>(), Ok(condition));
        }
    }

    #[test]
    fn test_to_policy() {
        let thresholds = PolicyThresholds {
            max_power_w: 300,
            ..Default::default()
        };
        let policy = thresholds.to_policy(&[PolicyCondition::Power, PolicyCondition::Xid]);
        assert_eq!(policy.version, Policy::VERSION);
        assert_eq!(policy.condition, 0x50);

        let power = policy.parms[PolicyCondition::Power.index()];
        assert_eq!(power.tag, POLICY_PARAM_LLONG);
        assert_eq!(unsafe { power.val.llval }, 300);

        let xid = policy.parms[PolicyCondition::Xid.index()];
        assert_eq!(xid.tag, POLICY_PARAM_BOOL);
        assert_eq!(unsafe { xid.val.boolean }, 1);
    }

    #[test]
    fn test_merge_only_touches_named_conditions() {
        let mut live = PolicyThresholds {
            max_temperature_c: 90,
            ..Default::default()
        };
        let incoming = PolicyThresholds {
            max_temperature_c: 70,
            max_power_w: 400,
            ..Default::default()
        };
        live.merge(&incoming, &[PolicyCondition::Power, PolicyCondition::Xid]);
        assert_eq!(live.max_temperature_c, 90);
        assert_eq!(live.max_power_w, 400);
        assert_eq!(live.max_retired_pages, BridgeConfig::DEFAULT_MAX_RETIRED_PAGES);
    }
}
