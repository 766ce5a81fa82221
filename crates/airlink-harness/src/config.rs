//! TOML sweep plans.
//!
//! ```toml
//! repeat = 4
//! checksum = true
//!
//! [link]
//! transmitter = "02:00:00:00:00:01"
//! receiver = "02:00:00:00:00:02"
//! suite = "ccmp-128"
//! key = "000102030405060708090a0b0c0d0e0f"
//! channel = 6
//!
//! [[items]]
//! name = "power"
//! start = 0
//! end = 20
//! step = 5
//!
//! [[exclude]]
//! items = [{ name = "power", start = 15 }]
//! ```

use crate::assessor::Assessor;
use crate::changeset::ChangeSet;
use crate::loopback::FaultPolicy;
use crate::sweeper::SweeperConfig;
use crate::transmit_action::DEFAULT_PAYLOAD_LEN;
use crate::{Error, Result};
use airlink_core::{LinkParams, MacAddr};
use airlink_crypto::CipherSuite;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// A sweep plan loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    /// Probes per combination.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Append a checksum to every probe.
    #[serde(default)]
    pub checksum: bool,
    /// Probe length when no `length` axis is swept.
    #[serde(default = "default_payload_len")]
    pub payload_len: usize,
    /// Swept axes, first varying fastest.
    #[serde(default)]
    pub items: Vec<ItemEntry>,
    /// Excluded range groups.
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    /// The `[link]` section.
    #[serde(default)]
    pub link: LinkSection,
    /// The `[sweeper]` section.
    #[serde(default)]
    pub sweeper: SweeperSection,
    /// The `[faults]` section.
    #[serde(default)]
    pub faults: FaultSection,
}

fn default_repeat() -> u32 {
    1
}

fn default_payload_len() -> usize {
    DEFAULT_PAYLOAD_LEN
}

/// A `[[items]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemEntry {
    /// Axis name.
    pub name: String,
    /// First value.
    pub start: i32,
    /// Last value; defaults to `start`.
    pub end: Option<i32>,
    /// Increment, negative to walk down.
    #[serde(default = "default_step")]
    pub step: i32,
}

fn default_step() -> i32 {
    1
}

/// A `[[exclude]]` entry: ranges that must all match to exclude.
#[derive(Debug, Clone, Deserialize)]
pub struct ExcludeEntry {
    /// Ranges of the group.
    pub items: Vec<RangeEntry>,
}

/// One excluded range. A missing `end` is open-ended.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeEntry {
    /// Axis name.
    pub name: String,
    /// Lowest excluded value.
    pub start: i32,
    /// Highest excluded value.
    pub end: Option<i32>,
}

/// Hex key material; never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct HexKey(String);

impl core::fmt::Debug for HexKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("HexKey(..)")
    }
}

/// The `[link]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSection {
    /// Transmitting station address.
    #[serde(default = "default_transmitter")]
    pub transmitter: String,
    /// Receiving station address.
    #[serde(default = "default_receiver")]
    pub receiver: String,
    /// Cipher suite name; unset sends plaintext.
    pub suite: Option<String>,
    /// Pairwise key in hex.
    pub key: Option<HexKey>,
    /// Starting channel number.
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Refuse unprotected data on both ends.
    #[serde(default)]
    pub require_protection: bool,
}

fn default_transmitter() -> String {
    "02:00:00:00:00:01".to_string()
}

fn default_receiver() -> String {
    "02:00:00:00:00:02".to_string()
}

fn default_channel() -> u8 {
    1
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            transmitter: default_transmitter(),
            receiver: default_receiver(),
            suite: None,
            key: None,
            channel: default_channel(),
            require_protection: false,
        }
    }
}

/// The `[sweeper]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperSection {
    /// First retry back-off.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Back-off ceiling.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Retries per combination.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Time a stop request may take.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_backoff_ms() -> u64 {
    1
}

fn default_max_backoff_ms() -> u64 {
    64
}

fn default_max_retries() -> u32 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

/// The `[faults]` section, applied to the loopback radio.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaultSection {
    /// Refuse every n-th submission.
    pub queue_full_every: Option<u64>,
    /// Lose every n-th queued frame.
    pub drop_every: Option<u64>,
}

impl PlanConfig {
    /// Load a plan from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read plan file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse a plan from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        let plan: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("failed to parse plan: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(Error::Config("plan has no [[items]]".into()));
        }
        if let Some(item) = self.items.iter().find(|item| item.name.is_empty()) {
            return Err(Error::Config(format!("item starting at {} has no name", item.start)));
        }
        if self.exclude.iter().any(|group| group.items.is_empty()) {
            return Err(Error::Config("empty [[exclude]] group".into()));
        }
        self.link.transmitter()?;
        self.link.receiver()?;
        self.link.params()?;
        self.link.cipher()?;
        Ok(())
    }

    /// Change set built from `[[items]]`.
    pub fn changeset(&self) -> ChangeSet {
        let mut cs = ChangeSet::new();
        for item in &self.items {
            cs.add(item.name.as_str(), item.start, item.end.unwrap_or(item.start), item.step);
        }
        cs
    }

    /// Assessor built from `[[exclude]]`.
    pub fn assessor(&self) -> Assessor {
        let mut assessor = Assessor::new();
        for group in &self.exclude {
            let mut ranges = ChangeSet::new();
            for range in &group.items {
                ranges.add_range(range.name.as_str(), range.start, range.end);
            }
            assessor.exclude(ranges);
        }
        assessor
    }

    /// Sweeper settings from `[sweeper]`.
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            backoff: Duration::from_millis(self.sweeper.backoff_ms),
            max_backoff: Duration::from_millis(self.sweeper.max_backoff_ms),
            max_retries: self.sweeper.max_retries,
        }
    }

    /// How long a stop request may take.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.sweeper.stop_timeout_ms)
    }

    /// Loopback fault injection from `[faults]`.
    pub fn fault_policy(&self) -> FaultPolicy {
        FaultPolicy {
            queue_full_every: self.faults.queue_full_every,
            drop_every: self.faults.drop_every,
        }
    }
}

impl LinkSection {
    /// Transmitting station address.
    pub fn transmitter(&self) -> Result<MacAddr> {
        parse_addr(&self.transmitter)
    }

    /// Receiving station address.
    pub fn receiver(&self) -> Result<MacAddr> {
        parse_addr(&self.receiver)
    }

    /// Link parameters for the configured channel.
    pub fn params(&self) -> Result<LinkParams> {
        Ok(LinkParams::for_channel(self.channel)?)
    }

    /// Cipher suite and key, or `None` for an open link.
    pub fn cipher(&self) -> Result<Option<(CipherSuite, Vec<u8>)>> {
        let (suite, key) = match (&self.suite, &self.key) {
            (None, None) => return Ok(None),
            (Some(suite), Some(key)) => (suite, key),
            (Some(_), None) => return Err(Error::Config("cipher suite set without a key".into())),
            (None, Some(_)) => return Err(Error::Config("key set without a cipher suite".into())),
        };
        let suite = CipherSuite::from_name(suite)
            .ok_or_else(|| Error::Config(format!("unknown cipher suite: {suite}")))?;
        let key = hex::decode(&key.0).map_err(|e| Error::Config(format!("invalid key: {e}")))?;
        if key.len() != suite.key_len() {
            return Err(Error::Config(format!(
                "{suite} needs a {}-byte key, got {}",
                suite.key_len(),
                key.len()
            )));
        }
        Ok(Some((suite, key)))
    }
}

fn parse_addr(s: &str) -> Result<MacAddr> {
    s.parse()
        .map_err(|e| Error::Config(format!("invalid address '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
repeat = 3
checksum = true

[link]
suite = "gcmp-256"
key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
channel = 36

[sweeper]
backoff_ms = 2
max_retries = 10

[faults]
drop_every = 7

[[items]]
name = "power"
start = 0
end = 2

[[items]]
name = "channel"
start = 36
end = 44
step = 4

[[exclude]]
items = [{ name = "power", start = 2 }, { name = "channel", start = 40, end = 40 }]
"#;

    #[test]
    fn test_parse_full_plan() {
        let plan = PlanConfig::parse(PLAN).unwrap();
        assert_eq!(plan.repeat, 3);
        assert!(plan.checksum);
        assert_eq!(plan.payload_len, DEFAULT_PAYLOAD_LEN);

        let cs = plan.changeset();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.combinations(), 9);

        let (suite, key) = plan.link.cipher().unwrap().unwrap();
        assert_eq!(suite, CipherSuite::Gcmp256);
        assert_eq!(key.len(), 32);
        assert_eq!(plan.link.params().unwrap().frequency_mhz, 5180);
        assert_eq!(
            plan.link.receiver().unwrap(),
            MacAddr([0x02, 0, 0, 0, 0, 0x02])
        );

        let config = plan.sweeper_config();
        assert_eq!(config.backoff, Duration::from_millis(2));
        assert_eq!(config.max_backoff, Duration::from_millis(64));
        assert_eq!(config.max_retries, 10);
        assert_eq!(plan.fault_policy().drop_every, Some(7));
        assert_eq!(plan.fault_policy().queue_full_every, None);
    }

    #[test]
    fn test_assessor_from_plan() {
        let plan = PlanConfig::parse(PLAN).unwrap();
        let assessor = plan.assessor();
        let mut cs = plan.changeset();
        let mut rejected = Vec::new();
        let mut more = cs.init();
        while more {
            if !assessor.assess(&cs) {
                rejected.push(cs.snapshot());
            }
            more = cs.iter();
        }
        assert_eq!(
            rejected,
            vec![vec![("power".to_string(), 2), ("channel".to_string(), 40)]]
        );
    }

    #[test]
    fn test_single_value_item() {
        let plan = PlanConfig::parse("[[items]]\nname = \"mcs\"\nstart = 7\n").unwrap();
        assert_eq!(plan.repeat, 1);
        let cs = plan.changeset();
        assert_eq!(cs.combinations(), 1);
        assert_eq!(cs.value("mcs"), Some(7));
        assert!(plan.link.cipher().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_plans() {
        let cases = [
            "",
            "repeat = \"lots\"\n[[items]]\nname = \"a\"\nstart = 0\n",
            "[[items]]\nname = \"\"\nstart = 0\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[[exclude]]\nitems = []\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nsuite = \"wep\"\nkey = \"00\"\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nsuite = \"ccmp\"\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nsuite = \"ccmp\"\nkey = \"0011\"\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nsuite = \"ccmp\"\nkey = \"zz\"\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nchannel = 15\n",
            "[[items]]\nname = \"a\"\nstart = 0\n[link]\nreceiver = \"02:00\"\n",
        ];
        for case in cases {
            assert!(
                matches!(PlanConfig::parse(case), Err(Error::Config(_)) | Err(Error::Core(_))),
                "accepted: {case:?}"
            );
        }
    }

    #[test]
    fn test_key_not_in_debug_output() {
        let plan = PlanConfig::parse(PLAN).unwrap();
        let shown = format!("{plan:?}");
        assert!(!shown.contains("0001020304"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PlanConfig::load(Path::new("/nonexistent/plan.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
