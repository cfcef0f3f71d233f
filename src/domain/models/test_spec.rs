//! Concrete run descriptors produced by the test list loader.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest seed the simulator accepts (31-bit, non-negative).
pub const MAX_SEED: u32 = 0x7FFF_FFFF;

/// Identifier linking the repeated runs of one `run_cnt` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// One concrete simulator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique run identifier (e.g. `axi4_wstrb_test_3`)
    pub name: String,

    /// Logical test passed to the simulator (e.g. `axi4_wstrb_test`)
    pub base_name: String,

    /// 1..N within a repeated group, 1 for single runs
    pub run_index: u32,

    /// Fixed seed; generated at run time when absent
    pub seed: Option<u32>,

    /// Opaque string appended to the simulator invocation
    pub extra_args: Option<String>,

    /// Present when the run came from a `run_cnt` directive
    pub group_id: Option<GroupId>,

    /// Position in the expanded list
    pub sequence: usize,
}

impl TestSpec {
    /// A single run with no parameters.
    pub fn single(name: impl Into<String>, sequence: usize) -> Self {
        let name = name.into();
        Self {
            base_name: name.clone(),
            name,
            run_index: 1,
            seed: None,
            extra_args: None,
            group_id: None,
            sequence,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, extra_args: impl Into<String>) -> Self {
        self.extra_args = Some(extra_args.into());
        self
    }

    pub const fn is_repeated(&self) -> bool {
        self.group_id.is_some()
    }
}

impl fmt::Display for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(seed) = self.seed {
            write!(f, " seed={seed}")?;
        }
        if let Some(ref extra) = self.extra_args {
            write!(f, " command_add={extra}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_spec_uses_name_as_base() {
        let spec = TestSpec::single("axi4_basic_test", 0);
        assert_eq!(spec.base_name, "axi4_basic_test");
        assert_eq!(spec.run_index, 1);
        assert!(!spec.is_repeated());
    }

    #[test]
    fn display_includes_parameters() {
        let spec = TestSpec::single("t1", 0)
            .with_seed(42)
            .with_extra_args("+define+FAST");
        assert_eq!(spec.to_string(), "t1 seed=42 command_add=+define+FAST");
    }
}
