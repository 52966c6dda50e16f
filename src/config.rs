use serde::{Deserialize, Serialize};

/// Settings of a [`StiffnessMatrix`](crate::stiffness::StiffnessMatrix).
///
/// Missing fields take their default values when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StiffnessMatrixConfig {
    pub name: String,
    /// Reassemble on every call, using the current solution.
    pub is_nonlinear: bool,
    /// Accept rows without incident elements and assembly without any terms.
    pub allow_zero_element_contributions: bool,
    /// Evaluate element blocks on the rayon thread pool.
    pub parallel_element_loop: bool,
    /// Log every element block at debug level.
    pub print_element_blocks: bool,
}

impl Default for StiffnessMatrixConfig {
    fn default() -> Self {
        Self {
            name: "stiffness".to_string(),
            is_nonlinear: false,
            allow_zero_element_contributions: false,
            parallel_element_loop: false,
            print_element_blocks: false,
        }
    }
}

impl StiffnessMatrixConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn nonlinear(self, is_nonlinear: bool) -> Self {
        Self { is_nonlinear, ..self }
    }

    pub fn allow_zero_element_contributions(self, allow: bool) -> Self {
        Self {
            allow_zero_element_contributions: allow,
            ..self
        }
    }

    pub fn parallel_element_loop(self, parallel: bool) -> Self {
        Self {
            parallel_element_loop: parallel,
            ..self
        }
    }

    pub fn print_element_blocks(self, print: bool) -> Self {
        Self {
            print_element_blocks: print,
            ..self
        }
    }
}
