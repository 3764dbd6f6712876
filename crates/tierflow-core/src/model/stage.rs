//! Stage definition

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named environment (dev, stg, prod, ...)
///
/// Stage variables are consumed during template expansion; the parsed stage is kept
/// so commands can list the stages a project declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    /// Stage-scoped template variables
    #[serde(default)]
    pub variables: HashMap<String, String>,
}
