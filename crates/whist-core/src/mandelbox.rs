use serde::{Deserialize, Serialize};

/// A remote compute session assigned by the scaling service.
///
/// Immutable once assigned; a new launch attempt gets a new one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MandelboxInfo {
    pub mandelbox_id: String,
    pub ip: String,
}
