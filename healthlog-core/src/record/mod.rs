//! Record mutation
//!
//! - [`patch`]: pure `apply` / `merge` over [`RecordPatch`]
//! - [`summary`]: totals derived from the entry lists
//! - [`metabolic`]: BMR and TDEE
//! - [`live`]: write-through holder of the selected day

pub mod live;
pub mod metabolic;
pub mod patch;
pub mod summary;

pub use live::LiveRecord;
pub use metabolic::{calculate_metabolic_rates, with_metabolic_rates, DayInputs, MetabolicRates};
pub use patch::{apply, merge, RecordPatch};
pub use summary::recompute_summary;
