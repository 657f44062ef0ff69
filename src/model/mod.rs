pub mod check;
pub mod input;
pub mod remote;

pub use check::{BaseCategory, CheckRecorder, CheckResult, CheckState};
pub use input::{CatalogView, InputState, MbArtist, MbImage, MetaRecord, TaskRecord};
pub use remote::{CaaIndex, IaFiles, IaMeta, IaState};
