use thiserror::Error;

use crate::session::Mode;

/// failures surfaced to the user as a single message
#[derive(Debug, Error)]
pub enum ConvertError {
    /// none of the selected files has the type the active mode expects
    #[error("Please select valid {} files.", .mode.input_label())]
    Validation { mode: Mode },

    #[error("No {} files selected", .mode.input_label())]
    NoSelection { mode: Mode },

    #[error("Cannot run {requested} while the session is in {active} mode")]
    WrongMode { requested: Mode, active: Mode },

    /// the whole operation failed, e.g. an unreadable document or unembeddable image
    #[error("Error converting {}", .mode.input_label())]
    Conversion {
        mode: Mode,
        #[source]
        source: anyhow::Error,
    },
}
