// Error kinds for the renderer
//
// Every fatal failure is tagged with the stage it happened in and the
// name of the operation that failed. Recoverable presentation conditions
// (out-of-date, suboptimal) are NOT errors; see `frame::AcquireOutcome`
// and `frame::PresentOutcome`.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong underneath a failed operation
#[derive(Debug, Error)]
pub enum Cause {
    #[error("driver returned {0}")]
    Vk(#[from] vk::Result),
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Message(String),
}

impl Cause {
    /// I/O failure on the file at `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Cause::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Cause::Message(message)
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Cause::Message(message.to_owned())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("device initialization failed in {op}: {cause}")]
    DeviceInit { op: &'static str, #[source] cause: Cause },

    #[error("surface error in {op}: {cause}")]
    Surface { op: &'static str, #[source] cause: Cause },

    #[error("presentation chain build failed in {op}: {cause}")]
    ChainBuild { op: &'static str, #[source] cause: Cause },

    #[error("pipeline build failed in {op}: {cause}")]
    PipelineBuild { op: &'static str, #[source] cause: Cause },

    #[error("command recording failed in {op}: {cause}")]
    Record { op: &'static str, #[source] cause: Cause },

    #[error("queue submission failed in {op}: {cause}")]
    Submit { op: &'static str, #[source] cause: Cause },

    #[error("presentation failed in {op}: {cause}")]
    Present { op: &'static str, #[source] cause: Cause },
}

macro_rules! stage_constructor {
    ($fn_name:ident, $variant:ident) => {
        /// Returns a mapper usable with `map_err` that tags the error with `op`.
        pub fn $fn_name<E: Into<Cause>>(op: &'static str) -> impl FnOnce(E) -> RenderError {
            move |e| RenderError::$variant { op, cause: e.into() }
        }
    };
}

impl RenderError {
    stage_constructor!(device_init, DeviceInit);
    stage_constructor!(surface, Surface);
    stage_constructor!(chain_build, ChainBuild);
    stage_constructor!(pipeline_build, PipelineBuild);
    stage_constructor!(record, Record);
    stage_constructor!(submit, Submit);
    stage_constructor!(present, Present);

    /// Name of the operation that failed
    pub fn op(&self) -> &'static str {
        match self {
            RenderError::DeviceInit { op, .. }
            | RenderError::Surface { op, .. }
            | RenderError::ChainBuild { op, .. }
            | RenderError::PipelineBuild { op, .. }
            | RenderError::Record { op, .. }
            | RenderError::Submit { op, .. }
            | RenderError::Present { op, .. } => op,
        }
    }
}
