pub mod backends;
pub mod boundary;
pub mod compositor;
mod dotenv;
pub mod error;
pub mod mask;
pub mod orchestrator;
pub mod photo;
pub mod reference;
pub mod settings_layer;
pub mod style;

pub use self::error::{ErrorKind, TransformError};
pub use self::orchestrator::{CompositeResult, HairPipeline, PipelineState, TransformStrategy};
pub use self::photo::Photo;
pub use self::style::{HairVolume, StyleDescriptor};
