mod context;
mod docker;

pub use context::ContextArchive;
pub use docker::DockerBackend;
