use anyhow::Result;
use std::{collections::BTreeMap as Map, path::Path};

use crate::models::{ImageId, ImageName, ImageSpec, LayerId};

pub trait ConfigFrontend {
    /// Reads every loadable image definition from `config_path`. Definitions
    /// that can't be loaded are reported and left out.
    fn image_specs(&mut self, config_path: &Path) -> Result<Vec<ImageSpec>>;
}

pub trait ContainerBackend {
    fn pull_image(&mut self, name: &ImageName) -> Result<()>;

    /// Snapshot of the locally present images, keyed by `repository:tag`.
    fn list_images(&mut self) -> Result<Map<ImageName, ImageId>>;

    /// Layers of an image, oldest first. Accepts an image id or a reference.
    fn inspect_image(&mut self, reference: &str) -> Result<Vec<LayerId>>;

    fn build_image(&mut self, spec: &ImageSpec) -> Result<ImageId>;
}
