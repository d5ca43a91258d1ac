use std::{fmt, path::PathBuf};

/// Base image reference that has no filesystem to pull.
pub const SCRATCH: &str = "scratch";

const DEFAULT_TAG: &str = "latest";

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct LayerId(pub String);

/// A `repository:tag` image reference.
#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageName(pub String);

impl ImageName {
    /// Adds the implicit `latest` tag the daemon would use for an untagged
    /// reference. Digests and `scratch` are returned as is, and a registry
    /// port (`localhost:5000/app`) is not mistaken for a tag.
    pub fn normalized<S: Into<String>>(reference: S) -> ImageName {
        let reference = reference.into();

        if reference == SCRATCH || reference.contains('@') {
            return ImageName(reference);
        }

        let last_component = reference.rsplit('/').next().unwrap_or(&reference);
        if last_component.contains(':') {
            ImageName(reference)
        } else {
            ImageName(format!("{}:{}", reference, DEFAULT_TAG))
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.0 == SCRATCH
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One buildable image and the image it is built `FROM`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub tag: String,
    pub base_image: ImageName,
    pub dockerfile: PathBuf,
    pub children: Vec<ImageSpec>,
}

impl ImageSpec {
    pub fn new<N, T>(name: N, tag: T, base_image: ImageName, dockerfile: PathBuf) -> ImageSpec
    where
        N: Into<String>,
        T: Into<String>,
    {
        ImageSpec {
            name: name.into(),
            tag: tag.into(),
            base_image,
            dockerfile,
            children: Vec::new(),
        }
    }

    pub fn image(&self) -> ImageName {
        ImageName(format!("{}:{}", self.name, self.tag))
    }

    pub fn is_child_of(&self, parent: &ImageSpec) -> bool {
        self.base_image == parent.image()
    }

    /// Appends `child` unless an image with the same reference is already
    /// attached. Returns whether the child was inserted.
    pub fn add_child(&mut self, child: ImageSpec) -> bool {
        let image = child.image();
        if self.children.iter().any(|existing| existing.image() == image) {
            return false;
        }

        self.children.push(child);
        true
    }
}

/// Why a node was scheduled for a rebuild.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    /// The image is not present locally.
    Missing,
    /// The image does not contain its base image's current top layer.
    StaleBase,
    /// The image is current but a rebuild was forced.
    Forced,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Rebuild(RebuildReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Built because its own decision asked for it.
    Rebuilt(ImageId),
    /// Built because an ancestor was rebuilt.
    Cascaded(ImageId),
    Failed(String),
}

/// Everything a run decided and dispatched, in the order it happened.
#[derive(Clone, Debug, Default)]
pub struct Report {
    pub decisions: Vec<(ImageName, Decision)>,
    pub builds: Vec<(ImageName, BuildOutcome)>,
    pub failed_groups: Vec<(ImageName, String)>,
}

impl Report {
    #[cfg(test)]
    pub fn decision(&self, image: &str) -> Option<Decision> {
        self.decisions
            .iter()
            .find(|(name, _)| name.0 == image)
            .map(|(_, decision)| *decision)
    }

    pub fn built(&self) -> Vec<&str> {
        self.builds
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, BuildOutcome::Failed(_)))
            .map(|(name, _)| name.0.as_str())
            .collect()
    }

    pub fn build_failures(&self) -> impl Iterator<Item = (&ImageName, &str)> {
        self.builds.iter().filter_map(|(name, outcome)| match outcome {
            BuildOutcome::Failed(reason) => Some((name, reason.as_str())),
            _ => None,
        })
    }
}
