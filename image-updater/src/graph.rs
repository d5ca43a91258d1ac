//! Builds the image forest from the `FROM` references between definitions.
//!
//! Every definition whose base image is another definition becomes a child of
//! it. The remaining definitions are roots, grouped by the external image they
//! are built from.

use log::debug;

use crate::{
    errors::UpdateError,
    models::{ImageName, ImageSpec},
};

/// Root images that share one external base image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseGroup {
    pub base_image: ImageName,
    pub roots: Vec<ImageSpec>,
}

/// Groups in order of first appearance of their base image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Forest {
    pub groups: Vec<BaseGroup>,
}

impl Forest {
    #[cfg(test)]
    pub fn group(&self, base_image: &str) -> Option<&BaseGroup> {
        self.groups
            .iter()
            .find(|group| group.base_image.0 == base_image)
    }

    fn push_root(&mut self, root: ImageSpec) {
        match self
            .groups
            .iter_mut()
            .find(|group| group.base_image == root.base_image)
        {
            Some(group) => group.roots.push(root),
            None => self.groups.push(BaseGroup {
                base_image: root.base_image.clone(),
                roots: vec![root],
            }),
        }
    }
}

/// Returns `specs` with every node's children linked underneath it,
/// descendants included.
pub fn link(specs: &[ImageSpec]) -> Result<Vec<ImageSpec>, UpdateError> {
    let mut path = Vec::new();

    (0..specs.len())
        .map(|index| resolve(specs, index, &mut path))
        .collect()
}

fn resolve(
    specs: &[ImageSpec],
    index: usize,
    path: &mut Vec<usize>,
) -> Result<ImageSpec, UpdateError> {
    if let Some(start) = path.iter().position(|&visited| visited == index) {
        let mut cycle: Vec<String> = path[start..]
            .iter()
            .map(|&visited| specs[visited].image().0)
            .collect();
        cycle.push(specs[index].image().0);
        return Err(UpdateError::CycleDetected { cycle });
    }

    path.push(index);

    let mut spec = specs[index].clone();
    spec.children.clear();

    for (child_index, child) in specs.iter().enumerate() {
        if child_index != index && child.is_child_of(&specs[index]) {
            let child = resolve(specs, child_index, path)?;
            if !spec.add_child(child) {
                debug!("{} is already a child of {}", specs[child_index].image(), spec.image());
            }
        }
    }

    path.pop();

    Ok(spec)
}

/// Picks the nodes no other node claims as a child and groups them by base
/// image. Expects the output of [`link`].
pub fn partition(linked: &[ImageSpec]) -> Forest {
    let mut forest = Forest::default();

    for (index, spec) in linked.iter().enumerate() {
        let is_child = linked
            .iter()
            .enumerate()
            .any(|(parent_index, parent)| parent_index != index && spec.is_child_of(parent));

        if !is_child {
            forest.push_root(spec.clone());
        }
    }

    forest
}

/// Links `specs` and partitions the result.
pub fn build_forest(specs: &[ImageSpec]) -> Result<Forest, UpdateError> {
    let linked = link(specs)?;
    Ok(partition(&linked))
}
