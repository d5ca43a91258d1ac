use anyhow::{anyhow, Result};
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::{error, info, warn};
use std::{
    collections::BTreeMap as Map,
    io::{self, Write},
};

use crate::{
    errors::UpdateError,
    graph::{BaseGroup, Forest},
    models::{
        BuildOutcome, Decision, ImageId, ImageName, ImageSpec, LayerId, RebuildReason, Report,
    },
    services::ContainerBackend,
};

/// Locally present images, as returned by [`ContainerBackend::list_images`].
pub type Inventory = Map<ImageName, ImageId>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RebuildPolicy {
    /// Rebuild every visited image, even the ones that are up to date.
    pub force: bool,

    /// After rebuilding an image, inspect it again and decide for each of its
    /// children instead of rebuilding them unconditionally.
    pub propagate_after_rebuild: bool,

    /// When rebuilding unconditionally, rebuild every child. With `false`
    /// only the first child at each level is rebuilt.
    pub build_all_children: bool,
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        RebuildPolicy {
            force: false,
            propagate_after_rebuild: false,
            build_all_children: true,
        }
    }
}

/// Outcome of checking one image against its parent's top layer.
enum Verdict {
    /// Up to date; carries the image's own top layer for its children.
    Skip(LayerId),
    Rebuild(RebuildReason),
}

impl Verdict {
    fn decision(&self) -> Decision {
        match self {
            Verdict::Skip(_) => Decision::Skip,
            Verdict::Rebuild(reason) => Decision::Rebuild(*reason),
        }
    }
}

pub struct Controller {
    backend: Box<dyn ContainerBackend>,
    policy: RebuildPolicy,
    progress: Box<dyn Write>,
}

impl Controller {
    pub fn new<B>(backend: B, policy: RebuildPolicy) -> Controller
    where
        B: 'static + ContainerBackend,
    {
        Controller {
            backend: Box::new(backend),
            policy,
            progress: Box::new(io::sink()),
        }
    }

    /// Prints a line to `progress` for every pull and build.
    pub fn with_progress<W>(mut self, progress: W) -> Controller
    where
        W: 'static + Write,
    {
        self.progress = Box::new(progress);
        self
    }

    fn report_progress(&mut self, message: String) {
        if let Err(err) = self.write_progress(message) {
            warn!("couldn't print progress: {}", err);
        }
    }

    fn write_progress(&mut self, message: String) -> Result<()> {
        self.progress
            .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
            .queue(style::Print(format!("{}\n", message)))?;
        self.progress.flush()?;

        Ok(())
    }

    /// Pulls the base image of every group and rebuilds the images whose
    /// base has changed. A failing group is recorded in the report and
    /// doesn't stop the others.
    pub fn update(&mut self, forest: &Forest) -> Report {
        let mut report = Report::default();

        for group in forest.groups.iter() {
            if group.base_image.is_scratch() {
                info!(
                    "skipping {} image(s) built from scratch",
                    group.roots.len()
                );
                continue;
            }

            if let Err(err) = self.update_group(group, &mut report) {
                error!("couldn't update images based on {}: {:#}", group.base_image, err);
                report
                    .failed_groups
                    .push((group.base_image.clone(), format!("{:#}", err)));
            }
        }

        report
    }

    fn update_group(&mut self, group: &BaseGroup, report: &mut Report) -> Result<()> {
        info!("pulling image {}", group.base_image);
        self.report_progress(format!("pull image {}", group.base_image));
        self.backend.pull_image(&group.base_image)?;
        info!("image {} pull finished", group.base_image);

        let inventory = self.backend.list_images()?;

        // Digest and fully qualified references aren't listed under the name
        // they were pulled with, so the base is inspected by reference.
        let base_layer = self
            .backend
            .inspect_image(&group.base_image.0)?
            .pop()
            .ok_or_else(|| anyhow!("base image {} has no layers", group.base_image))?;
        info!("top layer of {} is {}", group.base_image, base_layer.0);

        self.propagate(&group.roots, &base_layer, &inventory, report)
    }

    /// Decides for every node in `nodes` whether it must be rebuilt, given
    /// the current top layer of their common parent.
    pub fn propagate(
        &mut self,
        nodes: &[ImageSpec],
        parent_layer: &LayerId,
        inventory: &Inventory,
        report: &mut Report,
    ) -> Result<()> {
        for node in nodes {
            let image = node.image();
            info!("should {} be rebuilt?", image);

            let verdict = self.decide(&image, parent_layer, inventory)?;
            report.decisions.push((image.clone(), verdict.decision()));

            match verdict {
                Verdict::Skip(own_layer) => {
                    info!("no need to rebuild {}", image);
                    self.propagate(&node.children, &own_layer, inventory, report)?;
                }
                Verdict::Rebuild(reason) => {
                    info!("rebuilding {} ({:?})", image, reason);
                    self.rebuild(node, inventory, report)?;
                }
            }
        }

        Ok(())
    }

    fn decide(
        &mut self,
        image: &ImageName,
        parent_layer: &LayerId,
        inventory: &Inventory,
    ) -> Result<Verdict> {
        let id = match inventory.get(image) {
            Some(id) => id,
            None => return Ok(Verdict::Rebuild(RebuildReason::Missing)),
        };

        let layers = self.backend.inspect_image(&id.0)?;
        let own_layer = match layers.last() {
            Some(own_layer) if layers.contains(parent_layer) => own_layer.clone(),
            _ => return Ok(Verdict::Rebuild(RebuildReason::StaleBase)),
        };

        if self.policy.force {
            Ok(Verdict::Rebuild(RebuildReason::Forced))
        } else {
            Ok(Verdict::Skip(own_layer))
        }
    }

    fn rebuild(
        &mut self,
        node: &ImageSpec,
        inventory: &Inventory,
        report: &mut Report,
    ) -> Result<()> {
        let id = match self.build(node, false, report) {
            Some(id) => id,
            None => return Ok(()),
        };

        if !self.policy.propagate_after_rebuild {
            self.cascade(node, report);
            return Ok(());
        }

        match self.backend.inspect_image(&id.0)?.pop() {
            Some(top_layer) => self.propagate(&node.children, &top_layer, inventory, report),
            None => {
                warn!("rebuilt {} has no layers, not checking its children", node.image());
                Ok(())
            }
        }
    }

    /// Rebuilds the children of a freshly rebuilt image without inspecting
    /// them. A child that fails to build stops the cascade beneath it.
    fn cascade(&mut self, node: &ImageSpec, report: &mut Report) {
        let children = if self.policy.build_all_children {
            &node.children[..]
        } else {
            &node.children[..node.children.len().min(1)]
        };

        for child in children {
            if self.build(child, true, report).is_some() {
                self.cascade(child, report);
            }
        }
    }

    fn build(&mut self, node: &ImageSpec, cascaded: bool, report: &mut Report) -> Option<ImageId> {
        let image = node.image();
        info!("build image: {}", image);
        self.report_progress(format!("build image {}", image));

        match self.backend.build_image(node) {
            Ok(id) => {
                info!("build finished: {}", image);
                self.report_progress(format!("build finished {}", image));
                let outcome = if cascaded {
                    BuildOutcome::Cascaded(id.clone())
                } else {
                    BuildOutcome::Rebuilt(id.clone())
                };
                report.builds.push((image, outcome));
                Some(id)
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                error!(
                    "{}",
                    UpdateError::Build {
                        image: image.0.clone(),
                        reason: reason.clone(),
                    }
                );
                report.builds.push((image, BuildOutcome::Failed(reason)));
                None
            }
        }
    }
}
