//! Services shared by every suite in one invocation

use crate::cache::{Berkshelf, DependencyCache, DependencyResolver, ImageCache};
use crate::config::Project;
use crate::orchestration::{create_runtime, ContainerRuntime};
use crate::state::StateFile;
use crate::sync::KeyedMutex;
use std::path::PathBuf;
use std::sync::Arc;

/// The project plus the injected collaborators suites use to do their work.
///
/// Every suite in a run holds the same context, so the global state file,
/// the lock registry, and both caches are shared between them.
pub struct RunContext {
    pub project: Project,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub global: Arc<StateFile>,
    pub images: ImageCache,
    pub dependencies: DependencyCache,
}

impl RunContext {
    pub fn new(
        project: Project,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<dyn DependencyResolver>,
    ) -> Self {
        let global = Arc::new(StateFile::new(project.global_state_path()));
        let locks = Arc::new(KeyedMutex::<PathBuf>::new());

        let images = ImageCache::new(Arc::clone(&runtime), Arc::clone(&global), Arc::clone(&locks));
        let dependencies = DependencyCache::new(
            resolver,
            Arc::clone(&global),
            locks,
            project.state_dir().join("cookbooks"),
        );

        Self {
            project,
            runtime,
            global,
            images,
            dependencies,
        }
    }

    /// Context backed by the configured container CLI and Berkshelf
    pub fn from_project(project: Project) -> Self {
        let runtime = create_runtime(&project.config.docker.program);
        let resolver = Arc::new(Berkshelf::new(project.resolve(&project.config.chef.berksfile)));
        Self::new(project, runtime, resolver)
    }
}
