use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::StubBackend;
use crate::config::DetectorSettings;

/// Builds a fresh backend instance.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of detector backend factories.
///
/// Every job and live session builds its own backend through `build`, so detection is
/// never serialized across workers. Factories may share immutable state (a loaded
/// model) between the instances they build.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the configured backend. `stub` is always available.
    pub fn from_config(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        let people = settings.stub_people;
        registry.register("stub", move || Ok(StubBackend::with_people(people)));

        if settings.backend == "tract" {
            register_tract(&mut registry, settings)?;
        }
        registry.set_default(&settings.backend)?;
        Ok(registry)
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<B, F>(&mut self, name: &str, factory: F)
    where
        B: DetectorBackend + 'static,
        F: Fn() -> Result<B> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        let factory: BackendFactory =
            Arc::new(move || factory().map(|b| Box::new(b) as Box<dyn DetectorBackend>));
        self.factories.insert(name.to_string(), factory);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Build a new instance of the named backend.
    pub fn build(&self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        factory()
    }

    /// Build a new instance of the default backend.
    pub fn build_default(&self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.build(name)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, settings: &DetectorSettings) -> Result<()> {
    use super::backends::{TractBackend, TractModel};

    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector.model_path is required for the tract backend"))?;
    let model = TractModel::load(path, settings.model_input)?;
    let iou = settings.iou_threshold;
    registry.register("tract", move || Ok(TractBackend::new(model.clone(), iou)));
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _settings: &DetectorSettings) -> Result<()> {
    Err(anyhow!(
        "detector backend 'tract' requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrowdwatchConfig;
    use crate::detect::ObjectClass;
    use image::RgbImage;

    #[test]
    fn stub_registry_builds_independent_instances() -> Result<()> {
        let mut settings = CrowdwatchConfig::default().detector;
        settings.stub_people = 2;
        let registry = BackendRegistry::from_config(&settings)?;
        assert_eq!(registry.default_name(), Some("stub"));

        let image = RgbImage::new(64, 64);
        let mut a = registry.build_default()?;
        let mut b = registry.build_default()?;
        assert_eq!(a.detect(&image, ObjectClass::Person, 0.3)?.len(), 2);
        assert_eq!(b.detect(&image, ObjectClass::Person, 0.3)?.len(), 2);
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut settings = CrowdwatchConfig::default().detector;
        settings.backend = "missing".to_string();
        assert!(BackendRegistry::from_config(&settings).is_err());
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_requires_feature() {
        let mut settings = CrowdwatchConfig::default().detector;
        settings.backend = "tract".to_string();
        let err = BackendRegistry::from_config(&settings)
            .err()
            .expect("tract without feature must fail");
        assert!(err.to_string().contains("backend-tract"));
    }
}
