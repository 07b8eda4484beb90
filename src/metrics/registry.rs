//! Metric and template definitions.

use super::metric::{Metric, MetricDef};
use super::template::MetricTemplate;
use crate::types::SymbolId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

/// Allocates template and metric ids and keeps their definitions.
///
/// The wire writer looks definitions up here when a performance record
/// references a metric for the first time in a stream.
#[derive(Debug)]
pub struct MetricRegistry {
    next_template: AtomicU32,
    next_metric: AtomicU32,
    templates: RwLock<HashMap<u32, MetricTemplate>>,
    metrics: RwLock<HashMap<u32, MetricDef>>,
}

impl MetricRegistry {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_template: AtomicU32::new(1),
            next_metric: AtomicU32::new(1),
            templates: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a template, assigning it a fresh id.
    pub fn register_template(&self, mut template: MetricTemplate) -> MetricTemplate {
        template.id = self.next_template.fetch_add(1, Ordering::AcqRel);
        self.templates.write().insert(template.id, template.clone());
        template
    }

    /// Creates a metric of a registered template. Returns `None` if the
    /// template is unknown.
    pub fn register_metric(
        &self,
        template_id: u32,
        name: SymbolId,
        attrs: BTreeMap<SymbolId, String>,
    ) -> Option<Metric> {
        let template = self.templates.read().get(&template_id).cloned()?;
        let def = MetricDef {
            id: self.next_metric.fetch_add(1, Ordering::AcqRel),
            template_id,
            name,
            attrs,
        };
        self.metrics.write().insert(def.id, def.clone());
        Some(Metric::new(def, &template))
    }

    /// Installs a template received from elsewhere.
    pub fn put_template(&self, template: MetricTemplate) {
        self.next_template
            .fetch_max(template.id.saturating_add(1), Ordering::AcqRel);
        self.templates.write().insert(template.id, template);
    }

    /// Installs a metric definition received from elsewhere.
    pub fn put_metric(&self, def: MetricDef) {
        self.next_metric
            .fetch_max(def.id.saturating_add(1), Ordering::AcqRel);
        self.metrics.write().insert(def.id, def);
    }

    /// Returns the template with `id`.
    pub fn template(&self, id: u32) -> Option<MetricTemplate> {
        self.templates.read().get(&id).cloned()
    }

    /// Returns the metric definition with `id`.
    pub fn metric(&self, id: u32) -> Option<MetricDef> {
        self.metrics.read().get(&id).cloned()
    }

    /// Returns the number of templates.
    pub fn template_count(&self) -> usize {
        self.templates.read().len()
    }

    /// Returns the number of metrics.
    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
