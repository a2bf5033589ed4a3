//! Result aggregation.
//!
//! Component results arrive from worker threads in any order. They are
//! grouped into one [`ResultCollection`] per component descriptor; a
//! collection is created on the first arrival and never replaced.

use crate::analysis::notify::{Notification, Notifier};
use crate::models::{
    AnalysisResult, AnalyzerResult, ComponentJob, ComponentResult, Descriptor, DescriptorResults,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Ordered results of one descriptor.
#[derive(Debug)]
pub struct ResultCollection {
    descriptor: Descriptor,
    results: Mutex<Vec<ComponentResult>>,
}

impl ResultCollection {
    fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn push(&self, component: Arc<ComponentJob>, result: AnalyzerResult) {
        self.lock().push(ComponentResult { component, result });
    }

    /// Copy of the results in arrival order.
    pub fn results(&self) -> Vec<ComponentResult> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ComponentResult>> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default)]
struct Collections {
    by_descriptor: HashMap<Descriptor, Arc<ResultCollection>>,
    // Creation order, used for snapshots and "first result" lookups.
    order: Vec<Descriptor>,
}

/// Concurrent map from descriptor to its result collection.
#[derive(Debug)]
pub struct ResultAggregator {
    collections: RwLock<Collections>,
    notifier: Notifier,
}

impl ResultAggregator {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            notifier,
        }
    }

    /// Build an aggregator from an existing result, e.g. one loaded from
    /// disk. Collection notifications are emitted as for a live run.
    pub fn from_result(result: &AnalysisResult, notifier: Notifier) -> Self {
        let aggregator = Self::new(notifier);
        for (component, value) in result.pairs() {
            aggregator.add_shared(Arc::clone(component), value.clone());
        }
        aggregator
    }

    pub fn add_result(&self, component: ComponentJob, result: AnalyzerResult) {
        self.add_shared(Arc::new(component), result);
    }

    /// Append a result to its descriptor's collection, creating the
    /// collection on first arrival.
    pub fn add_shared(&self, component: Arc<ComponentJob>, result: AnalyzerResult) {
        let collection = self.collection_for(&component.descriptor);
        debug!(
            descriptor = %component.descriptor.display_name,
            component = component.label(),
            "Adding result"
        );
        collection.push(component, result);
    }

    /// Get or create the collection of a descriptor.
    ///
    /// Creation happens under the write lock, so concurrent first arrivals
    /// all end up with the one collection that was inserted, and only that
    /// path publishes the "created" notification.
    fn collection_for(&self, descriptor: &Descriptor) -> Arc<ResultCollection> {
        if let Some(existing) = self.read().by_descriptor.get(descriptor) {
            return Arc::clone(existing);
        }

        let (collection, created) = {
            let mut collections = self.write();
            let Collections {
                by_descriptor,
                order,
            } = &mut *collections;

            match by_descriptor.get(descriptor) {
                Some(winner) => (Arc::clone(winner), false),
                None => {
                    let collection = Arc::new(ResultCollection::new(descriptor.clone()));
                    by_descriptor.insert(descriptor.clone(), Arc::clone(&collection));
                    order.push(descriptor.clone());
                    (collection, true)
                }
            }
        };

        if created {
            self.notifier.publish(Notification::ResultCollectionCreated {
                descriptor: descriptor.clone(),
                display_name: descriptor.display_name.clone(),
                icon: descriptor.icon.clone(),
            });
        }

        collection
    }

    pub fn get_result(&self, descriptor: &Descriptor) -> Option<Arc<ResultCollection>> {
        self.read().by_descriptor.get(descriptor).cloned()
    }

    /// Descriptor of the first collection that was created.
    pub fn first_descriptor(&self) -> Option<Descriptor> {
        self.read().order.first().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// Copy every collection, in creation order.
    ///
    /// Each collection is copied consistently; results arriving while the
    /// snapshot is taken may or may not be included.
    pub fn snapshot(&self) -> AnalysisResult {
        let collections: Vec<Arc<ResultCollection>> = {
            let guard = self.read();
            guard
                .order
                .iter()
                .filter_map(|d| guard.by_descriptor.get(d).cloned())
                .collect()
        };

        AnalysisResult {
            collections: collections
                .iter()
                .map(|c| DescriptorResults {
                    descriptor: c.descriptor().clone(),
                    results: c.results(),
                })
                .collect(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}
