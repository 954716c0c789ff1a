//! Caller-supplied capability for completing input a step needs but lacks.
//!
//! A [`DataCompletionCallback`] is consulted by the step executor only when a
//! backend step declares inputs that are absent from the accumulated state.
//! Every method has a "nothing to offer" default, so mocks implement only
//! what they need. [`CallbackDescriptor`] is the stock implementation, built
//! with [`CallbackDescriptor::builder`] or the factory functions below.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::catalog::FieldInput;
use crate::data::{QueryFilter, QueryRequest};
use crate::engine::types::Values;

pub trait DataCompletionCallback: Send + Sync {
    /// Filter selecting the records a step needs.
    fn query_filter(&self) -> Option<QueryFilter> {
        None
    }

    /// Values for the listed missing fields. Fields left out stay missing.
    fn field_values(&self, _missing: &[FieldInput]) -> Values {
        Values::new()
    }

    /// Adjust the record query for `step` just before it runs.
    fn before_query(&self, _step: &str, _request: &mut QueryRequest) {}
}

/// Resolves a single field on demand.
pub type FieldResolver = Arc<dyn Fn(&FieldInput) -> Option<Value> + Send + Sync>;

/// Filter, static values and per-field resolvers for one invocation.
#[derive(Clone, Default)]
pub struct CallbackDescriptor {
    filter: Option<QueryFilter>,
    values: Values,
    resolvers: HashMap<String, FieldResolver>,
}

impl CallbackDescriptor {
    pub fn builder() -> CallbackBuilder {
        CallbackBuilder::default()
    }

    pub fn filter(&self) -> Option<&QueryFilter> {
        self.filter.as_ref()
    }

    pub fn values(&self) -> &Values {
        &self.values
    }
}

impl std::fmt::Debug for CallbackDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut resolvers: Vec<&String> = self.resolvers.keys().collect();
        resolvers.sort();
        f.debug_struct("CallbackDescriptor")
            .field("filter", &self.filter)
            .field("values", &self.values)
            .field("resolvers", &resolvers)
            .finish()
    }
}

impl DataCompletionCallback for CallbackDescriptor {
    fn query_filter(&self) -> Option<QueryFilter> {
        self.filter.clone()
    }

    fn field_values(&self, missing: &[FieldInput]) -> Values {
        let mut resolved = Values::new();
        for field in missing {
            if let Some(value) = self.values.get(&field.name) {
                resolved.insert(field.name.clone(), value.clone());
            } else if let Some(resolver) = self.resolvers.get(&field.name)
                && let Some(value) = resolver(field)
            {
                resolved.insert(field.name.clone(), value);
            }
        }
        resolved
    }
}

impl From<QueryFilter> for CallbackDescriptor {
    fn from(filter: QueryFilter) -> Self {
        for_filter(filter)
    }
}

#[derive(Default)]
pub struct CallbackBuilder {
    descriptor: CallbackDescriptor,
}

impl CallbackBuilder {
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.descriptor.filter = Some(filter);
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.descriptor.values.insert(name.into(), value.into());
        self
    }

    pub fn values(mut self, values: Values) -> Self {
        self.descriptor.values.extend(values);
        self
    }

    pub fn resolver<F>(mut self, name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&FieldInput) -> Option<Value> + Send + Sync + 'static,
    {
        self.descriptor.resolvers.insert(name.into(), Arc::new(resolver));
        self
    }

    pub fn build(self) -> CallbackDescriptor {
        self.descriptor
    }
}

/// Select the one record whose primary key `key_field` equals `value`.
pub fn for_primary_key(key_field: &str, value: impl Into<Value>) -> CallbackDescriptor {
    for_filter(QueryFilter::equals(key_field, value))
}

/// Select the records whose primary key is one of `values`.
pub fn for_primary_keys<I, V>(key_field: &str, values: I) -> CallbackDescriptor
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    for_filter(QueryFilter::in_list(key_field, values))
}

/// Wrap a bare filter; no field values are offered.
pub fn for_filter(filter: QueryFilter) -> CallbackDescriptor {
    CallbackDescriptor::builder().filter(filter).build()
}

/// Offer static field values; no filter.
pub fn for_field_values(values: Values) -> CallbackDescriptor {
    CallbackDescriptor::builder().values(values).build()
}
