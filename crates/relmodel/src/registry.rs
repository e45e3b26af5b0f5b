//! Declared models and their dependency order.

use crate::metadata::{BASE_MODEL, EntityMetadata, MetadataRegistry};
use crate::model::{Model, ModelDef, ModelInfo};
use relmodel_core::{Error, Result, SchemaErrorKind};
use relmodel_query::Table;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Every declared model, in declaration order.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<ModelInfo>>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model. A model with the same (case-insensitive) name is
    /// replaced in place.
    pub fn add_model(&mut self, model: ModelInfo) -> Arc<ModelInfo> {
        let model = Arc::new(model);
        match self.index.get(model.key()) {
            Some(&position) => self.models[position] = Arc::clone(&model),
            None => {
                self.index.insert(model.key().to_string(), self.models.len());
                self.models.push(Arc::clone(&model));
            }
        }
        model
    }

    pub fn get_model(&self, name: &str) -> Option<&Arc<ModelInfo>> {
        self.index
            .get(&name.to_lowercase())
            .map(|&position| &self.models[position])
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get_model(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Models in declaration order.
    pub fn declared(&self) -> &[Arc<ModelInfo>] {
        &self.models
    }

    /// Models ordered so every model referenced by a foreign key comes
    /// before the models holding the key.
    ///
    /// Models that take part in at least one foreign key are sorted
    /// topologically, ties broken by declaration order. Models with no
    /// foreign key in or out follow in declaration order.
    pub fn models(&self, metadata: &MetadataRegistry) -> Result<Vec<Arc<ModelInfo>>> {
        let count = self.models.len();
        let mut successors = vec![Vec::new(); count];
        let mut in_degree = vec![0_usize; count];
        let mut in_graph = vec![false; count];

        for (referencing, model) in self.models.iter().enumerate() {
            let entity = metadata.entity_metadata(model.key());
            for column in entity.columns() {
                let Some(reference) = &column.references else {
                    continue;
                };
                let Some(&referenced) = self.index.get(&reference.model) else {
                    continue;
                };
                successors[referenced].push(referencing);
                in_degree[referencing] += 1;
                in_graph[referenced] = true;
                in_graph[referencing] = true;
            }
        }

        let mut ready: BTreeSet<usize> = (0..count)
            .filter(|&i| in_graph[i] && in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(count);
        while let Some(next) = ready.pop_first() {
            sorted.push(next);
            for &successor in &successors[next] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    ready.insert(successor);
                }
            }
        }

        let graph_size = in_graph.iter().filter(|&&member| member).count();
        if sorted.len() < graph_size {
            let cyclic: Vec<&str> = (0..count)
                .filter(|&i| in_graph[i] && in_degree[i] > 0)
                .map(|i| self.models[i].name())
                .collect();
            return Err(Error::schema(
                SchemaErrorKind::CyclicDependency,
                format!("Cyclic dependency between models: {}", cyclic.join(", ")),
            ));
        }

        sorted.extend((0..count).filter(|&i| !in_graph[i]));
        Ok(sorted
            .into_iter()
            .map(|i| Arc::clone(&self.models[i]))
            .collect())
    }
}

/// Models plus their metadata: everything declared before [`build`](Self::build).
#[derive(Debug, Default)]
pub struct Registry {
    models: ModelRegistry,
    metadata: MetadataRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model.
    pub fn define(&mut self, def: ModelDef) -> Result<()> {
        def.validate()?;
        let key = def.name.to_lowercase();
        if key == BASE_MODEL || self.models.is_defined(&key) {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!("Model {} has already been defined", def.name),
            ));
        }

        if let Some(parent) = &def.parent {
            self.metadata.set_parent(&key, parent);
        }
        {
            let entity = self.metadata.entity_mut(&key);
            if let Some(table) = &def.table {
                entity.name.clone_from(table);
            }
            if let Some(schema) = &def.schema {
                entity.schema = Some(schema.clone());
            }
        }
        for column in def.columns {
            self.metadata.add_column(&key, column);
        }
        for association in def.associations {
            self.metadata.add_association(association.with_source(&key));
        }

        tracing::debug!(model = %def.name, is_abstract = def.is_abstract, "model defined");
        if !def.is_abstract {
            self.models.add_model(ModelInfo {
                name: def.name,
                key,
                derived: def.derived,
                events: def.events,
            });
        }
        Ok(())
    }

    /// Declare a typed model.
    pub fn register<M: Model>(&mut self) -> Result<()> {
        self.define(M::define(ModelDef::new(M::NAME)))
    }

    /// Resolve associations and render table descriptors.
    pub fn build(&mut self) -> Result<()> {
        self.metadata.build(&mut self.models)
    }

    pub fn is_built(&self) -> bool {
        self.metadata.is_built()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataRegistry {
        &mut self.metadata
    }

    pub fn model(&self, name: &str) -> Result<&Arc<ModelInfo>> {
        self.models.get_model(name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownModel,
                format!("Model {name} has not been defined"),
            )
        })
    }

    /// Models in dependency order.
    pub fn ordered_models(&self) -> Result<Vec<Arc<ModelInfo>>> {
        self.models.models(&self.metadata)
    }

    pub fn entity_metadata(&self, name: &str) -> EntityMetadata {
        self.metadata.entity_metadata(name)
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.metadata.sql_entity(name)
    }
}
