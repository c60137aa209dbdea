//! Per-framework-instance DI container.
//!
//! Providers are declared at framework-instance construction and constructed
//! lazily, at most once per container scope. An override table maps a
//! provider key (a contract trait, typically) to a substitute implementation
//! and is consulted before every resolution step — including when the key
//! appears as a transitive constructor dependency — so substitution reaches
//! the whole graph, not just top-level requests.

use super::registry::{
    cast_contract, injectable_metadata, AnyInstance, DepKey, Deps, InjectableMetadata,
};
use crate::error::DiError;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

type DiResult<T> = std::result::Result<T, DiError>;

/// A provider list entry.
pub enum Provide {
    /// A concrete injectable class.
    Class(DepKey),
    /// "Use `X` for `C`": requests for the contract `C` are satisfied by
    /// constructing `X` instead. Normal bindings and mock substitutions use
    /// the same entry.
    Binding { contract: DepKey, implementation: DepKey },
}

impl Provide {
    pub fn class<T: Send + Sync + 'static>() -> Self {
        Provide::Class(DepKey::of::<T>())
    }

    /// Bind contract `C` to implementation `X`.
    pub fn using<C: ?Sized + 'static, X: Send + Sync + 'static>() -> Self {
        Provide::Binding {
            contract: DepKey::of::<C>(),
            implementation: DepKey::of::<X>(),
        }
    }
}

pub struct Container {
    id: Uuid,
    registered: HashMap<TypeId, DepKey>,
    overrides: HashMap<TypeId, DepKey>,
    cache: DashMap<TypeId, AnyInstance>,
}

impl Container {
    /// Declare the provider list for this scope. Claims ownership of every
    /// named injectable (single-assignment; a class still owned by another
    /// live container is an error). A failed construction releases every
    /// owner it claimed so far, leaving the classes free for another scope.
    pub fn new(providers: impl IntoIterator<Item = Provide>) -> DiResult<Self> {
        let id = Uuid::new_v4();
        let mut registered = HashMap::new();
        let mut overrides: HashMap<TypeId, DepKey> = HashMap::new();
        let mut claimed: Vec<Arc<InjectableMetadata>> = Vec::new();

        for entry in providers {
            if let Err(err) = Self::claim(id, entry, &mut registered, &mut overrides, &mut claimed)
            {
                for meta in claimed {
                    meta.clear_owner(id);
                }
                return Err(err);
            }
        }

        Ok(Self {
            id,
            registered,
            overrides,
            cache: DashMap::new(),
        })
    }

    fn claim(
        container: Uuid,
        entry: Provide,
        registered: &mut HashMap<TypeId, DepKey>,
        overrides: &mut HashMap<TypeId, DepKey>,
        claimed: &mut Vec<Arc<InjectableMetadata>>,
    ) -> DiResult<()> {
        let implementation = match &entry {
            Provide::Class(key) => *key,
            Provide::Binding { implementation, .. } => *implementation,
        };
        let meta = injectable_metadata(implementation.type_id).ok_or_else(|| {
            DiError::MustBeAnnotatedInjectable {
                type_name: implementation.type_name.to_string(),
            }
        })?;
        meta.assign_owner(container)?;
        claimed.push(meta);
        registered.insert(implementation.type_id, implementation);

        if let Provide::Binding { contract, .. } = entry {
            if overrides.insert(contract.type_id, implementation).is_some() {
                return Err(DiError::DuplicateBinding {
                    type_name: contract.type_name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolve a concrete provider. Memoized: repeated calls within one
    /// scope return the same singleton.
    pub fn get_provider<T: Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        let key = DepKey::of::<T>();
        if injectable_metadata(key.type_id).is_none() {
            return Err(DiError::MustBeAnnotatedInjectable {
                type_name: key.type_name.to_string(),
            });
        }
        if !self.registered.contains_key(&key.type_id) {
            return Err(DiError::ProviderNotRegistered {
                type_name: key.type_name.to_string(),
            });
        }
        let mut stack = Vec::new();
        let (instance, _) = self.resolve_key(key, &mut stack)?;
        instance
            .downcast::<T>()
            .map_err(|_| DiError::DowncastFailed {
                type_name: key.type_name.to_string(),
            })
    }

    /// Resolve a contract handle: whichever implementation this scope bound
    /// to `C` (the substitution-aware request form).
    pub fn get_provider_as<C: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<C>> {
        let contract = DepKey::of::<C>();
        let implementation = self.overrides.get(&contract.type_id).copied().ok_or_else(|| {
            DiError::ProviderNotRegistered {
                type_name: contract.type_name.to_string(),
            }
        })?;
        let mut stack = Vec::new();
        let (instance, meta) = self.resolve_key(implementation, &mut stack)?;
        cast_contract::<C>(&meta, instance)
    }

    fn resolve_key(
        &self,
        key: DepKey,
        stack: &mut Vec<DepKey>,
    ) -> DiResult<(AnyInstance, Arc<InjectableMetadata>)> {
        // Override resolution happens before anything else looks at the key.
        let target = self.overrides.get(&key.type_id).copied().unwrap_or(key);
        let meta = injectable_metadata(target.type_id).ok_or_else(|| {
            DiError::MustBeAnnotatedInjectable {
                type_name: target.type_name.to_string(),
            }
        })?;

        if let Some(cached) = self.cache.get(&target.type_id) {
            return Ok((cached.clone(), meta));
        }

        if stack.iter().any(|k| k.type_id == target.type_id) {
            let cycle = stack
                .iter()
                .map(|k| k.type_name)
                .chain(std::iter::once(target.type_name))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(DiError::CircularDependency { cycle });
        }
        stack.push(target);

        let mut resolved: HashMap<TypeId, (AnyInstance, Arc<InjectableMetadata>)> = HashMap::new();
        for (index, dep) in meta.deps.iter().enumerate() {
            let dep_target = self.overrides.get(&dep.type_id).copied().unwrap_or(*dep);
            if injectable_metadata(dep_target.type_id).is_none() {
                return Err(DiError::NonInjectableConstructorParameter {
                    class: meta.type_name.to_string(),
                    index,
                    param: dep.type_name.to_string(),
                });
            }
            if !self.registered.contains_key(&dep_target.type_id) {
                return Err(DiError::ProviderNotRegistered {
                    type_name: dep_target.type_name.to_string(),
                });
            }
            let (instance, dep_meta) = self.resolve_key(*dep, stack)?;
            // Keyed as declared so factories look dependencies up by the
            // pre-override key.
            resolved.insert(dep.type_id, (instance, dep_meta));
        }

        tracing::debug!(provider = meta.type_name, "constructing provider");
        let instance = (meta.factory)(&Deps { values: &resolved })?;
        self.cache.insert(target.type_id, instance.clone());
        stack.pop();
        Ok((instance, meta))
    }

    /// Tear down this scope: drop every cached singleton and release
    /// ownership of the registered injectables so they can be used with a
    /// fresh container (tests construct and tear down many scopes).
    pub fn deregister_dependencies(&self) {
        self.cache.clear();
        for key in self.registered.values() {
            if let Some(meta) = injectable_metadata(key.type_id) {
                meta.clear_owner(self.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}
